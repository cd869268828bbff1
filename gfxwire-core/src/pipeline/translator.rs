//! Engine [`Event`] → [`WireMessage`] translation.
//!
//! Each handled event yields exactly one message; events the wire has no
//! family for yield none. Engine-owned payloads are copied into the
//! message and then released by dropping the event, so the engine hears
//! back exactly once per buffer whether or not a message was built.

use tracing::{debug, trace, warn};

use crate::error::WireError;
use crate::session::{CodecId, Event, ExternalBuffer};
use crate::wire::{
    CacheToSurface, CapsConfirm, CreateSurface, DeleteSurface, EndFrame, EvictCache,
    InitSettings, MapSurfaceToOutput, ResetGraphics, SolidFill, StartFrame, SurfaceToCache,
    SurfaceToSurface, Tile, TileCodec, VideoFrame, WireMessage,
};

/// Cache slots at or above this index are unusual enough to log.
pub const CACHE_SLOT_HINT: u16 = 4096;

/// Translate one event, dropping (with a log line) anything that cannot
/// be represented on the wire.
pub fn translate(event: Event) -> Option<WireMessage> {
    let name = event.name();
    match try_translate(event) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(event = name, error = %e, "dropping untranslatable event");
            None
        }
    }
}

/// Like [`translate`], but reports why an event could not be encoded.
///
/// `Ok(None)` means the event has no wire representation, which is not
/// an error.
pub fn try_translate(event: Event) -> Result<Option<WireMessage>, WireError> {
    let msg = match event {
        Event::CreateSurface {
            surface_id,
            width,
            height,
            pixel_format,
        } => {
            non_degenerate("CreateSurface", width, height)?;
            WireMessage::CreateSurface(CreateSurface {
                surface_id,
                width: narrow("width", width)?,
                height: narrow("height", height)?,
                pixel_format: narrow("pixel_format", pixel_format)?,
            })
        }

        Event::DeleteSurface { surface_id } => {
            WireMessage::DeleteSurface(DeleteSurface { surface_id })
        }

        Event::MapSurfaceToOutput {
            surface_id,
            output_x,
            output_y,
        } => WireMessage::MapSurfaceToOutput(MapSurfaceToOutput {
            surface_id,
            output_x: narrow("output_x", output_x)?,
            output_y: narrow("output_y", output_y)?,
        }),

        Event::StartFrame { frame_id } => WireMessage::StartFrame(StartFrame { frame_id }),

        Event::EndFrame { frame_id } => WireMessage::EndFrame(EndFrame { frame_id }),

        Event::SolidFill {
            frame_id,
            surface_id,
            rect,
            color,
        } => {
            non_degenerate("SolidFill", rect.width, rect.height)?;
            WireMessage::SolidFill(SolidFill {
                frame_id,
                surface_id,
                x: narrow("x", rect.x)?,
                y: narrow("y", rect.y)?,
                width: narrow("width", rect.width)?,
                height: narrow("height", rect.height)?,
                color,
            })
        }

        Event::SurfaceToSurface {
            frame_id,
            src_surface_id,
            dst_surface_id,
            src,
            dst_x,
            dst_y,
        } => {
            non_degenerate("SurfaceToSurface", src.width, src.height)?;
            WireMessage::SurfaceToSurface(SurfaceToSurface {
                frame_id,
                src_surface_id,
                dst_surface_id,
                src_x: narrow("src_x", src.x)?,
                src_y: narrow("src_y", src.y)?,
                src_width: narrow("src_width", src.width)?,
                src_height: narrow("src_height", src.height)?,
                dst_x: narrow("dst_x", dst_x)?,
                dst_y: narrow("dst_y", dst_y)?,
            })
        }

        Event::SurfaceToCache {
            frame_id,
            surface_id,
            cache_slot,
            rect,
        } => {
            note_cache_slot(cache_slot);
            non_degenerate("SurfaceToCache", rect.width, rect.height)?;
            WireMessage::SurfaceToCache(SurfaceToCache {
                frame_id,
                surface_id,
                cache_slot,
                x: narrow("x", rect.x)?,
                y: narrow("y", rect.y)?,
                width: narrow("width", rect.width)?,
                height: narrow("height", rect.height)?,
            })
        }

        Event::CacheToSurface {
            frame_id,
            surface_id,
            cache_slot,
            dst_x,
            dst_y,
        } => {
            note_cache_slot(cache_slot);
            WireMessage::CacheToSurface(CacheToSurface {
                frame_id,
                surface_id,
                cache_slot,
                dst_x: narrow("dst_x", dst_x)?,
                dst_y: narrow("dst_y", dst_y)?,
            })
        }

        Event::EvictCache {
            frame_id,
            cache_slot,
        } => {
            note_cache_slot(cache_slot);
            WireMessage::EvictCache(EvictCache {
                frame_id,
                cache_slot,
            })
        }

        Event::ResetGraphics { width, height } => {
            non_degenerate("ResetGraphics", width, height)?;
            WireMessage::ResetGraphics(ResetGraphics {
                width: narrow("width", width)?,
                height: narrow("height", height)?,
            })
        }

        Event::CapsConfirm { version, flags } => {
            WireMessage::CapsConfirm(CapsConfirm { version, flags })
        }

        Event::InitSettings {
            color_depth,
            flags,
            flags_high,
        } => {
            debug!(
                color_depth,
                settings = ?flags.enabled_names().collect::<Vec<_>>(),
                "session settings"
            );
            WireMessage::InitSettings(InitSettings {
                color_depth,
                flags,
                flags_high,
            })
        }

        Event::WebpTile {
            frame_id,
            surface_id,
            rect,
            payload,
        } => {
            let Some(payload) = usable(payload, "WebpTile") else {
                return Ok(None);
            };
            non_degenerate("WebpTile", rect.width, rect.height)?;
            WireMessage::Tile(Tile {
                codec: TileCodec::Webp,
                frame_id,
                surface_id,
                x: narrow("x", rect.x)?,
                y: narrow("y", rect.y)?,
                width: narrow("width", rect.width)?,
                height: narrow("height", rect.height)?,
                data: payload.to_owned_bytes(),
            })
        }

        Event::VideoFrame {
            frame_id,
            surface_id,
            codec,
            frame_type,
            rect,
            nal,
            chroma,
        } => {
            let Some(nal) = usable(nal, "VideoFrame") else {
                return Ok(None);
            };
            non_degenerate("VideoFrame", rect.width, rect.height)?;
            if codec == CodecId::CLEAR_CODEC {
                // Tile-based decoder on the receiver; chroma has no meaning here.
                WireMessage::Tile(Tile {
                    codec: TileCodec::ClearCodec,
                    frame_id,
                    surface_id,
                    x: narrow("x", rect.x)?,
                    y: narrow("y", rect.y)?,
                    width: narrow("width", rect.width)?,
                    height: narrow("height", rect.height)?,
                    data: nal.to_owned_bytes(),
                })
            } else {
                WireMessage::VideoFrame(VideoFrame {
                    frame_id,
                    surface_id,
                    codec_id: codec.0,
                    frame_type,
                    x: narrow("x", rect.x)?,
                    y: narrow("y", rect.y)?,
                    width: narrow("width", rect.width)?,
                    height: narrow("height", rect.height)?,
                    nal: nal.to_owned_bytes(),
                    chroma: chroma
                        .as_ref()
                        .map(ExternalBuffer::to_owned_bytes)
                        .unwrap_or_default(),
                })
            }
        }

        Event::Unrecognized { type_code, .. } => {
            trace!(type_code, "no wire representation, dropped");
            return Ok(None);
        }
    };
    Ok(Some(msg))
}

/// Narrow an engine integer to its wire width.
fn narrow<T, S>(field: &'static str, value: S) -> Result<T, WireError>
where
    S: Copy + Into<i64>,
    T: TryFrom<S>,
{
    T::try_from(value).map_err(|_| WireError::FieldOutOfRange {
        field,
        value: value.into(),
    })
}

fn non_degenerate(message: &'static str, width: u32, height: u32) -> Result<(), WireError> {
    if width == 0 || height == 0 {
        return Err(WireError::DegenerateRect {
            message,
            width,
            height,
        });
    }
    Ok(())
}

/// A payload worth encoding: present and non-empty.
fn usable(payload: Option<ExternalBuffer>, event: &'static str) -> Option<ExternalBuffer> {
    match payload {
        Some(buf) if !buf.is_empty() => Some(buf),
        Some(_) => {
            debug!(event, "zero-length payload, dropped");
            None
        }
        None => {
            debug!(event, "missing payload, dropped");
            None
        }
    }
}

fn note_cache_slot(slot: u16) {
    if slot >= CACHE_SLOT_HINT {
        debug!(slot, "cache slot beyond the usual range, forwarded as-is");
    }
}
