//! The remote-session engine as seen by the pipeline.
//!
//! The engine itself (protocol stack, codecs, audio capture) lives
//! outside this crate. It is reached through [`SessionHandle`], which
//! hands out typed [`Event`]s and raw audio frames. Payloads the engine
//! still owns travel as [`ExternalBuffer`]s and are released back to the
//! engine when dropped.

pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::SessionError;
use crate::flags::InitFlags;
use crate::wire::{FrameAck, VideoFrameType};

pub use memory::MemorySession;

// ── Value types ──────────────────────────────────────────────────

/// An engine-side rectangle. Wider than any wire field; narrowing
/// happens at translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Graphics pipeline codec identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecId(pub u16);

impl CodecId {
    pub const UNCOMPRESSED: CodecId = CodecId(0x0000);
    pub const CLEAR_CODEC: CodecId = CodecId(0x0003);
    pub const PLANAR: CodecId = CodecId(0x0004);
    pub const AVC420: CodecId = CodecId(0x0009);
    pub const ALPHA: CodecId = CodecId(0x000A);
    pub const AVC444: CodecId = CodecId(0x000B);
    pub const PROGRESSIVE: CodecId = CodecId(0x000C);
    pub const PROGRESSIVE_V2: CodecId = CodecId(0x000D);
    pub const AVC444_V2: CodecId = CodecId(0x000E);

    pub fn name(self) -> &'static str {
        match self {
            CodecId::UNCOMPRESSED => "Uncompressed",
            CodecId::CLEAR_CODEC => "ClearCodec",
            CodecId::PLANAR => "Planar",
            CodecId::AVC420 => "AVC420",
            CodecId::ALPHA => "Alpha",
            CodecId::AVC444 => "AVC444",
            CodecId::PROGRESSIVE => "Progressive",
            CodecId::PROGRESSIVE_V2 => "ProgressiveV2",
            CodecId::AVC444_V2 => "AVC444v2",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#06x})", self.name(), self.0)
    }
}

/// Format of the engine's audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Snapshot of the engine's audio ring buffer, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioBufferStats {
    pub initialized: bool,
    pub write_pos: usize,
    pub read_pos: usize,
    pub buffer_size: usize,
}

impl AudioBufferStats {
    /// Bytes written but not yet read.
    pub fn available(&self) -> usize {
        self.write_pos.saturating_sub(self.read_pos)
    }
}

// ── ExternalBuffer ───────────────────────────────────────────────

/// Returns engine-owned payload memory.
pub trait BufferRelease: Send + Sync {
    fn release(&self, id: u64);
}

/// A payload still owned by the engine.
///
/// The engine is told exactly once that the memory can be reclaimed:
/// when this value is dropped, whatever path drops it (message built,
/// event discarded, task cancelled).
pub struct ExternalBuffer {
    id: u64,
    data: Bytes,
    releaser: Option<Arc<dyn BufferRelease>>,
}

impl ExternalBuffer {
    pub fn new(id: u64, data: Bytes, releaser: Arc<dyn BufferRelease>) -> Self {
        Self {
            id,
            data,
            releaser: Some(releaser),
        }
    }

    /// A buffer with no engine-side owner; dropping it releases nothing.
    pub fn detached(data: Bytes) -> Self {
        Self {
            id: 0,
            data,
            releaser: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Copy the payload into memory the pipeline owns.
    pub fn to_owned_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }
}

impl Drop for ExternalBuffer {
    fn drop(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            releaser.release(self.id);
        }
    }
}

impl fmt::Debug for ExternalBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalBuffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("owned_by_engine", &self.releaser.is_some())
            .finish()
    }
}

// ── Event ────────────────────────────────────────────────────────

/// One engine event, drained in engine order.
#[derive(Debug)]
pub enum Event {
    CreateSurface {
        surface_id: u16,
        width: u32,
        height: u32,
        pixel_format: u32,
    },
    DeleteSurface {
        surface_id: u16,
    },
    MapSurfaceToOutput {
        surface_id: u16,
        output_x: i32,
        output_y: i32,
    },
    StartFrame {
        frame_id: u32,
    },
    EndFrame {
        frame_id: u32,
    },
    SolidFill {
        frame_id: u32,
        surface_id: u16,
        rect: Rect,
        color: u32,
    },
    SurfaceToSurface {
        frame_id: u32,
        src_surface_id: u16,
        dst_surface_id: u16,
        src: Rect,
        dst_x: i32,
        dst_y: i32,
    },
    SurfaceToCache {
        frame_id: u32,
        surface_id: u16,
        cache_slot: u16,
        rect: Rect,
    },
    CacheToSurface {
        frame_id: u32,
        surface_id: u16,
        cache_slot: u16,
        dst_x: i32,
        dst_y: i32,
    },
    EvictCache {
        frame_id: u32,
        cache_slot: u16,
    },
    ResetGraphics {
        width: u32,
        height: u32,
    },
    CapsConfirm {
        version: u32,
        flags: u32,
    },
    InitSettings {
        color_depth: u32,
        flags: InitFlags,
        flags_high: u32,
    },
    /// Pre-encoded WebP tile; `payload` is `None` when the engine
    /// produced no data.
    WebpTile {
        frame_id: u32,
        surface_id: u16,
        rect: Rect,
        payload: Option<ExternalBuffer>,
    },
    VideoFrame {
        frame_id: u32,
        surface_id: u16,
        codec: CodecId,
        frame_type: VideoFrameType,
        rect: Rect,
        nal: Option<ExternalBuffer>,
        chroma: Option<ExternalBuffer>,
    },
    /// Anything the wire format has no message for (pointer updates,
    /// future engine event codes).
    Unrecognized {
        type_code: u32,
        payload: Option<ExternalBuffer>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CreateSurface { .. } => "CreateSurface",
            Event::DeleteSurface { .. } => "DeleteSurface",
            Event::MapSurfaceToOutput { .. } => "MapSurfaceToOutput",
            Event::StartFrame { .. } => "StartFrame",
            Event::EndFrame { .. } => "EndFrame",
            Event::SolidFill { .. } => "SolidFill",
            Event::SurfaceToSurface { .. } => "SurfaceToSurface",
            Event::SurfaceToCache { .. } => "SurfaceToCache",
            Event::CacheToSurface { .. } => "CacheToSurface",
            Event::EvictCache { .. } => "EvictCache",
            Event::ResetGraphics { .. } => "ResetGraphics",
            Event::CapsConfirm { .. } => "CapsConfirm",
            Event::InitSettings { .. } => "InitSettings",
            Event::WebpTile { .. } => "WebpTile",
            Event::VideoFrame { .. } => "VideoFrame",
            Event::Unrecognized { .. } => "Unrecognized",
        }
    }
}

// ── SessionHandle ────────────────────────────────────────────────

/// A live remote session, shared by the frame and audio loops.
///
/// Implementations must make every method individually safe to call
/// from either loop without external locking. `poll` is the only call
/// allowed to block; the pipeline always runs it on the blocking pool.
pub trait SessionHandle: Send + Sync + 'static {
    /// Drive the engine for up to `timeout`. An error means the session
    /// is over when [`SessionError::is_fatal`] says so.
    fn poll(&self, timeout: Duration) -> Result<(), SessionError>;

    fn has_events(&self) -> bool;

    fn next_event(&self) -> Option<Event>;

    /// Human-readable reason for the last failure, if the engine has one.
    fn last_error(&self) -> Option<String>;

    /// Forward a receiver acknowledgment to the engine.
    fn send_frame_ack(&self, ack: &FrameAck) -> Result<(), SessionError>;

    /// Codec the graphics pipeline settled on, once known.
    fn active_codec(&self) -> Option<CodecId> {
        None
    }

    fn has_audio(&self) -> bool {
        false
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        None
    }

    /// Copy the next audio frame into `buf`, returning its length.
    /// `Ok(0)` means nothing was available.
    fn read_audio_frame(&self, buf: &mut [u8]) -> Result<usize, SessionError> {
        let _ = buf;
        Ok(0)
    }

    fn audio_stats(&self) -> Option<AudioBufferStats> {
        None
    }

    /// Release the session. Called once, after both loops have stopped.
    fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRelease(AtomicUsize);

    impl BufferRelease for CountingRelease {
        fn release(&self, _id: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn buffer_released_exactly_once_on_drop() {
        let releaser = Arc::new(CountingRelease::default());
        let buf = ExternalBuffer::new(7, Bytes::from_static(b"tile"), releaser.clone());
        let copy = buf.to_owned_bytes();
        assert_eq!(releaser.0.load(Ordering::SeqCst), 0);
        drop(buf);
        assert_eq!(releaser.0.load(Ordering::SeqCst), 1);
        assert_eq!(&copy[..], b"tile");
    }

    #[test]
    fn dropping_an_event_releases_its_payload() {
        let releaser = Arc::new(CountingRelease::default());
        let event = Event::VideoFrame {
            frame_id: 1,
            surface_id: 1,
            codec: CodecId::AVC444,
            frame_type: VideoFrameType::Idr,
            rect: Rect::new(0, 0, 64, 64),
            nal: Some(ExternalBuffer::new(1, Bytes::from_static(b"n"), releaser.clone())),
            chroma: Some(ExternalBuffer::new(2, Bytes::from_static(b"c"), releaser.clone())),
        };
        drop(event);
        assert_eq!(releaser.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn codec_names() {
        assert_eq!(CodecId::CLEAR_CODEC.name(), "ClearCodec");
        assert_eq!(CodecId(0x0042).name(), "Unknown");
        assert_eq!(CodecId::AVC420.to_string(), "AVC420(0x0009)");
    }

    #[test]
    fn audio_stats_available() {
        let stats = AudioBufferStats {
            initialized: true,
            write_pos: 100,
            read_pos: 40,
            buffer_size: 4096,
        };
        assert_eq!(stats.available(), 60);
    }
}
