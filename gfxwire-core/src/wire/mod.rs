//! Binary wire format between the bridge and the browser client.
//!
//! Every message starts with a 4-byte ASCII magic that selects its
//! layout, followed by fixed little-endian header fields and, for media
//! families, a length-prefixed payload. The transport is message-framed,
//! so one buffer always holds exactly one message.
//!
//! | Magic  | Direction | Module         | Message                 |
//! |--------|-----------|----------------|-------------------------|
//! | `SURF` | out       | [`graphics`]   | create surface          |
//! | `DELS` | out       | [`graphics`]   | delete surface          |
//! | `MAPS` | out       | [`graphics`]   | map surface to output   |
//! | `STFR` | out       | [`graphics`]   | start frame             |
//! | `ENFR` | out       | [`graphics`]   | end frame               |
//! | `SFIL` | out       | [`graphics`]   | solid fill              |
//! | `S2SF` | out       | [`graphics`]   | surface to surface      |
//! | `S2CH` | out       | [`graphics`]   | surface to cache        |
//! | `C2SF` | out       | [`graphics`]   | cache to surface        |
//! | `EVCT` | out       | [`graphics`]   | evict cache slot        |
//! | `RSGR` | out       | [`graphics`]   | reset graphics          |
//! | `CAPS` | out       | [`graphics`]   | capability confirmation |
//! | `INIT` | out       | [`graphics`]   | initial settings        |
//! | `WEBP` `PROG` `CLRC` `TILE` | out | [`media`] | encoded tiles  |
//! | `H264` | out       | [`media`]      | video frame (NAL units) |
//! | `OPUS` `AUDI` | out | [`media`]     | audio frame             |
//! | `DELT` | out       | [`media`]      | legacy delta frame      |
//! | `FACK` | in        | [`backchannel`]| frame acknowledgment    |
//! | `BPRS` | in        | [`backchannel`]| backpressure            |

pub mod backchannel;
pub mod graphics;
pub mod media;
pub mod message;

use std::fmt;

use bytes::Bytes;

use crate::error::WireError;

pub use backchannel::{Backpressure, FrameAck, QueueDepth};
pub use graphics::{
    CacheToSurface, CapsConfirm, CreateSurface, DeleteSurface, EndFrame, EvictCache,
    InitSettings, MapSurfaceToOutput, ResetGraphics, SolidFill, StartFrame, SurfaceToCache,
    SurfaceToSurface,
};
pub use media::{AudioCodec, AudioFrame, DeltaFrame, Tile, TileCodec, VideoFrame, VideoFrameType};
pub use message::WireMessage;

/// Length of the magic prefix on every message.
pub const MAGIC_LEN: usize = 4;

// ── MessageType ──────────────────────────────────────────────────

/// Every message family known to the wire format, keyed by magic.
///
/// Magics are never reused; adding a family means adding a variant with
/// a fresh magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    CreateSurface,
    DeleteSurface,
    MapSurfaceToOutput,
    StartFrame,
    EndFrame,
    SolidFill,
    SurfaceToSurface,
    SurfaceToCache,
    CacheToSurface,
    EvictCache,
    ResetGraphics,
    CapsConfirm,
    InitSettings,
    WebpTile,
    ProgressiveTile,
    ClearCodecTile,
    RawTile,
    H264Frame,
    OpusAudio,
    RawAudio,
    DeltaFrame,
    FrameAck,
    Backpressure,
}

impl MessageType {
    /// All families, in catalog order.
    pub const ALL: [MessageType; 23] = [
        MessageType::CreateSurface,
        MessageType::DeleteSurface,
        MessageType::MapSurfaceToOutput,
        MessageType::StartFrame,
        MessageType::EndFrame,
        MessageType::SolidFill,
        MessageType::SurfaceToSurface,
        MessageType::SurfaceToCache,
        MessageType::CacheToSurface,
        MessageType::EvictCache,
        MessageType::ResetGraphics,
        MessageType::CapsConfirm,
        MessageType::InitSettings,
        MessageType::WebpTile,
        MessageType::ProgressiveTile,
        MessageType::ClearCodecTile,
        MessageType::RawTile,
        MessageType::H264Frame,
        MessageType::OpusAudio,
        MessageType::RawAudio,
        MessageType::DeltaFrame,
        MessageType::FrameAck,
        MessageType::Backpressure,
    ];

    /// The 4-byte magic that introduces this family on the wire.
    pub const fn magic(self) -> [u8; MAGIC_LEN] {
        match self {
            MessageType::CreateSurface => *b"SURF",
            MessageType::DeleteSurface => *b"DELS",
            MessageType::MapSurfaceToOutput => *b"MAPS",
            MessageType::StartFrame => *b"STFR",
            MessageType::EndFrame => *b"ENFR",
            MessageType::SolidFill => *b"SFIL",
            MessageType::SurfaceToSurface => *b"S2SF",
            MessageType::SurfaceToCache => *b"S2CH",
            MessageType::CacheToSurface => *b"C2SF",
            MessageType::EvictCache => *b"EVCT",
            MessageType::ResetGraphics => *b"RSGR",
            MessageType::CapsConfirm => *b"CAPS",
            MessageType::InitSettings => *b"INIT",
            MessageType::WebpTile => *b"WEBP",
            MessageType::ProgressiveTile => *b"PROG",
            MessageType::ClearCodecTile => *b"CLRC",
            MessageType::RawTile => *b"TILE",
            MessageType::H264Frame => *b"H264",
            MessageType::OpusAudio => *b"OPUS",
            MessageType::RawAudio => *b"AUDI",
            MessageType::DeltaFrame => *b"DELT",
            MessageType::FrameAck => *b"FACK",
            MessageType::Backpressure => *b"BPRS",
        }
    }

    /// Exact, case-sensitive magic lookup.
    pub const fn from_magic(magic: [u8; MAGIC_LEN]) -> Option<Self> {
        Some(match &magic {
            b"SURF" => MessageType::CreateSurface,
            b"DELS" => MessageType::DeleteSurface,
            b"MAPS" => MessageType::MapSurfaceToOutput,
            b"STFR" => MessageType::StartFrame,
            b"ENFR" => MessageType::EndFrame,
            b"SFIL" => MessageType::SolidFill,
            b"S2SF" => MessageType::SurfaceToSurface,
            b"S2CH" => MessageType::SurfaceToCache,
            b"C2SF" => MessageType::CacheToSurface,
            b"EVCT" => MessageType::EvictCache,
            b"RSGR" => MessageType::ResetGraphics,
            b"CAPS" => MessageType::CapsConfirm,
            b"INIT" => MessageType::InitSettings,
            b"WEBP" => MessageType::WebpTile,
            b"PROG" => MessageType::ProgressiveTile,
            b"CLRC" => MessageType::ClearCodecTile,
            b"TILE" => MessageType::RawTile,
            b"H264" => MessageType::H264Frame,
            b"OPUS" => MessageType::OpusAudio,
            b"AUDI" => MessageType::RawAudio,
            b"DELT" => MessageType::DeltaFrame,
            b"FACK" => MessageType::FrameAck,
            b"BPRS" => MessageType::Backpressure,
            _ => return None,
        })
    }

    /// Whether the browser sends this family to the bridge.
    pub const fn is_inbound(self) -> bool {
        matches!(self, MessageType::FrameAck | MessageType::Backpressure)
    }

    /// Human-readable family name, used in errors and logs.
    pub const fn name(self) -> &'static str {
        match self {
            MessageType::CreateSurface => "CreateSurface",
            MessageType::DeleteSurface => "DeleteSurface",
            MessageType::MapSurfaceToOutput => "MapSurfaceToOutput",
            MessageType::StartFrame => "StartFrame",
            MessageType::EndFrame => "EndFrame",
            MessageType::SolidFill => "SolidFill",
            MessageType::SurfaceToSurface => "SurfaceToSurface",
            MessageType::SurfaceToCache => "SurfaceToCache",
            MessageType::CacheToSurface => "CacheToSurface",
            MessageType::EvictCache => "EvictCache",
            MessageType::ResetGraphics => "ResetGraphics",
            MessageType::CapsConfirm => "CapsConfirm",
            MessageType::InitSettings => "InitSettings",
            MessageType::WebpTile => "WebpTile",
            MessageType::ProgressiveTile => "ProgressiveTile",
            MessageType::ClearCodecTile => "ClearCodecTile",
            MessageType::RawTile => "RawTile",
            MessageType::H264Frame => "H264Frame",
            MessageType::OpusAudio => "OpusAudio",
            MessageType::RawAudio => "RawAudio",
            MessageType::DeltaFrame => "DeltaFrame",
            MessageType::FrameAck => "FrameAck",
            MessageType::Backpressure => "Backpressure",
        }
    }
}

impl TryFrom<[u8; MAGIC_LEN]> for MessageType {
    type Error = WireError;

    fn try_from(magic: [u8; MAGIC_LEN]) -> Result<Self, Self::Error> {
        MessageType::from_magic(magic).ok_or(WireError::InvalidMagic(magic))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identify a message by its 4-byte prefix without decoding it.
///
/// Returns `None` for buffers shorter than the magic or with an unknown
/// magic.
pub fn get_message_type(data: &[u8]) -> Option<MessageType> {
    let magic: [u8; MAGIC_LEN] = data.get(..MAGIC_LEN)?.try_into().ok()?;
    MessageType::from_magic(magic)
}

// ── Decoding helpers ─────────────────────────────────────────────

/// Validate magic and minimum length, returning the bytes after the magic.
pub(crate) fn header<'a>(
    data: &'a [u8],
    kind: MessageType,
    size: usize,
) -> Result<&'a [u8], WireError> {
    if data.len() < size {
        return Err(WireError::Truncated {
            message: kind.name(),
            expected: size,
            actual: data.len(),
        });
    }
    let magic: [u8; MAGIC_LEN] = [data[0], data[1], data[2], data[3]];
    if magic != kind.magic() {
        return Err(WireError::InvalidMagic(magic));
    }
    Ok(&data[MAGIC_LEN..])
}

/// Validate a fixed-size message; trailing bytes are a mismatch.
pub(crate) fn fixed(data: &[u8], kind: MessageType, size: usize) -> Result<&[u8], WireError> {
    let body = header(data, kind, size)?;
    if data.len() != size {
        return Err(WireError::LengthMismatch {
            message: kind.name(),
            declared: size - MAGIC_LEN,
            actual: body.len(),
        });
    }
    Ok(body)
}

/// Take exactly `declared` payload bytes; anything else is a mismatch.
pub(crate) fn payload(rest: &[u8], declared: usize, kind: MessageType) -> Result<Bytes, WireError> {
    if rest.len() != declared {
        return Err(WireError::LengthMismatch {
            message: kind.name(),
            declared,
            actual: rest.len(),
        });
    }
    Ok(Bytes::copy_from_slice(rest))
}

/// Payload length as the `u32` size field, rejecting oversize payloads.
pub(crate) fn size_u32(len: usize) -> Result<u32, WireError> {
    u32::try_from(len).map_err(|_| WireError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_roundtrip_for_every_family() {
        for kind in MessageType::ALL {
            assert_eq!(MessageType::from_magic(kind.magic()), Some(kind));
        }
    }

    #[test]
    fn magics_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in MessageType::ALL {
            assert!(seen.insert(kind.magic()), "duplicate magic for {kind}");
        }
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert_eq!(get_message_type(b"STFR\x01\0\0\0"), Some(MessageType::StartFrame));
        assert_eq!(get_message_type(b"stfr\x01\0\0\0"), None);
    }

    #[test]
    fn short_or_unknown_prefix() {
        assert_eq!(get_message_type(b""), None);
        assert_eq!(get_message_type(b"FAC"), None);
        assert_eq!(get_message_type(b"ZZZZ"), None);
        assert!(MessageType::try_from(*b"ZZZZ").is_err());
    }

    #[test]
    fn only_backchannel_is_inbound() {
        let inbound: Vec<_> = MessageType::ALL.into_iter().filter(|k| k.is_inbound()).collect();
        assert_eq!(inbound, [MessageType::FrameAck, MessageType::Backpressure]);
    }
}
