//! Fixed-size graphics command messages.
//!
//! Every message here has a constant encoded size, so `encode` returns
//! a stack array the way the frame header does, and `decode` demands
//! exactly `SIZE` bytes.
//!
//! ```text
//! SURF  surface_id:u16 width:u16 height:u16 pixel_format:u16       (12)
//! DELS  surface_id:u16                                              (6)
//! MAPS  surface_id:u16 output_x:u16 output_y:u16                   (10)
//! STFR  frame_id:u32                                                (8)
//! ENFR  frame_id:u32                                                (8)
//! SFIL  frame_id:u32 surface_id:u16 x:i16 y:i16 w:u16 h:u16 color:u32 (22)
//! S2SF  frame_id:u32 src:u16 dst:u16 src_x,src_y,src_w,src_h,dst_x,dst_y:i16 (24)
//! S2CH  frame_id:u32 surface_id:u16 slot:u16 x:i16 y:i16 w:u16 h:u16 (20)
//! C2SF  frame_id:u32 surface_id:u16 slot:u16 dst_x:i16 dst_y:i16   (16)
//! EVCT  frame_id:u32 slot:u16                                      (10)
//! RSGR  width:u16 height:u16                                        (8)
//! CAPS  version:u32 flags:u32                                      (12)
//! INIT  color_depth:u32 flags_low:u32 flags_high:u32               (16)
//! ```

use bytes::{Buf, BufMut};

use super::{MessageType, fixed};
use crate::error::WireError;
use crate::flags::InitFlags;

// ── Surface lifecycle ────────────────────────────────────────────

/// `SURF`: a new server-side surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateSurface {
    pub surface_id: u16,
    pub width: u16,
    pub height: u16,
    pub pixel_format: u16,
}

impl CreateSurface {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::CreateSurface.magic());
        w.put_u16_le(self.surface_id);
        w.put_u16_le(self.width);
        w.put_u16_le(self.height);
        w.put_u16_le(self.pixel_format);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::CreateSurface, Self::SIZE)?;
        Ok(Self {
            surface_id: r.get_u16_le(),
            width: r.get_u16_le(),
            height: r.get_u16_le(),
            pixel_format: r.get_u16_le(),
        })
    }
}

/// `DELS`: a surface was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteSurface {
    pub surface_id: u16,
}

impl DeleteSurface {
    pub const SIZE: usize = 6;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::DeleteSurface.magic());
        w.put_u16_le(self.surface_id);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::DeleteSurface, Self::SIZE)?;
        Ok(Self {
            surface_id: r.get_u16_le(),
        })
    }
}

/// `MAPS`: position of a surface on the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapSurfaceToOutput {
    pub surface_id: u16,
    pub output_x: u16,
    pub output_y: u16,
}

impl MapSurfaceToOutput {
    pub const SIZE: usize = 10;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::MapSurfaceToOutput.magic());
        w.put_u16_le(self.surface_id);
        w.put_u16_le(self.output_x);
        w.put_u16_le(self.output_y);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::MapSurfaceToOutput, Self::SIZE)?;
        Ok(Self {
            surface_id: r.get_u16_le(),
            output_x: r.get_u16_le(),
            output_y: r.get_u16_le(),
        })
    }
}

// ── Frame boundaries ─────────────────────────────────────────────

/// `STFR`: opens a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartFrame {
    pub frame_id: u32,
}

impl StartFrame {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        frame_boundary(MessageType::StartFrame, self.frame_id)
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::StartFrame, Self::SIZE)?;
        Ok(Self {
            frame_id: r.get_u32_le(),
        })
    }
}

/// `ENFR`: closes the frame opened by the matching `STFR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndFrame {
    pub frame_id: u32,
}

impl EndFrame {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        frame_boundary(MessageType::EndFrame, self.frame_id)
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::EndFrame, Self::SIZE)?;
        Ok(Self {
            frame_id: r.get_u32_le(),
        })
    }
}

fn frame_boundary(kind: MessageType, frame_id: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    let mut w = &mut buf[..];
    w.put_slice(&kind.magic());
    w.put_u32_le(frame_id);
    buf
}

// ── Surface commands ─────────────────────────────────────────────

/// `SFIL`: fill a rectangle with one color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolidFill {
    pub frame_id: u32,
    pub surface_id: u16,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub color: u32,
}

impl SolidFill {
    pub const SIZE: usize = 22;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::SolidFill.magic());
        w.put_u32_le(self.frame_id);
        w.put_u16_le(self.surface_id);
        w.put_i16_le(self.x);
        w.put_i16_le(self.y);
        w.put_u16_le(self.width);
        w.put_u16_le(self.height);
        w.put_u32_le(self.color);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::SolidFill, Self::SIZE)?;
        Ok(Self {
            frame_id: r.get_u32_le(),
            surface_id: r.get_u16_le(),
            x: r.get_i16_le(),
            y: r.get_i16_le(),
            width: r.get_u16_le(),
            height: r.get_u16_le(),
            color: r.get_u32_le(),
        })
    }
}

/// `S2SF`: copy a rectangle between (or within) surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceToSurface {
    pub frame_id: u32,
    pub src_surface_id: u16,
    pub dst_surface_id: u16,
    pub src_x: i16,
    pub src_y: i16,
    pub src_width: i16,
    pub src_height: i16,
    pub dst_x: i16,
    pub dst_y: i16,
}

impl SurfaceToSurface {
    pub const SIZE: usize = 24;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::SurfaceToSurface.magic());
        w.put_u32_le(self.frame_id);
        w.put_u16_le(self.src_surface_id);
        w.put_u16_le(self.dst_surface_id);
        w.put_i16_le(self.src_x);
        w.put_i16_le(self.src_y);
        w.put_i16_le(self.src_width);
        w.put_i16_le(self.src_height);
        w.put_i16_le(self.dst_x);
        w.put_i16_le(self.dst_y);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::SurfaceToSurface, Self::SIZE)?;
        Ok(Self {
            frame_id: r.get_u32_le(),
            src_surface_id: r.get_u16_le(),
            dst_surface_id: r.get_u16_le(),
            src_x: r.get_i16_le(),
            src_y: r.get_i16_le(),
            src_width: r.get_i16_le(),
            src_height: r.get_i16_le(),
            dst_x: r.get_i16_le(),
            dst_y: r.get_i16_le(),
        })
    }
}

// ── Cache commands ───────────────────────────────────────────────

/// `S2CH`: store a surface region in a receiver cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceToCache {
    pub frame_id: u32,
    pub surface_id: u16,
    pub cache_slot: u16,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl SurfaceToCache {
    pub const SIZE: usize = 20;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::SurfaceToCache.magic());
        w.put_u32_le(self.frame_id);
        w.put_u16_le(self.surface_id);
        w.put_u16_le(self.cache_slot);
        w.put_i16_le(self.x);
        w.put_i16_le(self.y);
        w.put_u16_le(self.width);
        w.put_u16_le(self.height);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::SurfaceToCache, Self::SIZE)?;
        Ok(Self {
            frame_id: r.get_u32_le(),
            surface_id: r.get_u16_le(),
            cache_slot: r.get_u16_le(),
            x: r.get_i16_le(),
            y: r.get_i16_le(),
            width: r.get_u16_le(),
            height: r.get_u16_le(),
        })
    }
}

/// `C2SF`: blit a cached tile onto a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheToSurface {
    pub frame_id: u32,
    pub surface_id: u16,
    pub cache_slot: u16,
    pub dst_x: i16,
    pub dst_y: i16,
}

impl CacheToSurface {
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::CacheToSurface.magic());
        w.put_u32_le(self.frame_id);
        w.put_u16_le(self.surface_id);
        w.put_u16_le(self.cache_slot);
        w.put_i16_le(self.dst_x);
        w.put_i16_le(self.dst_y);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::CacheToSurface, Self::SIZE)?;
        Ok(Self {
            frame_id: r.get_u32_le(),
            surface_id: r.get_u16_le(),
            cache_slot: r.get_u16_le(),
            dst_x: r.get_i16_le(),
            dst_y: r.get_i16_le(),
        })
    }
}

/// `EVCT`: forget a cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictCache {
    pub frame_id: u32,
    pub cache_slot: u16,
}

impl EvictCache {
    pub const SIZE: usize = 10;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::EvictCache.magic());
        w.put_u32_le(self.frame_id);
        w.put_u16_le(self.cache_slot);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::EvictCache, Self::SIZE)?;
        Ok(Self {
            frame_id: r.get_u32_le(),
            cache_slot: r.get_u16_le(),
        })
    }
}

// ── Session-level settings ───────────────────────────────────────

/// `RSGR`: the desktop was resized; all surfaces are gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetGraphics {
    pub width: u16,
    pub height: u16,
}

impl ResetGraphics {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::ResetGraphics.magic());
        w.put_u16_le(self.width);
        w.put_u16_le(self.height);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::ResetGraphics, Self::SIZE)?;
        Ok(Self {
            width: r.get_u16_le(),
            height: r.get_u16_le(),
        })
    }
}

/// `CAPS`: graphics pipeline capability set chosen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapsConfirm {
    pub version: u32,
    pub flags: u32,
}

impl CapsConfirm {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::CapsConfirm.magic());
        w.put_u32_le(self.version);
        w.put_u32_le(self.flags);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::CapsConfirm, Self::SIZE)?;
        Ok(Self {
            version: r.get_u32_le(),
            flags: r.get_u32_le(),
        })
    }
}

/// `INIT`: negotiated session settings, sent once after connect.
///
/// Unknown bits in `flags` are preserved so newer engines can add
/// settings without breaking older bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitSettings {
    pub color_depth: u32,
    pub flags: InitFlags,
    pub flags_high: u32,
}

impl InitSettings {
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::InitSettings.magic());
        w.put_u32_le(self.color_depth);
        w.put_u32_le(self.flags.bits());
        w.put_u32_le(self.flags_high);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::InitSettings, Self::SIZE)?;
        Ok(Self {
            color_depth: r.get_u32_le(),
            flags: InitFlags::from_bits_retain(r.get_u32_le()),
            flags_high: r.get_u32_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_fill_layout() {
        let msg = SolidFill {
            frame_id: 5,
            surface_id: 1,
            x: -2,
            y: 0,
            width: 640,
            height: 480,
            color: 0xFFFF_FFFF,
        };
        let bytes = msg.encode();
        assert_eq!(&bytes[0..4], b"SFIL");
        assert_eq!(&bytes[4..8], &5u32.to_le_bytes());
        assert_eq!(&bytes[8..10], &1u16.to_le_bytes());
        assert_eq!(&bytes[10..12], &(-2i16).to_le_bytes());
        assert_eq!(&bytes[14..16], &640u16.to_le_bytes());
        assert_eq!(&bytes[18..22], &[0xFF; 4]);
        assert_eq!(SolidFill::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn create_surface_roundtrip() {
        let msg = CreateSurface {
            surface_id: 1,
            width: 640,
            height: 480,
            pixel_format: 0x20,
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), CreateSurface::SIZE);
        assert_eq!(CreateSurface::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn copy_commands_roundtrip() {
        let s2s = SurfaceToSurface {
            frame_id: 9,
            src_surface_id: 1,
            dst_surface_id: 2,
            src_x: -10,
            src_y: 20,
            src_width: 64,
            src_height: 64,
            dst_x: i16::MIN,
            dst_y: i16::MAX,
        };
        assert_eq!(SurfaceToSurface::decode(&s2s.encode()).unwrap(), s2s);

        let s2c = SurfaceToCache {
            frame_id: 9,
            surface_id: 1,
            cache_slot: 4095,
            x: 0,
            y: 64,
            width: 64,
            height: 64,
        };
        assert_eq!(SurfaceToCache::decode(&s2c.encode()).unwrap(), s2c);

        let c2s = CacheToSurface {
            frame_id: 10,
            surface_id: 1,
            cache_slot: 4095,
            dst_x: 128,
            dst_y: -1,
        };
        assert_eq!(CacheToSurface::decode(&c2s.encode()).unwrap(), c2s);

        let evict = EvictCache {
            frame_id: 11,
            cache_slot: 7,
        };
        assert_eq!(EvictCache::decode(&evict.encode()).unwrap(), evict);
    }

    #[test]
    fn init_settings_preserves_unknown_bits() {
        let msg = InitSettings {
            color_depth: 32,
            flags: InitFlags::from_bits_retain(0x8002_0001),
            flags_high: 0xDEAD,
        };
        let decoded = InitSettings::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.flags.contains(InitFlags::SUPPORT_GRAPHICS_PIPELINE));
    }

    #[test]
    fn truncated_is_rejected() {
        let bytes = StartFrame { frame_id: 1 }.encode();
        let err = StartFrame::decode(&bytes[..7]).unwrap_err();
        assert!(matches!(
            err,
            WireError::Truncated {
                expected: 8,
                actual: 7,
                ..
            }
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = ResetGraphics {
            width: 1920,
            height: 1080,
        }
        .encode()
        .to_vec();
        bytes.push(0);
        assert!(matches!(
            ResetGraphics::decode(&bytes),
            Err(WireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = EndFrame { frame_id: 3 }.encode();
        assert!(matches!(
            StartFrame::decode(&bytes),
            Err(WireError::InvalidMagic(m)) if &m == b"ENFR"
        ));
    }
}
