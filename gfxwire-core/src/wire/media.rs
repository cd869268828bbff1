//! Variable-length media messages: encoded tiles, video, audio and the
//! legacy delta frame.
//!
//! Each payload is preceded by an explicit size field. Decoders reject
//! a buffer whose remaining length disagrees with the declared sizes.
//!
//! ```text
//! WEBP|PROG|CLRC|TILE  frame_id:u32 surface_id:u16 x:u16 y:u16 w:u16 h:u16
//!                      data_size:u32 data                       (22 + data)
//! H264  frame_id:u32 surface_id:u16 codec_id:u16 frame_type:u8
//!       x:i16 y:i16 w:u16 h:u16 nal_size:u32 chroma_size:u32
//!       nal chroma                                              (29 + nal + chroma)
//! OPUS|AUDI  sample_rate:u32 channels:u16 frame_size:u16 data   (12 + data)
//! DELT  data_size:u32 data                                       (8 + data)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{MAGIC_LEN, MessageType, get_message_type, header, payload, size_u32};
use crate::error::WireError;

// ── Tiles ────────────────────────────────────────────────────────

/// Tile encodings, each with its own magic and receiver-side decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileCodec {
    Webp,
    Progressive,
    ClearCodec,
    Raw,
}

impl TileCodec {
    pub const fn message_type(self) -> MessageType {
        match self {
            TileCodec::Webp => MessageType::WebpTile,
            TileCodec::Progressive => MessageType::ProgressiveTile,
            TileCodec::ClearCodec => MessageType::ClearCodecTile,
            TileCodec::Raw => MessageType::RawTile,
        }
    }

    pub const fn from_message_type(kind: MessageType) -> Option<Self> {
        match kind {
            MessageType::WebpTile => Some(TileCodec::Webp),
            MessageType::ProgressiveTile => Some(TileCodec::Progressive),
            MessageType::ClearCodecTile => Some(TileCodec::ClearCodec),
            MessageType::RawTile => Some(TileCodec::Raw),
            _ => None,
        }
    }
}

/// An encoded tile placed at `(x, y)` on a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub codec: TileCodec,
    pub frame_id: u32,
    pub surface_id: u16,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub data: Bytes,
}

impl Tile {
    /// Fixed part of the message, magic included.
    pub const HEADER_SIZE: usize = 22;

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.data.len()
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        let data_size = size_u32(self.data.len())?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.codec.message_type().magic());
        buf.put_u32_le(self.frame_id);
        buf.put_u16_le(self.surface_id);
        buf.put_u16_le(self.x);
        buf.put_u16_le(self.y);
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u32_le(data_size);
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Decode any of the four tile families; the magic selects the codec.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let codec = get_message_type(data)
            .and_then(TileCodec::from_message_type)
            .ok_or_else(|| WireError::InvalidMagic(magic_of(data)))?;
        let kind = codec.message_type();

        let mut r = header(data, kind, Self::HEADER_SIZE)?;
        let frame_id = r.get_u32_le();
        let surface_id = r.get_u16_le();
        let x = r.get_u16_le();
        let y = r.get_u16_le();
        let width = r.get_u16_le();
        let height = r.get_u16_le();
        let data_size = r.get_u32_le() as usize;
        Ok(Self {
            codec,
            frame_id,
            surface_id,
            x,
            y,
            width,
            height,
            data: payload(r, data_size, kind)?,
        })
    }
}

// ── Video ────────────────────────────────────────────────────────

/// Picture type of an H.264 access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VideoFrameType {
    Idr = 0,
    P = 1,
    B = 2,
}

impl TryFrom<u8> for VideoFrameType {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(VideoFrameType::Idr),
            1 => Ok(VideoFrameType::P),
            2 => Ok(VideoFrameType::B),
            _ => Err(WireError::UnknownVariant {
                type_name: "VideoFrameType",
                value: v as u64,
            }),
        }
    }
}

/// `H264`: NAL units for one surface region.
///
/// `chroma` carries the auxiliary stream of 4:4:4 codecs and is empty
/// otherwise. `codec_id` is forwarded verbatim so the receiver can pick
/// the right decoder profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub frame_id: u32,
    pub surface_id: u16,
    pub codec_id: u16,
    pub frame_type: VideoFrameType,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub nal: Bytes,
    pub chroma: Bytes,
}

impl VideoFrame {
    pub const HEADER_SIZE: usize = 29;

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.nal.len() + self.chroma.len()
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        let nal_size = size_u32(self.nal.len())?;
        let chroma_size = size_u32(self.chroma.len())?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&MessageType::H264Frame.magic());
        buf.put_u32_le(self.frame_id);
        buf.put_u16_le(self.surface_id);
        buf.put_u16_le(self.codec_id);
        buf.put_u8(self.frame_type as u8);
        buf.put_i16_le(self.x);
        buf.put_i16_le(self.y);
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u32_le(nal_size);
        buf.put_u32_le(chroma_size);
        buf.put_slice(&self.nal);
        buf.put_slice(&self.chroma);
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let kind = MessageType::H264Frame;
        let mut r = header(data, kind, Self::HEADER_SIZE)?;
        let frame_id = r.get_u32_le();
        let surface_id = r.get_u16_le();
        let codec_id = r.get_u16_le();
        let frame_type = VideoFrameType::try_from(r.get_u8())?;
        let x = r.get_i16_le();
        let y = r.get_i16_le();
        let width = r.get_u16_le();
        let height = r.get_u16_le();
        let nal_size = r.get_u32_le() as usize;
        let chroma_size = r.get_u32_le() as usize;

        let body = payload(r, nal_size.saturating_add(chroma_size), kind)?;
        let chroma = body.slice(nal_size..);
        let nal = body.slice(..nal_size);
        Ok(Self {
            frame_id,
            surface_id,
            codec_id,
            frame_type,
            x,
            y,
            width,
            height,
            nal,
            chroma,
        })
    }
}

// ── Audio ────────────────────────────────────────────────────────

/// Audio stream encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    /// One Opus packet per message (`OPUS`).
    Opus,
    /// Interleaved PCM samples (`AUDI`).
    Pcm,
}

impl AudioCodec {
    pub const fn message_type(self) -> MessageType {
        match self {
            AudioCodec::Opus => MessageType::OpusAudio,
            AudioCodec::Pcm => MessageType::RawAudio,
        }
    }
}

/// An audio frame; independent of graphics frame boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Bytes,
}

impl AudioFrame {
    pub const HEADER_SIZE: usize = 12;

    /// Largest payload the 16-bit size field can describe.
    pub const MAX_PAYLOAD: usize = u16::MAX as usize;

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.data.len()
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        let frame_size = u16::try_from(self.data.len()).map_err(|_| WireError::PayloadTooLarge {
            size: self.data.len(),
            max: Self::MAX_PAYLOAD,
        })?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.codec.message_type().magic());
        buf.put_u32_le(self.sample_rate);
        buf.put_u16_le(self.channels);
        buf.put_u16_le(frame_size);
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let (codec, kind) = match get_message_type(data) {
            Some(MessageType::OpusAudio) => (AudioCodec::Opus, MessageType::OpusAudio),
            Some(MessageType::RawAudio) => (AudioCodec::Pcm, MessageType::RawAudio),
            _ => return Err(WireError::InvalidMagic(magic_of(data))),
        };
        let mut r = header(data, kind, Self::HEADER_SIZE)?;
        let sample_rate = r.get_u32_le();
        let channels = r.get_u16_le();
        let frame_size = r.get_u16_le() as usize;
        Ok(Self {
            codec,
            sample_rate,
            channels,
            data: payload(r, frame_size, kind)?,
        })
    }
}

// ── Legacy ───────────────────────────────────────────────────────

/// `DELT`: opaque full-frame delta from the pre-pipeline protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaFrame {
    pub data: Bytes,
}

impl DeltaFrame {
    pub const HEADER_SIZE: usize = 8;

    pub fn encode(&self) -> Result<Bytes, WireError> {
        let data_size = size_u32(self.data.len())?;
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.data.len());
        buf.put_slice(&MessageType::DeltaFrame.magic());
        buf.put_u32_le(data_size);
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let kind = MessageType::DeltaFrame;
        let mut r = header(data, kind, Self::HEADER_SIZE)?;
        let data_size = r.get_u32_le() as usize;
        Ok(Self {
            data: payload(r, data_size, kind)?,
        })
    }
}

/// First four bytes for error reporting, zero-padded when short.
fn magic_of(data: &[u8]) -> [u8; MAGIC_LEN] {
    let mut magic = [0u8; MAGIC_LEN];
    let n = data.len().min(MAGIC_LEN);
    magic[..n].copy_from_slice(&data[..n]);
    magic
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(codec: TileCodec, data: &'static [u8]) -> Tile {
        Tile {
            codec,
            frame_id: 42,
            surface_id: 1,
            x: 64,
            y: 128,
            width: 64,
            height: 64,
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn tile_families_keep_their_magic() {
        for (codec, magic) in [
            (TileCodec::Webp, b"WEBP"),
            (TileCodec::Progressive, b"PROG"),
            (TileCodec::ClearCodec, b"CLRC"),
            (TileCodec::Raw, b"TILE"),
        ] {
            let msg = tile(codec, b"\x01\x02\x03");
            let bytes = msg.encode().unwrap();
            assert_eq!(&bytes[..4], magic);
            assert_eq!(bytes.len(), Tile::HEADER_SIZE + 3);
            assert_eq!(Tile::decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn empty_tile_payload() {
        let msg = tile(TileCodec::Webp, b"");
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), Tile::HEADER_SIZE);
        assert_eq!(Tile::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn tile_size_mismatch_is_rejected() {
        let bytes = tile(TileCodec::Progressive, b"abcd").encode().unwrap();
        let short = &bytes[..bytes.len() - 1];
        assert!(matches!(
            Tile::decode(short),
            Err(WireError::LengthMismatch {
                declared: 4,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn tile_decoder_refuses_other_families() {
        let bytes = DeltaFrame {
            data: Bytes::from_static(b"x"),
        }
        .encode()
        .unwrap();
        assert!(matches!(Tile::decode(&bytes), Err(WireError::InvalidMagic(_))));
    }

    #[test]
    fn video_frame_roundtrip_with_chroma() {
        let msg = VideoFrame {
            frame_id: 7,
            surface_id: 2,
            codec_id: 0x000E,
            frame_type: VideoFrameType::Idr,
            x: -4,
            y: 8,
            width: 1920,
            height: 1080,
            nal: Bytes::from_static(&[0, 0, 0, 1, 0x67]),
            chroma: Bytes::from_static(&[0, 0, 1, 0x68]),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(&bytes[..4], b"H264");
        assert_eq!(bytes.len(), VideoFrame::HEADER_SIZE + 5 + 4);
        assert_eq!(bytes[12], 0);
        assert_eq!(VideoFrame::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn video_frame_type_out_of_range() {
        let msg = VideoFrame {
            frame_id: 1,
            surface_id: 1,
            codec_id: 0x0009,
            frame_type: VideoFrameType::P,
            x: 0,
            y: 0,
            width: 16,
            height: 16,
            nal: Bytes::new(),
            chroma: Bytes::new(),
        };
        let mut bytes = msg.encode().unwrap().to_vec();
        bytes[12] = 3;
        assert!(matches!(
            VideoFrame::decode(&bytes),
            Err(WireError::UnknownVariant { value: 3, .. })
        ));
    }

    #[test]
    fn audio_magic_follows_codec() {
        let opus = AudioFrame {
            codec: AudioCodec::Opus,
            sample_rate: 48_000,
            channels: 2,
            data: Bytes::from_static(&[0xFC, 0xFF, 0xFE]),
        };
        let bytes = opus.encode().unwrap();
        assert_eq!(&bytes[..4], b"OPUS");
        assert_eq!(AudioFrame::decode(&bytes).unwrap(), opus);

        let pcm = AudioFrame {
            codec: AudioCodec::Pcm,
            ..opus
        };
        assert_eq!(&pcm.encode().unwrap()[..4], b"AUDI");
    }

    #[test]
    fn audio_payload_limit() {
        let msg = AudioFrame {
            codec: AudioCodec::Pcm,
            sample_rate: 44_100,
            channels: 2,
            data: Bytes::from(vec![0u8; AudioFrame::MAX_PAYLOAD + 1]),
        };
        assert!(matches!(msg.encode(), Err(WireError::PayloadTooLarge { .. })));
    }

    #[test]
    fn delta_frame_roundtrip() {
        let msg = DeltaFrame {
            data: Bytes::from_static(b"legacy"),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(&bytes[4..8], &6u32.to_le_bytes());
        assert_eq!(DeltaFrame::decode(&bytes).unwrap(), msg);
    }
}
