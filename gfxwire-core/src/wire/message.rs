//! The tagged union over every wire message family.

use bytes::Bytes;

use super::{
    AudioFrame, Backpressure, CacheToSurface, CapsConfirm, CreateSurface, DeleteSurface,
    DeltaFrame, EndFrame, EvictCache, FrameAck, InitSettings, MapSurfaceToOutput, MessageType,
    ResetGraphics, SolidFill, StartFrame, SurfaceToCache, SurfaceToSurface, Tile, VideoFrame,
};
use crate::error::WireError;

/// One decoded (or ready-to-encode) wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    CreateSurface(CreateSurface),
    DeleteSurface(DeleteSurface),
    MapSurfaceToOutput(MapSurfaceToOutput),
    StartFrame(StartFrame),
    EndFrame(EndFrame),
    SolidFill(SolidFill),
    SurfaceToSurface(SurfaceToSurface),
    SurfaceToCache(SurfaceToCache),
    CacheToSurface(CacheToSurface),
    EvictCache(EvictCache),
    ResetGraphics(ResetGraphics),
    CapsConfirm(CapsConfirm),
    InitSettings(InitSettings),
    Tile(Tile),
    VideoFrame(VideoFrame),
    Audio(AudioFrame),
    DeltaFrame(DeltaFrame),
    FrameAck(FrameAck),
    Backpressure(Backpressure),
}

impl WireMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::CreateSurface(_) => MessageType::CreateSurface,
            WireMessage::DeleteSurface(_) => MessageType::DeleteSurface,
            WireMessage::MapSurfaceToOutput(_) => MessageType::MapSurfaceToOutput,
            WireMessage::StartFrame(_) => MessageType::StartFrame,
            WireMessage::EndFrame(_) => MessageType::EndFrame,
            WireMessage::SolidFill(_) => MessageType::SolidFill,
            WireMessage::SurfaceToSurface(_) => MessageType::SurfaceToSurface,
            WireMessage::SurfaceToCache(_) => MessageType::SurfaceToCache,
            WireMessage::CacheToSurface(_) => MessageType::CacheToSurface,
            WireMessage::EvictCache(_) => MessageType::EvictCache,
            WireMessage::ResetGraphics(_) => MessageType::ResetGraphics,
            WireMessage::CapsConfirm(_) => MessageType::CapsConfirm,
            WireMessage::InitSettings(_) => MessageType::InitSettings,
            WireMessage::Tile(t) => t.codec.message_type(),
            WireMessage::VideoFrame(_) => MessageType::H264Frame,
            WireMessage::Audio(a) => a.codec.message_type(),
            WireMessage::DeltaFrame(_) => MessageType::DeltaFrame,
            WireMessage::FrameAck(_) => MessageType::FrameAck,
            WireMessage::Backpressure(_) => MessageType::Backpressure,
        }
    }

    /// Frame id carried by the message header, for the families that
    /// belong to a frame.
    pub fn frame_id(&self) -> Option<u32> {
        match self {
            WireMessage::StartFrame(m) => Some(m.frame_id),
            WireMessage::EndFrame(m) => Some(m.frame_id),
            WireMessage::SolidFill(m) => Some(m.frame_id),
            WireMessage::SurfaceToSurface(m) => Some(m.frame_id),
            WireMessage::SurfaceToCache(m) => Some(m.frame_id),
            WireMessage::CacheToSurface(m) => Some(m.frame_id),
            WireMessage::EvictCache(m) => Some(m.frame_id),
            WireMessage::Tile(m) => Some(m.frame_id),
            WireMessage::VideoFrame(m) => Some(m.frame_id),
            WireMessage::FrameAck(m) => Some(m.frame_id),
            _ => None,
        }
    }

    /// Serialize to a single transport message.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        Ok(match self {
            WireMessage::CreateSurface(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::DeleteSurface(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::MapSurfaceToOutput(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::StartFrame(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::EndFrame(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::SolidFill(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::SurfaceToSurface(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::SurfaceToCache(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::CacheToSurface(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::EvictCache(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::ResetGraphics(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::CapsConfirm(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::InitSettings(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::Tile(m) => m.encode()?,
            WireMessage::VideoFrame(m) => m.encode()?,
            WireMessage::Audio(m) => m.encode()?,
            WireMessage::DeltaFrame(m) => m.encode()?,
            WireMessage::FrameAck(m) => Bytes::copy_from_slice(&m.encode()),
            WireMessage::Backpressure(m) => Bytes::copy_from_slice(&m.encode()),
        })
    }

    /// Decode one message, selecting the layout by magic.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let kind = MessageType::try_from(leading_magic(data)?)?;
        Ok(match kind {
            MessageType::CreateSurface => WireMessage::CreateSurface(CreateSurface::decode(data)?),
            MessageType::DeleteSurface => WireMessage::DeleteSurface(DeleteSurface::decode(data)?),
            MessageType::MapSurfaceToOutput => {
                WireMessage::MapSurfaceToOutput(MapSurfaceToOutput::decode(data)?)
            }
            MessageType::StartFrame => WireMessage::StartFrame(StartFrame::decode(data)?),
            MessageType::EndFrame => WireMessage::EndFrame(EndFrame::decode(data)?),
            MessageType::SolidFill => WireMessage::SolidFill(SolidFill::decode(data)?),
            MessageType::SurfaceToSurface => {
                WireMessage::SurfaceToSurface(SurfaceToSurface::decode(data)?)
            }
            MessageType::SurfaceToCache => WireMessage::SurfaceToCache(SurfaceToCache::decode(data)?),
            MessageType::CacheToSurface => WireMessage::CacheToSurface(CacheToSurface::decode(data)?),
            MessageType::EvictCache => WireMessage::EvictCache(EvictCache::decode(data)?),
            MessageType::ResetGraphics => WireMessage::ResetGraphics(ResetGraphics::decode(data)?),
            MessageType::CapsConfirm => WireMessage::CapsConfirm(CapsConfirm::decode(data)?),
            MessageType::InitSettings => WireMessage::InitSettings(InitSettings::decode(data)?),
            MessageType::WebpTile
            | MessageType::ProgressiveTile
            | MessageType::ClearCodecTile
            | MessageType::RawTile => WireMessage::Tile(Tile::decode(data)?),
            MessageType::H264Frame => WireMessage::VideoFrame(VideoFrame::decode(data)?),
            MessageType::OpusAudio | MessageType::RawAudio => {
                WireMessage::Audio(AudioFrame::decode(data)?)
            }
            MessageType::DeltaFrame => WireMessage::DeltaFrame(DeltaFrame::decode(data)?),
            MessageType::FrameAck => WireMessage::FrameAck(FrameAck::decode(data)?),
            MessageType::Backpressure => WireMessage::Backpressure(Backpressure::decode(data)?),
        })
    }
}

fn leading_magic(data: &[u8]) -> Result<[u8; 4], WireError> {
    match data.get(..4) {
        Some(m) => Ok([m[0], m[1], m[2], m[3]]),
        None => Err(WireError::Truncated {
            message: "message",
            expected: 4,
            actual: data.len(),
        }),
    }
}
