//! Length-prefixed framing of [`Frame`]s over a byte stream.
//!
//! ```text
//! kind:    u8   0 = binary, 1 = text, 2 = close
//! length:  u32  little-endian payload length
//! payload: [u8] (length bytes; UTF-8 for text and close)
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;
use crate::transport::Frame;

/// Size of the kind + length prefix.
pub const FRAME_HEADER_LEN: usize = 5;

/// Default cap on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const KIND_BINARY: u8 = 0;
const KIND_TEXT: u8 = 1;
const KIND_CLOSE: u8 = 2;

/// `tokio_util` codec for [`Frame`]s.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Limits above `u32::MAX` are clamped; the length prefix is 32-bit.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let kind = src[0];
        let len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        if !matches!(kind, KIND_BINARY | KIND_TEXT | KIND_CLOSE) {
            return Err(TransportError::UnknownFrameKind(kind));
        }

        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len);
        let frame = match kind {
            KIND_BINARY => Frame::Binary(payload.freeze()),
            KIND_TEXT => Frame::Text(utf8(payload)?),
            _ => Frame::Close(utf8(payload)?),
        };
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (kind, payload): (u8, &[u8]) = match &item {
            Frame::Binary(data) => (KIND_BINARY, &data[..]),
            Frame::Text(text) => (KIND_TEXT, text.as_bytes()),
            Frame::Close(reason) => (KIND_CLOSE, reason.as_bytes()),
        };
        if payload.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_u8(kind);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }
}

fn utf8(payload: BytesMut) -> Result<String, TransportError> {
    String::from_utf8(payload.to_vec()).map_err(|_| TransportError::InvalidUtf8)
}
