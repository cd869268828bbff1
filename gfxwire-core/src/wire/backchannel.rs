//! Messages the browser sends back: frame acknowledgments and
//! backpressure.
//!
//! ```text
//! FACK  frame_id:u32 total_frames_decoded:u32 queue_depth:u32   (16)
//! BPRS  queue_depth:u32                                          (8)
//! ```

use bytes::{Buf, BufMut};

use super::{MessageType, fixed};
use crate::error::WireError;

/// Receiver decode-queue depth as reported on the wire.
///
/// `0` means the receiver does not report a depth and `0xFFFFFFFF`
/// asks the sender to suspend. Any other value is a plain depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueDepth {
    Unavailable,
    Suspend,
    Depth(u32),
}

impl QueueDepth {
    pub const UNAVAILABLE: u32 = 0;
    pub const SUSPEND: u32 = u32::MAX;

    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            Self::UNAVAILABLE => QueueDepth::Unavailable,
            Self::SUSPEND => QueueDepth::Suspend,
            n => QueueDepth::Depth(n),
        }
    }

    pub const fn raw(self) -> u32 {
        match self {
            QueueDepth::Unavailable => Self::UNAVAILABLE,
            QueueDepth::Suspend => Self::SUSPEND,
            QueueDepth::Depth(n) => n,
        }
    }
}

/// `FACK`: the receiver finished decoding `frame_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAck {
    pub frame_id: u32,
    pub total_frames_decoded: u32,
    pub queue_depth: u32,
}

impl FrameAck {
    pub const SIZE: usize = 16;

    pub fn depth(&self) -> QueueDepth {
        QueueDepth::from_raw(self.queue_depth)
    }

    /// The receiver asked the sender to stop until the next ack.
    pub fn is_suspend(&self) -> bool {
        self.depth() == QueueDepth::Suspend
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::FrameAck.magic());
        w.put_u32_le(self.frame_id);
        w.put_u32_le(self.total_frames_decoded);
        w.put_u32_le(self.queue_depth);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::FrameAck, Self::SIZE)?;
        Ok(Self {
            frame_id: r.get_u32_le(),
            total_frames_decoded: r.get_u32_le(),
            queue_depth: r.get_u32_le(),
        })
    }
}

/// `BPRS`: standalone queue-depth report from older receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backpressure {
    pub queue_depth: u32,
}

impl Backpressure {
    pub const SIZE: usize = 8;

    pub fn depth(&self) -> QueueDepth {
        QueueDepth::from_raw(self.queue_depth)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut w = &mut buf[..];
        w.put_slice(&MessageType::Backpressure.magic());
        w.put_u32_le(self.queue_depth);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = fixed(data, MessageType::Backpressure, Self::SIZE)?;
        Ok(Self {
            queue_depth: r.get_u32_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspend_ack_parses() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"FACK");
        raw.extend_from_slice(&7u32.to_le_bytes());
        raw.extend_from_slice(&3u32.to_le_bytes());
        raw.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let ack = FrameAck::decode(&raw).unwrap();
        assert_eq!(
            ack,
            FrameAck {
                frame_id: 7,
                total_frames_decoded: 3,
                queue_depth: 0xFFFF_FFFF,
            }
        );
        assert!(ack.is_suspend());
        assert_eq!(ack.encode().as_slice(), raw.as_slice());
    }

    #[test]
    fn queue_depth_convention() {
        assert_eq!(QueueDepth::from_raw(0), QueueDepth::Unavailable);
        assert_eq!(QueueDepth::from_raw(u32::MAX), QueueDepth::Suspend);
        assert_eq!(QueueDepth::from_raw(12), QueueDepth::Depth(12));
        assert_eq!(QueueDepth::Depth(12).raw(), 12);
    }

    #[test]
    fn short_ack_is_rejected() {
        let ack = FrameAck {
            frame_id: 1,
            total_frames_decoded: 1,
            queue_depth: 0,
        }
        .encode();
        assert!(matches!(
            FrameAck::decode(&ack[..8]),
            Err(WireError::Truncated { expected: 16, actual: 8, .. })
        ));
    }

    #[test]
    fn backpressure_roundtrip() {
        let msg = Backpressure { queue_depth: 30 };
        let decoded = Backpressure::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.depth(), QueueDepth::Depth(30));
    }
}
