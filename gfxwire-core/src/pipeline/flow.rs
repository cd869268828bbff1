//! Inbound binary messages from the receiver: frame acknowledgments and
//! backpressure.
//!
//! Nothing the receiver sends on the binary channel can end the
//! connection. Malformed messages are logged and dropped, and each
//! unexpected magic is logged once per connection.

use std::collections::HashSet;

use tracing::{debug, trace, warn};

use crate::error::WireError;
use crate::session::SessionHandle;
use crate::wire::{Backpressure, FrameAck, MessageType, QueueDepth, get_message_type};

/// Outcome of [`FlowController::handle_inbound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSignal {
    /// A valid acknowledgment; `forwarded` says whether it reached the
    /// session.
    Ack { ack: FrameAck, forwarded: bool },
    /// A standalone backpressure report.
    Backpressure(QueueDepth),
    /// Malformed, unknown, or not a receiver-originated family.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowStats {
    pub acks: u64,
    pub acks_forwarded: u64,
    pub backpressure: u64,
    pub discarded: u64,
}

#[derive(Debug)]
pub struct FlowController {
    forward_acks: bool,
    depth: QueueDepth,
    last_ack: Option<FrameAck>,
    logged: HashSet<[u8; 4]>,
    stats: FlowStats,
}

impl FlowController {
    /// `forward_acks` controls whether acknowledgments are passed on to
    /// the session as a rate-control hint. They are parsed either way.
    pub fn new(forward_acks: bool) -> Self {
        Self {
            forward_acks,
            depth: QueueDepth::Unavailable,
            last_ack: None,
            logged: HashSet::new(),
            stats: FlowStats::default(),
        }
    }

    /// Most recent queue depth from either family.
    pub fn queue_depth(&self) -> QueueDepth {
        self.depth
    }

    pub fn is_suspended(&self) -> bool {
        self.depth == QueueDepth::Suspend
    }

    pub fn last_ack(&self) -> Option<FrameAck> {
        self.last_ack
    }

    pub fn stats(&self) -> FlowStats {
        self.stats
    }

    pub fn handle_inbound(&mut self, data: &[u8], session: &dyn SessionHandle) -> FlowSignal {
        match get_message_type(data) {
            Some(MessageType::FrameAck) => match FrameAck::decode(data) {
                Ok(ack) => self.on_ack(ack, session),
                Err(e) => self.discard(&e),
            },
            Some(MessageType::Backpressure) => match Backpressure::decode(data) {
                Ok(bp) => {
                    self.stats.backpressure += 1;
                    self.set_depth(bp.depth());
                    debug!(queue_depth = ?bp.depth(), "backpressure");
                    FlowSignal::Backpressure(bp.depth())
                }
                Err(e) => self.discard(&e),
            },
            other => {
                let magic = leading(data);
                if self.logged.insert(magic) {
                    match other {
                        Some(kind) => warn!(message = %kind, "ignoring outbound-only message from receiver"),
                        None => warn!(magic = ?magic, len = data.len(), "ignoring unknown inbound message"),
                    }
                }
                self.stats.discarded += 1;
                FlowSignal::Ignored
            }
        }
    }

    fn on_ack(&mut self, ack: FrameAck, session: &dyn SessionHandle) -> FlowSignal {
        self.stats.acks += 1;
        self.last_ack = Some(ack);
        self.set_depth(ack.depth());
        trace!(
            frame_id = ack.frame_id,
            decoded = ack.total_frames_decoded,
            queue_depth = ?ack.depth(),
            "frame ack"
        );

        let mut forwarded = false;
        if self.forward_acks {
            match session.send_frame_ack(&ack) {
                Ok(()) => {
                    forwarded = true;
                    self.stats.acks_forwarded += 1;
                }
                Err(e) => warn!(frame_id = ack.frame_id, error = %e, "session rejected frame ack"),
            }
        }
        FlowSignal::Ack { ack, forwarded }
    }

    fn set_depth(&mut self, depth: QueueDepth) {
        if depth != self.depth && (depth == QueueDepth::Suspend || self.depth == QueueDepth::Suspend) {
            debug!(from = ?self.depth, to = ?depth, "receiver suspend state changed");
        }
        self.depth = depth;
    }

    fn discard(&mut self, e: &WireError) -> FlowSignal {
        self.stats.discarded += 1;
        warn!(error = %e, "discarding malformed inbound message");
        FlowSignal::Ignored
    }
}

/// First four bytes, zero-padded.
fn leading(data: &[u8]) -> [u8; 4] {
    let mut magic = [0u8; 4];
    let n = data.len().min(4);
    magic[..n].copy_from_slice(&data[..n]);
    magic
}
