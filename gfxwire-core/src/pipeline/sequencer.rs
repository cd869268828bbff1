//! Frame-boundary enforcement between the translator and the transport.
//!
//! ```text
//!            StartFrame(n)
//!   Idle ─────────────────▶ FrameOpen(n) ──┐ other messages
//!    ▲                          │    ▲─────┘ (forwarded in order)
//!    └──────── EndFrame(n) ─────┘
//! ```
//!
//! After forwarding an `EndFrame` the sequencer stops draining until the
//! next poll cycle, so the receiver never sees frame `n + 1` begin before
//! frame `n` has been flushed. An `EndFrame` carrying the wrong id still
//! closes the open frame, with a warning. Other boundary events that do
//! not fit the state machine are logged and dropped.

use tracing::{debug, trace, warn};

use crate::error::WireError;
use crate::pipeline::translator::translate;
use crate::session::SessionHandle;
use crate::transport::TransportSink;
use crate::wire::WireMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencerState {
    #[default]
    Idle,
    FrameOpen(u32),
}

/// What the state machine decided for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Forward and keep draining.
    Forward,
    /// Forward; this closes the open frame, so stop draining afterwards.
    ForwardAndYield,
    /// Protocol violation from the engine; the message is discarded.
    Reject(&'static str),
}

/// Result of one [`FrameSequencer::drain_one_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainOutcome {
    /// Messages written to the transport during this call.
    pub sent: usize,
    /// The frame closed during this call, if any.
    pub completed_frame: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequencerStats {
    pub messages_sent: u64,
    pub frames_completed: u64,
    pub violations: u64,
    pub encode_failures: u64,
}

/// Per-connection sequencing state, owned by the frame loop.
#[derive(Debug, Default)]
pub struct FrameSequencer {
    state: SequencerState,
    last_started: Option<u32>,
    last_completed: Option<u32>,
    stats: SequencerStats,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn last_completed_frame(&self) -> Option<u32> {
        self.last_completed
    }

    pub fn stats(&self) -> SequencerStats {
        self.stats
    }

    /// Run `msg` through the state machine, updating state on acceptance.
    pub fn admit(&mut self, msg: &WireMessage) -> Admission {
        let admission = match (self.state, msg) {
            (SequencerState::Idle, WireMessage::StartFrame(start)) => {
                if let Some(prev) = self.last_started
                    && start.frame_id < prev
                {
                    warn!(frame_id = start.frame_id, previous = prev, "frame id went backwards");
                }
                self.state = SequencerState::FrameOpen(start.frame_id);
                self.last_started = Some(start.frame_id);
                Admission::Forward
            }
            (SequencerState::FrameOpen(_), WireMessage::StartFrame(_)) => {
                Admission::Reject("StartFrame while a frame is open")
            }
            (SequencerState::FrameOpen(open), WireMessage::EndFrame(end)) if end.frame_id == open => {
                self.state = SequencerState::Idle;
                self.last_completed = Some(open);
                Admission::ForwardAndYield
            }
            (SequencerState::FrameOpen(open), WireMessage::EndFrame(end)) => {
                // Any EndFrame closes the open frame.
                self.stats.violations += 1;
                warn!(frame_id = end.frame_id, open, "EndFrame does not match the open frame; closing it");
                self.state = SequencerState::Idle;
                self.last_completed = Some(end.frame_id);
                Admission::ForwardAndYield
            }
            (SequencerState::Idle, WireMessage::EndFrame(_)) => {
                Admission::Reject("EndFrame with no open frame")
            }
            _ => Admission::Forward,
        };
        if let Admission::Reject(reason) = admission {
            self.stats.violations += 1;
            warn!(
                message = %msg.message_type(),
                frame_id = ?msg.frame_id(),
                state = ?self.state,
                reason,
                "dropping out-of-sequence message"
            );
        }
        admission
    }

    /// Drain translated events into `sink` until a frame closes or the
    /// session has nothing more queued.
    ///
    /// Only transport failures are returned as errors; everything else
    /// is logged and skipped.
    pub async fn drain_one_frame(
        &mut self,
        session: &dyn SessionHandle,
        sink: &dyn TransportSink,
    ) -> Result<DrainOutcome, WireError> {
        let mut outcome = DrainOutcome::default();

        while session.has_events() {
            let Some(event) = session.next_event() else {
                break;
            };
            let Some(msg) = translate(event) else {
                continue;
            };

            let admission = self.admit(&msg);
            if let Admission::Reject(_) = admission {
                continue;
            }

            let bytes = match msg.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.stats.encode_failures += 1;
                    warn!(message = %msg.message_type(), error = %e, "dropping unencodable message");
                    continue;
                }
            };
            sink.send_binary(bytes).await?;
            outcome.sent += 1;
            self.stats.messages_sent += 1;
            trace!(message = %msg.message_type(), "forwarded");

            if admission == Admission::ForwardAndYield {
                self.stats.frames_completed += 1;
                outcome.completed_frame = self.last_completed;
                debug!(frame_id = ?self.last_completed, sent = outcome.sent, "frame flushed");
                break;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Event, MemorySession, Rect};
    use crate::transport::{ChannelSink, Frame};
    use crate::wire::{EndFrame, StartFrame};

    fn fill(frame_id: u32) -> Event {
        Event::SolidFill {
            frame_id,
            surface_id: 1,
            rect: Rect::new(0, 0, 8, 8),
            color: 0xFF00_00FF,
        }
    }

    fn magics(rx: &mut tokio::sync::mpsc::Receiver<Frame>) -> Vec<[u8; 4]> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Binary(b) = frame {
                out.push([b[0], b[1], b[2], b[3]]);
            }
        }
        out
    }

    #[tokio::test]
    async fn stops_after_end_frame() {
        let session = MemorySession::new();
        session.push_events([
            Event::StartFrame { frame_id: 1 },
            fill(1),
            Event::EndFrame { frame_id: 1 },
            Event::StartFrame { frame_id: 2 },
            fill(2),
            Event::EndFrame { frame_id: 2 },
        ]);
        let (sink, mut rx) = ChannelSink::pair(64);
        let mut seq = FrameSequencer::new();

        let first = seq.drain_one_frame(&session, &sink).await.unwrap();
        assert_eq!(first.sent, 3);
        assert_eq!(first.completed_frame, Some(1));
        assert_eq!(session.pending_events(), 3);
        assert_eq!(magics(&mut rx), [*b"STFR", *b"SFIL", *b"ENFR"]);

        let second = seq.drain_one_frame(&session, &sink).await.unwrap();
        assert_eq!(second.completed_frame, Some(2));
        assert_eq!(seq.state(), SequencerState::Idle);
        assert_eq!(seq.stats().frames_completed, 2);
    }

    #[tokio::test]
    async fn partial_frame_spans_cycles() {
        let session = MemorySession::new();
        session.push_events([Event::StartFrame { frame_id: 4 }, fill(4)]);
        let (sink, _rx) = ChannelSink::pair(64);
        let mut seq = FrameSequencer::new();

        let outcome = seq.drain_one_frame(&session, &sink).await.unwrap();
        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.completed_frame, None);
        assert_eq!(seq.state(), SequencerState::FrameOpen(4));

        session.push_event(Event::EndFrame { frame_id: 4 });
        let outcome = seq.drain_one_frame(&session, &sink).await.unwrap();
        assert_eq!(outcome.completed_frame, Some(4));
    }

    #[tokio::test]
    async fn boundary_violations_are_dropped() {
        let session = MemorySession::new();
        session.push_events([
            Event::EndFrame { frame_id: 9 },
            Event::StartFrame { frame_id: 10 },
            Event::StartFrame { frame_id: 11 },
            Event::EndFrame { frame_id: 11 },
            Event::EndFrame { frame_id: 10 },
        ]);
        let (sink, mut rx) = ChannelSink::pair(64);
        let mut seq = FrameSequencer::new();

        let outcome = seq.drain_one_frame(&session, &sink).await.unwrap();
        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.completed_frame, Some(11));
        assert_eq!(seq.stats().violations, 3);
        assert_eq!(magics(&mut rx), [*b"STFR", *b"ENFR"]);

        // The trailing EndFrame(10) arrives with nothing open.
        let outcome = seq.drain_one_frame(&session, &sink).await.unwrap();
        assert_eq!(outcome.sent, 0);
        assert_eq!(seq.stats().violations, 4);
    }

    #[tokio::test]
    async fn mismatched_end_frame_resynchronises() {
        let session = MemorySession::new();
        session.push_events([
            Event::StartFrame { frame_id: 1 },
            Event::EndFrame { frame_id: 2 },
            Event::StartFrame { frame_id: 3 },
            fill(3),
            Event::EndFrame { frame_id: 3 },
            Event::StartFrame { frame_id: 4 },
            Event::EndFrame { frame_id: 4 },
        ]);
        let (sink, mut rx) = ChannelSink::pair(64);
        let mut seq = FrameSequencer::new();

        let mut completed = Vec::new();
        for _ in 0..3 {
            let outcome = seq.drain_one_frame(&session, &sink).await.unwrap();
            completed.extend(outcome.completed_frame);
        }
        assert_eq!(completed, [2, 3, 4]);
        assert_eq!(seq.state(), SequencerState::Idle);
        assert_eq!(seq.stats().violations, 1);
        assert_eq!(
            magics(&mut rx),
            [*b"STFR", *b"ENFR", *b"STFR", *b"SFIL", *b"ENFR", *b"STFR", *b"ENFR"]
        );
    }

    #[tokio::test]
    async fn surface_commands_flow_outside_frames() {
        let session = MemorySession::new();
        session.push_events([
            Event::ResetGraphics {
                width: 1024,
                height: 768,
            },
            Event::CreateSurface {
                surface_id: 1,
                width: 1024,
                height: 768,
                pixel_format: 0x20,
            },
        ]);
        let (sink, mut rx) = ChannelSink::pair(64);
        let mut seq = FrameSequencer::new();
        let outcome = seq.drain_one_frame(&session, &sink).await.unwrap();
        assert_eq!(outcome.sent, 2);
        assert_eq!(magics(&mut rx), [*b"RSGR", *b"SURF"]);
    }

    #[tokio::test]
    async fn closed_transport_is_an_error() {
        let session = MemorySession::new();
        session.push_event(Event::StartFrame { frame_id: 1 });
        let (sink, rx) = ChannelSink::pair(1);
        drop(rx);
        let mut seq = FrameSequencer::new();
        let err = seq.drain_one_frame(&session, &sink).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn backwards_frame_ids_are_still_forwarded() {
        let mut seq = FrameSequencer::new();
        let start = |frame_id| WireMessage::StartFrame(StartFrame { frame_id });
        let end = |frame_id| WireMessage::EndFrame(EndFrame { frame_id });
        assert_eq!(seq.admit(&start(7)), Admission::Forward);
        assert_eq!(seq.admit(&end(7)), Admission::ForwardAndYield);
        assert_eq!(seq.admit(&start(3)), Admission::Forward);
        assert_eq!(seq.state(), SequencerState::FrameOpen(3));
        assert_eq!(seq.last_completed_frame(), Some(7));
    }
}
