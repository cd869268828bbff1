//! The event-to-wire pipeline.
//!
//! ```text
//!                 ┌────────────┐   ┌───────────┐
//! SessionHandle ─▶│ translator │──▶│ sequencer │──┐
//!   (events)      └────────────┘   └───────────┘  │
//!                                                 ├─▶ TransportSink
//!   (audio)  ─────────▶ audio multiplexer ────────┘
//!
//! TransportSink ─▶ flow controller ─▶ SessionHandle (frame acks)
//! ```
//!
//! [`StreamingSupervisor`] owns the loops for one connection.

pub mod audio;
pub mod flow;
pub mod sequencer;
pub mod supervisor;
pub mod translator;

pub use audio::{AudioConfig, AudioMultiplexer, AudioStats, IdleBackoff, Pump, StallDetector};
pub use flow::{FlowController, FlowSignal, FlowStats};
pub use sequencer::{Admission, DrainOutcome, FrameSequencer, SequencerState, SequencerStats};
pub use supervisor::{DEFAULT_DISCONNECT_REASON, StreamConfig, StreamingSupervisor};
pub use translator::{CACHE_SLOT_HINT, translate, try_translate};
