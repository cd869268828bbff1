//! # gfxwire-core
//!
//! Streams a remote-desktop session's graphics and audio to a browser
//! over one ordered, message-framed channel.
//!
//! This crate contains:
//! - **Wire codec**: fixed little-endian message families keyed by a
//!   4-byte magic (`WireMessage`, `MessageType`, `get_message_type`)
//! - **Session interface**: `SessionHandle`, the engine's `Event`s and
//!   RAII-released `ExternalBuffer`s, plus a scriptable `MemorySession`
//! - **Pipeline**: event translator, `FrameSequencer`, `AudioMultiplexer`,
//!   `FlowController`, and the per-connection `StreamingSupervisor`
//! - **Control**: JSON messages for the text channel
//! - **Transport**: the `TransportSink` trait, `FrameCodec` for framed
//!   TCP via `tokio_util`, and `TcpTransport`
//! - **Error**: `WireError`, `SessionError`, `TransportError`

pub mod codec;
pub mod control;
pub mod error;
pub mod flags;
pub mod network;
pub mod pipeline;
pub mod session;
pub mod transport;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::FrameCodec;
pub use control::{ClientMessage, ConnectRequest, ServerMessage};
pub use error::{SessionError, TransportError, WireError};
pub use flags::InitFlags;
pub use network::TcpTransport;
pub use pipeline::{
    AudioConfig, FlowController, FlowSignal, FrameSequencer, StreamConfig, StreamingSupervisor,
    translate,
};
pub use session::{
    AudioFormat, CodecId, Event, ExternalBuffer, MemorySession, Rect, SessionHandle,
};
pub use transport::{ChannelSink, Frame, TransportSink, truncate_reason};
pub use wire::{FrameAck, MessageType, QueueDepth, WireMessage, get_message_type};
