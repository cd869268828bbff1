//! # gfxwire-server — Browser Bridge Service
//!
//! Listens for browser-side connections, speaks the JSON control
//! channel, and streams remote sessions through the `gfxwire-core`
//! pipeline.
//!
//! Before a session is opened the destination is checked against the
//! [`security`] allowlist and a slot is claimed in the bounded
//! [`registry`]. The session engine itself is supplied by the embedder
//! through [`service::SessionConnector`].

pub mod config;
pub mod error;
pub mod registry;
pub mod security;
pub mod service;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use registry::{MaxSessions, SessionRegistry};
pub use security::SecurityPolicy;
pub use service::{BridgeServer, SessionConnector, UnavailableConnector};
