//! Bounded registry of live remote sessions.
//!
//! The registry is built once, with a validated capacity, and shared by
//! every connection. Registering returns a [`SessionPermit`]; dropping
//! the permit frees the slot, so a session can never be leaked by an
//! early return or a panicking connection task.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

// ── MaxSessions ──────────────────────────────────────────────────

/// Concurrent-session limit, always within `MIN..=MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaxSessions(usize);

impl MaxSessions {
    pub const DEFAULT: usize = 100;
    pub const MIN: usize = 2;
    pub const MAX: usize = 1000;

    /// Clamp `limit` into range, warning when it had to move.
    pub fn new(limit: i64) -> Self {
        let clamped = limit.clamp(Self::MIN as i64, Self::MAX as i64) as usize;
        if clamped as i64 != limit {
            warn!(requested = limit, using = clamped, "max_sessions out of range");
        }
        Self(clamped)
    }

    /// Parse a user-supplied value; anything but an integer yields the
    /// default.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(limit) => Self::new(limit),
            Err(_) => {
                warn!(value = raw, default = Self::DEFAULT, "max_sessions is not an integer");
                Self::default()
            }
        }
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for MaxSessions {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl fmt::Display for MaxSessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for MaxSessions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0 as u64)
    }
}

// Never rejects: bad values fall back instead of failing the whole file.
impl<'de> Deserialize<'de> for MaxSessions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
            Other(serde::de::IgnoredAny),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(limit) => MaxSessions::new(limit),
            Raw::Text(text) => MaxSessions::parse(&text),
            Raw::Other(_) => {
                warn!(default = Self::DEFAULT, "max_sessions is not an integer");
                MaxSessions::default()
            }
        })
    }
}

// ── SessionRegistry ──────────────────────────────────────────────

/// What the registry knows about one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub peer: SocketAddr,
    pub destination: String,
    pub started: Instant,
}

#[derive(Debug)]
pub struct SessionRegistry {
    capacity: MaxSessions,
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(capacity: MaxSessions) -> Arc<Self> {
        info!(max_sessions = capacity.get(), "session registry initialised");
        Arc::new(Self {
            capacity,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Claim a slot, or fail with [`BridgeError::CapacityExceeded`].
    pub fn try_register(
        self: &Arc<Self>,
        peer: SocketAddr,
        destination: impl Into<String>,
    ) -> Result<SessionPermit, BridgeError> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.capacity.get() {
            return Err(BridgeError::CapacityExceeded {
                max: self.capacity.get(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = SessionEntry {
            peer,
            destination: destination.into(),
            started: Instant::now(),
        };
        debug!(id, %peer, destination = %entry.destination, "session registered");
        sessions.insert(id, entry);
        Ok(SessionPermit {
            id,
            registry: Arc::clone(self),
        })
    }

    /// Entries sorted by id.
    pub fn snapshot(&self) -> Vec<(u64, SessionEntry)> {
        let mut entries: Vec<_> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    fn release(&self, id: u64) {
        if let Some(entry) = self.sessions.lock().remove(&id) {
            debug!(
                id,
                destination = %entry.destination,
                lasted = ?entry.started.elapsed(),
                "session released"
            );
        }
    }
}

/// A claimed registry slot; freed on drop.
#[derive(Debug)]
pub struct SessionPermit {
    id: u64,
    registry: Arc<SessionRegistry>,
}

impl SessionPermit {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(MaxSessions::new(1).get(), 2);
        assert_eq!(MaxSessions::new(-5).get(), 2);
        assert_eq!(MaxSessions::new(50).get(), 50);
        assert_eq!(MaxSessions::new(5000).get(), 1000);
        assert_eq!(MaxSessions::parse(" 12 ").get(), 12);
        assert_eq!(MaxSessions::parse("lots").get(), 100);
        assert_eq!(MaxSessions::parse("").get(), 100);
    }

    #[test]
    fn deserialize_never_fails() {
        #[derive(Deserialize)]
        struct Wrapper {
            max_sessions: MaxSessions,
        }
        let parse = |text: &str| toml::from_str::<Wrapper>(text).unwrap().max_sessions.get();
        assert_eq!(parse("max_sessions = 10"), 10);
        assert_eq!(parse("max_sessions = 100000"), 1000);
        assert_eq!(parse("max_sessions = \"25\""), 25);
        assert_eq!(parse("max_sessions = \"many\""), 100);
        assert_eq!(parse("max_sessions = 2.5"), 100);
        assert_eq!(parse("max_sessions = true"), 100);
    }

    #[test]
    fn capacity_is_enforced_and_permits_free_slots() {
        let registry = SessionRegistry::new(MaxSessions::new(2));
        let a = registry.try_register(peer(), "a:3389").unwrap();
        let b = registry.try_register(peer(), "b:3389").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.active(), 2);

        let err = registry.try_register(peer(), "c:3389").unwrap_err();
        assert!(matches!(err, BridgeError::CapacityExceeded { max: 2 }));

        drop(a);
        assert_eq!(registry.active(), 1);
        let c = registry.try_register(peer(), "c:3389").unwrap();
        let destinations: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|(_, e)| e.destination)
            .collect();
        assert_eq!(destinations, ["b:3389", "c:3389"]);
        drop((b, c));
        assert_eq!(registry.active(), 0);
    }
}
