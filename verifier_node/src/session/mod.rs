//! Session tracking for the verifier node.
//!
//! A session is one connected client from open to close. The registry owns
//! every live session's verification state; scheduled work and inbound
//! messages only ever touch a session through the [`SessionEntry`] they were
//! handed.

pub mod registry;

pub use registry::{ExpiredSession, SessionEntry, SessionRegistry, SessionSnapshot};

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Host-assigned session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier, `S-{uuid}`
    pub fn generate() -> Self {
        Self(format!("S-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Verification phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Opened, no request sent yet
    Pending,
    /// At least one request sent, waiting for the report
    Awaiting,
    /// Report accepted
    Verified,
    /// Report contained denylisted mods; session disconnected
    Rejected,
    /// Deadline passed with verification required; session disconnected
    TimedOut,
    /// Deadline passed with verification optional; session left connected
    Unresolved,
    /// Host closed the session
    Closed,
}

impl Phase {
    /// Phases no transition leaves.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Phase::Pending | Phase::Awaiting)
    }
}

/// Mutable per-session verification state.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: Phase,
    pub deadline: Option<Instant>,
    pub attempts: u32,
}

impl SessionState {
    pub fn new(deadline: Instant) -> Self {
        Self {
            phase: Phase::Pending,
            deadline: Some(deadline),
            attempts: 0,
        }
    }

    pub fn verified(&self) -> bool {
        self.phase == Phase::Verified
    }

    /// True if the deadline has elapsed and nothing resolved the session.
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.phase.is_terminal() && self.deadline.map_or(false, |deadline| now >= deadline)
    }
}
