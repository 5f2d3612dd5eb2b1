//! Verification state machine.
//!
//! Each session moves `Pending -> Awaiting -> {Verified | Rejected | TimedOut}`
//! (or `Unresolved` when verification is optional). Three writers race on a
//! session: the resend task, the deadline sweep and inbound attestations. All
//! of them decide under the session's entry lock, and the first one to reach
//! a terminal phase wins; the others observe it and do nothing.
//!
//! Side effects on the transport (request sends, disconnects) are issued
//! while the entry lock is held, which is why [`SessionTransport`] calls must
//! not block.

mod tasks;

use crate::config::{Policy, PolicyHandle};
use crate::decision::{self, Decision};
use crate::protocol;
use crate::session::{
    ExpiredSession, Phase, SessionEntry, SessionId, SessionRegistry, SessionSnapshot,
};
use crate::transport::SessionTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of one resend step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendStep {
    /// A request went out; run the next step after the given delay
    Sent { next: Duration },
    /// Attempt cap reached; the session waits passively for the sweep
    Exhausted,
    /// Session closed or resolved
    Stopped,
}

struct Inner<T: SessionTransport> {
    policy: PolicyHandle,
    registry: SessionRegistry,
    transport: Arc<T>,
}

/// Per-session verification driver
pub struct Verifier<T: SessionTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: SessionTransport> Clone for Verifier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: SessionTransport> Verifier<T> {
    pub fn new(policy: PolicyHandle, transport: Arc<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                registry: SessionRegistry::new(),
                transport,
            }),
        }
    }

    pub fn policy(&self) -> &PolicyHandle {
        &self.inner.policy
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    pub fn session(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.inner.registry.get(id)
    }

    /// Start verifying a newly opened session.
    ///
    /// The deadline is fixed from the policy current at open time. The first
    /// request is sent after `first_request_delay`. Must be called from
    /// within a Tokio runtime.
    pub fn on_session_open(&self, id: SessionId, name: impl Into<String>) -> Arc<SessionEntry> {
        let policy = self.inner.policy.snapshot();
        let deadline = Instant::now() + policy.timeout;
        let entry = self.inner.registry.open(id, name, deadline);

        let handle = tasks::spawn_resend_loop(self.clone(), entry.clone(), policy.first_request_delay);
        entry.attach_task(handle.abort_handle());

        debug!(
            session = %entry.id(),
            player = entry.name(),
            policy_version = policy.version,
            "Session opened, verification pending"
        );
        entry
    }

    /// Drop a session's state. Safe to call for unknown or closed sessions.
    pub fn on_session_close(&self, id: &SessionId) -> bool {
        let closed = self.inner.registry.close(id);
        if closed {
            debug!(session = %id, "Session closed");
        }
        closed
    }

    /// Handle a payload received on the verifier channel.
    ///
    /// Returns `None` when the payload is not an attestation, the session is
    /// unknown, or the session was already resolved.
    pub fn on_message(&self, id: &SessionId, payload: &[u8]) -> Option<Decision> {
        let report = protocol::decode(payload)?;

        let Some(entry) = self.inner.registry.entry(id) else {
            debug!(session = %id, "Attestation for unknown session ignored");
            return None;
        };

        let policy = self.inner.policy.snapshot();
        debug!(
            session = %id,
            player = entry.name(),
            mods = ?report.iter().collect::<Vec<_>>(),
            "Attestation received"
        );
        let decision = decision::evaluate(&report, &policy, entry.name());

        let resolved = match &decision {
            Decision::Accept => entry.mark_verified(),
            Decision::Reject { message, .. } => {
                entry.resolve(Phase::Rejected, |entry| self.disconnect(entry, message))
            }
        };
        if !resolved {
            debug!(session = %id, phase = ?entry.phase(), "Attestation after resolution ignored");
            return None;
        }

        let elapsed_ms = entry.opened_at().elapsed().as_millis() as u64;
        match &decision {
            Decision::Accept => {
                info!(session = %id, player = entry.name(), elapsed_ms, "Session verified");
            }
            Decision::Reject { matches, .. } => {
                self.inner.registry.remove_entry(&entry);
                info!(
                    session = %id,
                    player = entry.name(),
                    mods = %matches.join(", "),
                    elapsed_ms,
                    policy_version = policy.version,
                    "Session rejected for denylisted mods"
                );
            }
        }

        Some(decision)
    }

    /// One request step for `entry`.
    pub fn resend_step(&self, entry: &SessionEntry) -> ResendStep {
        let policy = self.inner.policy.snapshot();
        let mut state = entry.state();

        if state.phase.is_terminal() {
            return ResendStep::Stopped;
        }
        state.phase = Phase::Awaiting;
        if state.attempts >= policy.max_attempts {
            debug!(
                session = %entry.id(),
                attempts = state.attempts,
                "Request attempts exhausted, waiting for deadline"
            );
            return ResendStep::Exhausted;
        }

        state.attempts += 1;
        if let Err(e) = self.inner.transport.send(entry.id(), protocol::encode_request()) {
            warn!(session = %entry.id(), "Failed to send verification request: {}", e);
        }
        debug!(
            session = %entry.id(),
            attempt = state.attempts,
            max_attempts = policy.max_attempts,
            "Verification request sent"
        );

        ResendStep::Sent {
            next: policy.resend_interval,
        }
    }

    /// Resolve every session whose deadline passed before `now`.
    pub fn sweep(&self, now: Instant) -> Vec<ExpiredSession> {
        let policy = self.inner.policy.snapshot();
        self.inner
            .registry
            .sweep_expired(now, |entry| self.expire(entry, &policy))
    }

    fn expire(&self, entry: &SessionEntry, policy: &Policy) -> Phase {
        if policy.require_verification {
            warn!(
                session = %entry.id(),
                player = entry.name(),
                "No verifier response from {} (timed out)",
                entry.name()
            );
            self.disconnect(entry, &decision::timeout_message(policy, entry.name()));
            Phase::TimedOut
        } else {
            warn!(
                session = %entry.id(),
                player = entry.name(),
                "No verifier response from {}; verification optional, leaving connected",
                entry.name()
            );
            Phase::Unresolved
        }
    }

    fn disconnect(&self, entry: &SessionEntry, reason: &str) {
        if let Err(e) = self.inner.transport.disconnect(entry.id(), reason) {
            warn!(session = %entry.id(), "Failed to disconnect session: {}", e);
        }
    }

    /// Spawn the periodic deadline sweep.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        tasks::spawn_sweeper(self.clone())
    }

    /// Close every tracked session.
    pub fn close_all(&self) -> usize {
        self.inner
            .registry
            .ids()
            .iter()
            .filter(|id| self.inner.registry.close(id))
            .count()
    }
}
