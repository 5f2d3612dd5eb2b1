// Session registry
//
// Concurrent map from session id to the live verification entry. Entries are
// reference counted; anything that outlives a single call (the resend task,
// an in-flight sweep) holds the `Arc<SessionEntry>` it started with and
// removes it only by pointer identity, so a quickly re-opened session is never
// touched by work scheduled for its predecessor.
//
// Lock order: a DashMap shard lock is never held while taking an entry lock.

use super::{Phase, SessionId, SessionState};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// One live session
#[derive(Debug)]
pub struct SessionEntry {
    id: SessionId,
    name: String,
    opened_at: Instant,
    state: Mutex<SessionState>,
    task: Mutex<Option<AbortHandle>>,
}

/// Point-in-time copy of a session's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub name: String,
    pub phase: Phase,
    pub deadline: Option<Instant>,
    pub attempts: u32,
    pub verified: bool,
}

/// A session removed by the deadline sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSession {
    pub id: SessionId,
    pub name: String,
    pub phase: Phase,
}

impl SessionEntry {
    fn new(id: SessionId, name: String, deadline: Instant) -> Self {
        Self {
            id,
            name,
            opened_at: Instant::now(),
            state: Mutex::new(SessionState::new(deadline)),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Lock the verification state.
    pub fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            phase: state.phase,
            deadline: state.deadline,
            attempts: state.attempts,
            verified: state.verified(),
        }
    }

    /// Attach the session's scheduled task. If the session already reached a
    /// terminal phase the task is aborted on the spot.
    pub fn attach_task(&self, handle: AbortHandle) {
        let state = self.state.lock();
        if state.phase.is_terminal() {
            handle.abort();
            return;
        }
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Move a live session to the terminal `phase`, running `effect` under
    /// the entry lock first. Returns false if the session was already
    /// resolved, in which case `effect` does not run.
    ///
    /// `effect` must not lock the entry.
    pub fn resolve<F>(&self, phase: Phase, effect: F) -> bool
    where
        F: FnOnce(&SessionEntry),
    {
        {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return false;
            }
            effect(self);
            state.phase = phase;
            state.deadline = None;
            state.attempts = 0;
        }
        self.cancel_task();
        true
    }

    /// Record a successful verification: deadline and attempts are cleared
    /// and the resend task stops.
    pub fn mark_verified(&self) -> bool {
        self.resolve(Phase::Verified, |_| {})
    }

    /// Abort the scheduled task, if any.
    pub fn cancel_task(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// Force the entry into `phase` and drop its scheduled task.
    fn finish(&self, phase: Phase) {
        {
            let mut state = self.state.lock();
            state.phase = phase;
            state.deadline = None;
        }
        self.cancel_task();
    }
}

/// Concurrent registry of live sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for a newly opened session.
    ///
    /// An existing entry under the same id is closed first.
    pub fn open(&self, id: SessionId, name: impl Into<String>, deadline: Instant) -> Arc<SessionEntry> {
        let entry = Arc::new(SessionEntry::new(id.clone(), name.into(), deadline));
        if let Some(previous) = self.sessions.insert(id, entry.clone()) {
            debug!(session = %previous.id, "Replacing stale session entry");
            previous.finish(Phase::Closed);
        }
        entry
    }

    /// Remove a session regardless of phase. Returns false if nothing was
    /// registered under `id`.
    pub fn close(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, entry)) => {
                entry.finish(Phase::Closed);
                true
            }
            None => false,
        }
    }

    /// Remove `entry` only if it is still the one registered under its id.
    pub fn remove_entry(&self, entry: &Arc<SessionEntry>) -> bool {
        self.sessions
            .remove_if(&entry.id, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    /// Live entry for `id`
    pub fn entry(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.entry(id).map(|entry| entry.snapshot())
    }

    /// Mark the session under `id` verified. Returns false if the session is
    /// unknown or already resolved.
    pub fn mark_verified(&self, id: &SessionId) -> bool {
        self.entry(id).map_or(false, |entry| entry.mark_verified())
    }

    /// Remove every unresolved session whose deadline is at or before `now`.
    ///
    /// `on_expired` runs under the entry lock once expiry is confirmed and
    /// returns the terminal phase to record; it must not lock the entry.
    pub fn sweep_expired<F>(&self, now: Instant, mut on_expired: F) -> Vec<ExpiredSession>
    where
        F: FnMut(&SessionEntry) -> Phase,
    {
        let candidates: Vec<Arc<SessionEntry>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();

        let mut expired = Vec::new();
        for entry in candidates {
            let phase = {
                let mut state = entry.state();
                if !state.is_expired(now) {
                    continue;
                }
                let phase = on_expired(&entry);
                state.phase = phase;
                state.deadline = None;
                phase
            };
            entry.cancel_task();
            self.remove_entry(&entry);
            expired.push(ExpiredSession {
                id: entry.id.clone(),
                name: entry.name.clone(),
                phase,
            });
        }
        expired
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
