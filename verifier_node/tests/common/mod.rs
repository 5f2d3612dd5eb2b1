// Shared helpers for verifier integration tests

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use verifier_node::config::VerifierConfig;
use verifier_node::error::Result;
use verifier_node::session::SessionId;
use verifier_node::transport::SessionTransport;

/// Something the verifier asked the host to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Request(SessionId),
    Kick(SessionId, String),
}

/// Transport that records every call with the time it was made
#[derive(Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<(Instant, Event)>>,
}

impl RecordingTransport {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn request_times(&self, id: &SessionId) -> Vec<Instant> {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| matches!(e, Event::Request(s) if s == id))
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn kicks(&self, id: &SessionId) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                Event::Kick(s, reason) if s == id => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SessionTransport for RecordingTransport {
    fn send(&self, session: &SessionId, _payload: Bytes) -> Result<()> {
        self.events
            .lock()
            .push((Instant::now(), Event::Request(session.clone())));
        Ok(())
    }

    fn disconnect(&self, session: &SessionId, reason: &str) -> Result<()> {
        self.events
            .lock()
            .push((Instant::now(), Event::Kick(session.clone(), reason.to_string())));
        Ok(())
    }
}

/// Configuration with fast timings and colour translation off
pub fn fast_config() -> VerifierConfig {
    let mut config = VerifierConfig::default();
    config.verification.first_request_delay_ms = 10;
    config.verification.resend_interval_ms = 30;
    config.verification.max_attempts = 3;
    config.verification.sweep_interval_ms = 20;
    config.denylist = vec!["freecam".to_string(), "autototem".to_string()];
    config.messages.translate_color_codes = false;
    config.messages.timeout = "timed out {player}".to_string();
    config.messages.denylisted_default = "remove {mods}{plural}".to_string();
    config
}

/// Layer counting events at `WARN`
#[derive(Clone, Default)]
pub struct WarnCounter {
    count: Arc<AtomicUsize>,
}

impl WarnCounter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}
