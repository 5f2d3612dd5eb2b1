//! Host transport seam.
//!
//! The verifier never talks to sockets directly. It hands payloads and
//! disconnect requests to a [`SessionTransport`], which the hosting runtime
//! implements. Calls are made while a session's state lock is held, so
//! implementations must not block: queue the work and return.

use crate::error::{Result, VerifierError};
use crate::session::SessionId;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Outbound byte channel and disconnect primitive scoped to a session.
pub trait SessionTransport: Send + Sync + 'static {
    /// Queue `payload` for delivery on the session's verifier channel.
    fn send(&self, session: &SessionId, payload: Bytes) -> Result<()>;

    /// Queue a disconnect of the session with `reason` shown to the user.
    fn disconnect(&self, session: &SessionId, reason: &str) -> Result<()>;
}

/// Work queued for one session's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Payload(Bytes),
    Disconnect(String),
}

/// Transport backed by one unbounded channel per session.
///
/// The connection task owning the receiving half drains it onto the wire.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    outbound: DashMap<SessionId, mpsc::UnboundedSender<Outbound>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the receiver its connection drains.
    pub fn register(&self, session: SessionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound.insert(session, tx);
        rx
    }

    pub fn unregister(&self, session: &SessionId) {
        self.outbound.remove(session);
    }

    fn push(&self, session: &SessionId, item: Outbound) -> Result<()> {
        let sender = self
            .outbound
            .get(session)
            .map(|tx| tx.value().clone())
            .ok_or_else(|| VerifierError::UnknownSession(session.to_string()))?;
        sender
            .send(item)
            .map_err(|_| VerifierError::Transport(format!("connection for {} is gone", session)))
    }
}

impl SessionTransport for ChannelTransport {
    fn send(&self, session: &SessionId, payload: Bytes) -> Result<()> {
        self.push(session, Outbound::Payload(payload))
    }

    fn disconnect(&self, session: &SessionId, reason: &str) -> Result<()> {
        self.push(session, Outbound::Disconnect(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_to_registered_session() {
        let transport = ChannelTransport::new();
        let id = SessionId::new("a");
        let mut rx = transport.register(id.clone());

        transport.send(&id, Bytes::from_static(b"REQ")).unwrap();
        transport.disconnect(&id, "bye").unwrap();

        assert_eq!(rx.try_recv().unwrap(), Outbound::Payload(Bytes::from_static(b"REQ")));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Disconnect("bye".to_string()));
    }

    #[test]
    fn unknown_or_dropped_sessions_error() {
        let transport = ChannelTransport::new();
        let id = SessionId::new("a");
        assert!(matches!(
            transport.send(&id, Bytes::new()),
            Err(VerifierError::UnknownSession(_))
        ));

        let rx = transport.register(id.clone());
        drop(rx);
        assert!(matches!(
            transport.disconnect(&id, "bye"),
            Err(VerifierError::Transport(_))
        ));

        transport.unregister(&id);
        assert!(transport.send(&id, Bytes::new()).is_err());
    }
}
