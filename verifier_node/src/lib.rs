// Verifier Node
//
// This crate gates a player's session until their client reports its installed
// mods, then admits or disconnects the player based on a configurable denylist.
//
// # Architecture
//
// * **Policy**: immutable configuration snapshot, swapped whole on reload
// * **Session Registry**: concurrent map of live sessions and their deadlines
// * **Protocol**: request marker and `MODS|` attestation decoding
// * **Decision Engine**: denylist matching and disconnect message selection
// * **Verifier**: per-session state machine, resend loop and deadline sweep
// * **Transport**: seam to the hosting runtime's byte channel
//
// # Usage
//
// ```rust,no_run
// use std::sync::Arc;
// use verifier_node::config::{PolicyHandle, VerifierConfig};
// use verifier_node::session::SessionId;
// use verifier_node::transport::ChannelTransport;
// use verifier_node::verifier::Verifier;
//
// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
// let config = VerifierConfig::from_file("verifier.toml")?;
// let transport = Arc::new(ChannelTransport::new());
// let verifier = Verifier::new(PolicyHandle::from_config(&config)?, transport.clone());
// verifier.spawn_sweeper();
//
// let id = SessionId::generate();
// let _outbound = transport.register(id.clone());
// verifier.on_session_open(id.clone(), "Steve");
// verifier.on_message(&id, b"MODS|sodium,iris");
// verifier.on_session_close(&id);
// # Ok(())
// # }
// ```

/// Administrative `/verifier reload` command and its permission gate.
pub mod admin;

/// Configuration loading and the immutable verification policy.
///
/// * TOML file loading with an optional separate messages file
/// * Environment overrides under the `VERIFIER__` prefix
/// * Atomic policy swap on reload
pub mod config;

/// Denylist evaluation and disconnect message resolution.
pub mod decision;

/// Error types for the verifier node.
pub mod error;

/// Line-oriented TCP host used by the `verifier-node` binary.
pub mod gateway;

/// Attestation wire protocol.
pub mod protocol;

/// Session identifiers, phases and the session registry.
pub mod session;

/// Disconnect message templates with a fixed placeholder set.
pub mod template;

/// Seam between the verifier and the hosting runtime's connections.
pub mod transport;

/// Per-session verification state machine.
pub mod verifier;

pub use config::{Policy, PolicyHandle, VerifierConfig};
pub use decision::Decision;
pub use error::{Result, VerifierError};
pub use session::{Phase, SessionId};
pub use verifier::Verifier;
