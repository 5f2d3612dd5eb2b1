// Error handling module for the verifier node
//
// This module defines error types and conversions used across the verifier

use std::io;
use std::result;
use thiserror::Error;

/// Result type for verifier node operations
pub type Result<T> = result::Result<T, VerifierError>;

/// Error type for verifier node operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifierError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A message template could not be parsed
    #[error("Invalid message template {template:?}: {reason}")]
    Template {
        /// The offending template text
        template: String,
        /// Why it was rejected
        reason: String,
    },

    /// Session is not known to the registry
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// The host transport refused a send or disconnect
    #[error("Transport error: {0}")]
    Transport(String),

    /// Caller lacks the permission required for an admin action
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// IO errors
    #[error("IO error: {0}")]
    IO(String),

    /// Serialization-related errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

// Implement conversion from io::Error to VerifierError
impl From<io::Error> for VerifierError {
    fn from(err: io::Error) -> Self {
        VerifierError::IO(err.to_string())
    }
}

// Implement conversion from toml serialization error to VerifierError
impl From<toml::ser::Error> for VerifierError {
    fn from(err: toml::ser::Error) -> Self {
        VerifierError::Serialization(err.to_string())
    }
}

// Implement conversion from toml deserialization error to VerifierError
impl From<toml::de::Error> for VerifierError {
    fn from(err: toml::de::Error) -> Self {
        VerifierError::Serialization(err.to_string())
    }
}

// Implement conversion from config crate errors to VerifierError
impl From<config::ConfigError> for VerifierError {
    fn from(err: config::ConfigError) -> Self {
        VerifierError::Config(err.to_string())
    }
}

// Implement conversion from serde_json::Error to VerifierError
impl From<serde_json::Error> for VerifierError {
    fn from(err: serde_json::Error) -> Self {
        VerifierError::Serialization(err.to_string())
    }
}
