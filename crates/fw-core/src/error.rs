//! # WardenError
//!
//! Centralized error handling for the forum-warden crates.
//! Ports return these so that callers can choose a recovery policy.

use thiserror::Error;

/// The primary error type for all fw-core ports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WardenError {
    /// Forum API unreachable, timed out, or answered with garbage.
    #[error("transport error: {0}")]
    Transport(String),

    /// Record store could not be reached even after reconnecting.
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    /// The forum refused a moderation action (already deleted, no privilege, ...)
    #[error("action rejected: {0}")]
    ActionRejected(String),

    /// Resource not found (e.g. unknown user name)
    #[error("{0} not found: {1}")]
    NotFound(String, String),

    /// Malformed data coming from a collaborator
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Bad or missing configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl WardenError {
    /// Transient failures are worth another attempt on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, WardenError::Transport(_) | WardenError::StoreUnavailable(_))
    }
}

/// A specialized Result type for forum-warden logic.
pub type Result<T> = std::result::Result<T, WardenError>;
