//! Error types for custodian-core

use thiserror::Error;

use crate::session::SessionState;

/// Errors surfaced by session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// A required argument was missing or unusable.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid session identifier: {0}")]
    InvalidSessionId(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A capability implementation failed.
    #[error("Session operation failed: {0}")]
    OperationFailed(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: SessionState, to: SessionState },

    #[error("Property is protected: {0}")]
    ProtectedProperty(String),

    #[error("Session already registered: {0}")]
    Duplicate(String),
}

/// Faults of a single timeout handler unit
///
/// These are logged by the coordinator and never reach its caller.
#[derive(Error, Debug)]
pub enum TimeoutHandlerError {
    #[error("No timeout handler registered under {0}")]
    UnknownHandler(String),

    #[error("Failed to construct timeout handler {name}: {message}")]
    Construction { name: String, message: String },

    #[error("Timeout handler {name} failed: {message}")]
    Failed { name: String, message: String },

    #[error("Timeout handler {0} was interrupted")]
    Interrupted(String),

    #[error("Timeout handler {0} panicked")]
    Panicked(String),
}

/// Errors loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
