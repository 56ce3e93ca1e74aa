// src/error.rs

use thiserror::Error;

/// Core error types for Quartermaster
///
/// The enum is `Clone` because a single execution failure has two
/// consumers: it resolves the submitting caller's operation and it is
/// published on the notification bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Operation requested against an incompatible current status
    #[error("invalid state for operation on '{target}': {status}")]
    InvalidState { target: String, status: String },

    /// An identical operation for the same target is already pending
    #[error("operation already in progress for '{0}'")]
    OperationInProgress(String),

    /// The package transaction backend is unreachable
    #[error("package transaction backend unavailable")]
    BackendUnavailable,

    /// The repository configuration tool is unreachable
    #[error("repository tool unavailable")]
    RepoToolUnavailable,

    /// Failure reported by an adapter; code and details pass through verbatim
    #[error("backend error {code}: {details}")]
    Backend { code: u32, details: String },

    /// Operation removed from the pending queue before dispatch
    #[error("operation cancelled before dispatch")]
    Cancelled,
}

/// Result type alias using Quartermaster's Error type
pub type Result<T> = std::result::Result<T, Error>;
