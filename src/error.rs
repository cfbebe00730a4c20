//! Error types and error classification for the client
//!
//! Every failure a run can hit is represented by [`AppError`]. The orchestrator
//! never inspects error strings: [`AppError::is_cancellation`] separates aborts
//! from failures and [`AppError::is_transient`] classifies polling hiccups.

use thiserror::Error;

/// Application-level error types
///
/// Variants follow the client's error taxonomy. Only `Credential`,
/// `RemoteValidation`, `JobFailure` (and the other non-transient variants)
/// terminate a run with a user-visible message.
#[derive(Error, Debug)]
pub enum AppError {
    /// Local input was rejected before anything was sent
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Translation credentials are missing or were refused
    #[error("Missing credentials: {0}")]
    Credential(String),

    /// A network request failed before a response arrived
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The operation was aborted by the user or by a newer submission
    #[error("Operation cancelled")]
    Cancelled,

    /// The bridge rejected the request with field-level problems
    #[error("{0}")]
    RemoteValidation(String),

    /// The remote job reported a `failed` status
    #[error("Job failed: {0}")]
    JobFailure(String),

    /// The submission succeeded at HTTP level but carried no job identifier
    #[error("{0}")]
    MissingJobId(String),

    /// A remote service answered with a non-success status
    #[error("{message}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Readable message extracted from the response body
        message: String,
    },

    /// A response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Internal error (catch-all for unexpected errors)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the error is a one-off hiccup worth retrying on the next poll
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Network(e) => !e.is_builder(),
            AppError::Remote { status, .. } => *status >= 500 || *status == 429 || *status == 404,
            AppError::Decode(_) => true,
            _ => false,
        }
    }

    /// Whether the error is an abort signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
