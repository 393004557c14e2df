//! Error types for ratewarden.

use thiserror::Error;

/// Main error type for rate limiting operations.
///
/// The limiters never produce errors of their own: whatever a counter store
/// or parameter source returns is handed back to the caller unchanged.
#[derive(Error, Debug)]
pub enum Error {
    /// Counter store failures (connection loss, backend errors)
    #[error("Counter store error: {0}")]
    Store(String),

    /// Parameter source failures
    #[error("Parameter source error: {0}")]
    Params(String),

    /// The caller's context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The caller's context deadline passed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ratewarden operations.
pub type Result<T> = std::result::Result<T, Error>;
