//! Verification error types.

use thiserror::Error;

/// Result type alias for verification operations.
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Errors that can occur during verification operations.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("benchmark already in flight for machine {0}")]
    Busy(String),

    #[error("machine not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(#[from] gridpact_state::StateError),
}
