//! Error types for outbound calls.

use thiserror::Error;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by outbound calls to machines and collaborators.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed response body: {0}")]
    Decode(String),
}
