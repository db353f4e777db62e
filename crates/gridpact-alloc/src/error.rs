//! Allocation error types.

use thiserror::Error;

/// Result type alias for allocation operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors that can occur during allocation operations.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("no suitable machine for the requested resources")]
    NoSuitableMachine,

    #[error("allocation not found: {0}")]
    NotFound(String),

    #[error("caller does not own allocation {0}")]
    NotOwner(String),

    #[error("state store error: {0}")]
    State(#[from] gridpact_state::StateError),
}
