//! Registry error types.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid machine spec: {0}")]
    Validation(String),

    #[error("operator {operator} already has {cap} registered machines")]
    OperatorAtCap { operator: String, cap: usize },

    #[error("stake {offered_wei} wei below required minimum {required_wei} wei")]
    StakeTooLow {
        offered_wei: u128,
        required_wei: u128,
    },

    #[error("machine not found: {0}")]
    NotFound(String),

    #[error("caller does not own machine {0}")]
    NotOwner(String),

    #[error("machine {0} has an active lease")]
    PromiseBusy(String),

    #[error("state store error: {0}")]
    State(#[from] gridpact_state::StateError),
}
