//! Deployment environment and its limits.
//!
//! Registration caps, minimum stake, and allocation timeouts differ per
//! environment. The daemon constructs one `Environment` and passes it to
//! every subsystem; nothing reads it from a global.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which marketplace environment this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Local,
    Testnet,
    Mainnet,
}

impl Environment {
    /// Maximum number of promises a single operator may register.
    pub fn max_promises_per_operator(&self) -> usize {
        match self {
            Environment::Local => 100,
            Environment::Testnet => 25,
            Environment::Mainnet => 10,
        }
    }

    /// Minimum stake required at registration, in wei.
    pub fn min_stake_wei(&self) -> u128 {
        match self {
            Environment::Local => 0,
            Environment::Testnet => 100_000_000_000_000_000,
            Environment::Mainnet => 1_000_000_000_000_000_000,
        }
    }

    /// How long an allocation may sit in pending/activating before the
    /// janitor fails it and frees the promise.
    pub fn allocation_timeout_ms(&self) -> u64 {
        match self {
            Environment::Local => 5 * 60 * 1_000,
            Environment::Testnet => 10 * 60 * 1_000,
            Environment::Mainnet => 15 * 60 * 1_000,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Local => write!(f, "local"),
            Environment::Testnet => write!(f, "testnet"),
            Environment::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// Error for unrecognized environment names.
#[derive(Debug, thiserror::Error)]
#[error("unknown environment: {0} (expected local, testnet, or mainnet)")]
pub struct ParseEnvironmentError(String);

impl FromStr for Environment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "testnet" => Ok(Environment::Testnet),
            "mainnet" => Ok(Environment::Mainnet),
            other => Err(ParseEnvironmentError(other.to_string())),
        }
    }
}
