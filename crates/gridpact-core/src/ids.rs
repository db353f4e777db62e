//! Prefixed, collision-resistant id generation.
//!
//! Ids are a short type prefix plus 128 bits of randomness rendered as hex,
//! e.g. `mp-1f8b3c…`. The prefix makes log lines and store keys
//! self-describing.

/// Generate a new id with the given type prefix.
pub fn new_id(prefix: &str) -> String {
    let entropy: u128 = rand::random();
    format!("{prefix}-{entropy:032x}")
}

/// Prefix for machine promises.
pub const PROMISE: &str = "mp";
/// Prefix for allocations.
pub const ALLOCATION: &str = "al";
/// Prefix for benchmark jobs.
pub const JOB: &str = "bj";
