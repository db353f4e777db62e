//! gridpact-alloc — the allocation engine.
//!
//! Matches user requirements against available machine promises, drives
//! the lease lifecycle, and recovers stuck allocations:
//!
//! - `matcher`: constraint filtering and the tie-break ranking
//!   (cpu-core surplus, then price, then registration seniority)
//! - `engine`: `allocate`/`release`, the reservation compare-and-set,
//!   and supervised asynchronous activation
//! - `janitor`: the periodic sweep failing allocations whose activation
//!   never resolved and freeing their promises
//!
//! The critical invariant — two concurrent `allocate` calls can never
//! win the same promise — rests on the store's single-transaction
//! reservation CAS, not on engine-side locking.

pub mod engine;
pub mod error;
pub mod janitor;
pub mod matcher;

pub use engine::{AllocConfig, AllocationEngine};
pub use error::{AllocError, AllocResult};
pub use janitor::spawn_allocation_janitor;
pub use matcher::{Requirements, rank_candidates, satisfies};
