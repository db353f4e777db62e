//! gridpact-state — embedded state store for the GridPact marketplace core.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for machine promises, allocations, reputation records,
//! benchmark jobs, and benchmark result history.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! History rows use composite keys (`{machine_id}:{timestamp}`) so related
//! records are reachable by prefix scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and is handed to every subsystem; redb serializes write transactions,
//! which is what makes the promise-reservation compare-and-set safe against
//! concurrent allocators.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{RemoveOutcome, StateStore};
pub use types::*;
