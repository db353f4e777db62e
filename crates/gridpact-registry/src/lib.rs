//! gridpact-registry — the machine promise registry.
//!
//! Owns the table of machine promises and their status transitions:
//!
//! - Registration with spec-bounds validation, per-environment operator
//!   caps, and minimum stake checks
//! - Heartbeats (offline promises recover to available)
//! - Unregistration (only idle promises may be destroyed)
//! - Queries: by id, by operator, available-with-filters, aggregate stats
//! - The heartbeat sweep marking stale promises offline
//!
//! Promise mutations that race other subsystems go through the store's
//! single-transaction helpers; the registry never mutates allocations.

pub mod error;
pub mod registry;
pub mod sweeper;
pub mod validate;

pub use error::{RegistryError, RegistryResult};
pub use registry::{MachineFilter, MachineRegistry, NewMachine, RegistryConfig};
pub use sweeper::spawn_heartbeat_sweep;
