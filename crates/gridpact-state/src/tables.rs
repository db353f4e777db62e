//! redb table definitions for the GridPact state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The results table uses composite `{machine_id}:{timestamp}` keys
//! for prefix scans; timestamps are zero-padded so lexical order is
//! chronological order.

use redb::TableDefinition;

/// Machine promises keyed by `{promise_id}`.
pub const PROMISES: TableDefinition<&str, &[u8]> = TableDefinition::new("promises");

/// Allocations keyed by `{allocation_id}`.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("allocations");

/// Reputation records keyed by `{machine_id}`.
pub const REPUTATION: TableDefinition<&str, &[u8]> = TableDefinition::new("reputation");

/// Benchmark jobs keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Benchmark history keyed by `{machine_id}:{completed_at:020}`.
pub const RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("results");
