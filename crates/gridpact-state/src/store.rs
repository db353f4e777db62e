//! StateStore — redb-backed persistence for the GridPact core.
//!
//! Provides typed CRUD operations over promises, allocations, reputation,
//! benchmark jobs, and benchmark history. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Mutations that must be atomic against concurrent writers — promise
//! reservation, heartbeat refresh, offline sweeps — run their
//! read-modify-write inside a single write transaction; redb serializes
//! writers, so two `allocate` calls can never both win the same promise.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Outcome of a conditional promise removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The promise existed in a removable status and was deleted.
    Removed,
    /// The promise exists but is reserved, allocated, or draining.
    Busy,
    /// No promise with that id.
    Missing,
}

/// Number of benchmark history rows retained per machine.
const HISTORY_LIMIT: usize = 10;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROMISES).map_err(map_err!(Table))?;
        txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(REPUTATION).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(RESULTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Promises ───────────────────────────────────────────────────

    /// Insert or update a machine promise.
    pub fn put_promise(&self, promise: &MachinePromise) -> StateResult<()> {
        let value = serde_json::to_vec(promise).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROMISES).map_err(map_err!(Table))?;
            table
                .insert(promise.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(promise_id = %promise.id, "promise stored");
        Ok(())
    }

    /// Get a promise by id.
    pub fn get_promise(&self, id: &str) -> StateResult<Option<MachinePromise>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROMISES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let promise: MachinePromise =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(promise))
            }
            None => Ok(None),
        }
    }

    /// List all promises.
    pub fn list_promises(&self) -> StateResult<Vec<MachinePromise>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROMISES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let promise: MachinePromise =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(promise);
        }
        Ok(results)
    }

    /// Read-modify-write a promise inside a single write transaction.
    ///
    /// The closure may inspect the current state and return `false` to
    /// abort without writing. Returns the updated promise when the write
    /// happened, `None` when the promise is missing or the closure aborted.
    pub fn update_promise<F>(&self, id: &str, f: F) -> StateResult<Option<MachinePromise>>
    where
        F: FnOnce(&mut MachinePromise) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(PROMISES).map_err(map_err!(Table))?;
            let current = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    let promise: MachinePromise =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(promise)
                }
                None => None,
            };
            match current {
                Some(mut promise) => {
                    if f(&mut promise) {
                        let value = serde_json::to_vec(&promise).map_err(map_err!(Serialize))?;
                        table
                            .insert(id, value.as_slice())
                            .map_err(map_err!(Write))?;
                        updated = Some(promise);
                    } else {
                        updated = None;
                    }
                }
                None => updated = None,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Atomically flip a promise from `Available` to `Reserved`.
    ///
    /// Returns `true` when this caller won the reservation. A concurrent
    /// `allocate` that lost the race sees `false` and moves on to its next
    /// candidate.
    pub fn try_reserve_promise(&self, id: &str, now_ms: u64) -> StateResult<bool> {
        let updated = self.update_promise(id, |p| {
            if p.status != PromiseStatus::Available {
                return false;
            }
            p.status = PromiseStatus::Reserved;
            p.allocated_at = Some(now_ms);
            true
        })?;
        Ok(updated.is_some())
    }

    /// Refresh a promise's heartbeat, restoring `Offline` to `Available`.
    ///
    /// Returns the updated promise, or `None` when it does not exist.
    pub fn touch_heartbeat(&self, id: &str, now_ms: u64) -> StateResult<Option<MachinePromise>> {
        self.update_promise(id, |p| {
            p.last_heartbeat = now_ms;
            if p.status == PromiseStatus::Offline {
                p.status = PromiseStatus::Available;
            }
            true
        })
    }

    /// Mark an `Available` promise `Offline` when its heartbeat is older
    /// than `cutoff_ms`. Returns `true` when the flip happened.
    pub fn mark_offline_if_stale(&self, id: &str, cutoff_ms: u64) -> StateResult<bool> {
        let updated = self.update_promise(id, |p| {
            if p.status != PromiseStatus::Available || p.last_heartbeat >= cutoff_ms {
                return false;
            }
            p.status = PromiseStatus::Offline;
            true
        })?;
        Ok(updated.is_some())
    }

    /// Delete a promise only when it is `Available` or `Offline`.
    pub fn remove_promise_if_idle(&self, id: &str) -> StateResult<RemoveOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(PROMISES).map_err(map_err!(Table))?;
            let current = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    let promise: MachinePromise =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(promise)
                }
                None => None,
            };
            outcome = match current {
                None => RemoveOutcome::Missing,
                Some(p)
                    if matches!(p.status, PromiseStatus::Available | PromiseStatus::Offline) =>
                {
                    table.remove(id).map_err(map_err!(Write))?;
                    RemoveOutcome::Removed
                }
                Some(_) => RemoveOutcome::Busy,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    // ── Allocations ────────────────────────────────────────────────

    /// Insert or update an allocation.
    pub fn put_allocation(&self, alloc: &MachineAllocation) -> StateResult<()> {
        let value = serde_json::to_vec(alloc).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            table
                .insert(alloc.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get an allocation by id.
    pub fn get_allocation(&self, id: &str) -> StateResult<Option<MachineAllocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let alloc: MachineAllocation =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(alloc))
            }
            None => Ok(None),
        }
    }

    /// List all allocations.
    pub fn list_allocations(&self) -> StateResult<Vec<MachineAllocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let alloc: MachineAllocation =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(alloc);
        }
        Ok(results)
    }

    /// List allocations held by a user.
    pub fn list_allocations_for_user(&self, user: &str) -> StateResult<Vec<MachineAllocation>> {
        Ok(self
            .list_allocations()?
            .into_iter()
            .filter(|a| a.user == user)
            .collect())
    }

    /// Read-modify-write an allocation inside a single write transaction.
    ///
    /// Same contract as [`StateStore::update_promise`].
    pub fn update_allocation<F>(&self, id: &str, f: F) -> StateResult<Option<MachineAllocation>>
    where
        F: FnOnce(&mut MachineAllocation) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
            let current = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    let alloc: MachineAllocation =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(alloc)
                }
                None => None,
            };
            match current {
                Some(mut alloc) => {
                    if f(&mut alloc) {
                        let value = serde_json::to_vec(&alloc).map_err(map_err!(Serialize))?;
                        table
                            .insert(id, value.as_slice())
                            .map_err(map_err!(Write))?;
                        updated = Some(alloc);
                    } else {
                        updated = None;
                    }
                }
                None => updated = None,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Reputation ─────────────────────────────────────────────────

    /// Insert or update a reputation record.
    pub fn put_reputation(&self, rep: &MachineReputation) -> StateResult<()> {
        let value = serde_json::to_vec(rep).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPUTATION).map_err(map_err!(Table))?;
            table
                .insert(rep.machine_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a machine's reputation record.
    pub fn get_reputation(&self, machine_id: &str) -> StateResult<Option<MachineReputation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPUTATION).map_err(map_err!(Table))?;
        match table.get(machine_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let rep: MachineReputation =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rep))
            }
            None => Ok(None),
        }
    }

    // ── Benchmark jobs ─────────────────────────────────────────────

    /// Insert or update a benchmark job.
    pub fn put_job(&self, job: &BenchmarkJob) -> StateResult<()> {
        let value = serde_json::to_vec(job).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            table
                .insert(job.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a benchmark job by id.
    pub fn get_job(&self, id: &str) -> StateResult<Option<BenchmarkJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let job: BenchmarkJob =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// List all benchmark jobs.
    pub fn list_jobs(&self) -> StateResult<Vec<BenchmarkJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: BenchmarkJob =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(job);
        }
        Ok(results)
    }

    // ── Benchmark history ──────────────────────────────────────────

    /// Append a completed-benchmark record, pruning the machine's history
    /// to the newest [`HISTORY_LIMIT`] rows.
    pub fn push_benchmark_record(&self, record: &BenchmarkRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let prefix = format!("{}:", record.machine_id);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESULTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            // Collect this machine's keys (lexical order == chronological).
            let mut keys: Vec<String> = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                let k = k.value().to_string();
                if k.starts_with(&prefix) {
                    keys.push(k);
                }
            }
            if keys.len() > HISTORY_LIMIT {
                let excess = keys.len() - HISTORY_LIMIT;
                for stale in keys.iter().take(excess) {
                    table.remove(stale.as_str()).map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Benchmark history for a machine, newest first (at most 10 rows).
    pub fn list_benchmark_records(&self, machine_id: &str) -> StateResult<Vec<BenchmarkRecord>> {
        let prefix = format!("{machine_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESULTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: BenchmarkRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        results.reverse();
        Ok(results)
    }
}
