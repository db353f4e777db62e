//! Domain types for the GridPact state store.
//!
//! These types represent the persisted state of machine promises,
//! allocations, benchmark jobs, benchmark results, and reputation records.
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a machine promise.
pub type PromiseId = String;

/// Unique identifier for an allocation.
pub type AllocationId = String;

/// Unique identifier for a benchmark job.
pub type JobId = String;

// ── Machine spec ──────────────────────────────────────────────────

/// Hardware descriptor claimed by the operator at registration.
///
/// Validated against numeric bounds when the promise is registered and
/// never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineSpec {
    pub cpu: CpuSpec,
    pub memory: MemorySpec,
    pub storage: StorageSpec,
    pub network: NetworkSpec,
    pub gpu: Option<GpuSpec>,
    /// TEE platform claimed for confidential workloads, if any.
    pub tee: Option<TeePlatform>,
    pub location: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuSpec {
    pub cores: u32,
    pub model: String,
    pub architecture: String,
    pub frequency_mhz: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySpec {
    pub size_mb: u64,
    /// Memory technology as advertised (e.g. "ddr5").
    pub kind: String,
    pub frequency_mhz: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSpec {
    pub size_mb: u64,
    pub kind: StorageKind,
    pub iops: u32,
}

/// Storage technology category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Hdd,
    Ssd,
    Nvme,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSpec {
    pub bandwidth_mbps: u32,
    pub public_ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuSpec {
    pub model: String,
    pub count: u32,
    pub memory_mb: u64,
}

/// Trusted execution environment platforms recognized by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeePlatform {
    Sgx,
    Sev,
    Tdx,
    Nitro,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub region: String,
    pub zone: String,
    pub datacenter: String,
}

// ── Machine promise ───────────────────────────────────────────────

/// Workload classes a promise advertises.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub compute: bool,
    pub storage: bool,
    pub cdn: bool,
    pub tee: bool,
    pub gpu: bool,
}

/// Lifecycle status of a machine promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseStatus {
    Available,
    /// Held by an in-flight `allocate` before activation resolves.
    Reserved,
    Allocated,
    /// Being released; deactivation in progress.
    Draining,
    Offline,
}

/// An operator's advertised, leasable resource.
///
/// Invariant: `allocation_id.is_some()` exactly when `status` is
/// `Allocated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachinePromise {
    pub id: PromiseId,
    pub operator: String,
    /// On-chain agent identity, required for proof-of-cloud verification.
    pub agent_id: Option<String>,
    pub spec: MachineSpec,
    pub capabilities: Capabilities,
    pub status: PromiseStatus,
    pub activation_endpoint: String,
    pub ssh_endpoint: Option<String>,
    pub price_per_hour_wei: u128,
    pub price_per_gb_wei: u128,
    pub min_lease_hours: u32,
    pub stake_wei: u128,
    /// Unix ms when the promise was registered.
    pub registered_at: u64,
    /// Unix ms of the last operator heartbeat.
    pub last_heartbeat: u64,
    pub allocation_id: Option<AllocationId>,
    pub allocated_to: Option<String>,
    /// Unix ms when the current reservation/lease began.
    pub allocated_at: Option<u64>,
}

// ── Allocation ────────────────────────────────────────────────────

/// Lifecycle status of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Pending,
    Activating,
    Active,
    Terminating,
    Terminated,
    Failed,
}

impl AllocationStatus {
    /// Whether the activation callback may still legitimately land.
    pub fn awaits_activation(&self) -> bool {
        matches!(self, AllocationStatus::Pending | AllocationStatus::Activating)
    }
}

/// Live resource usage reported for an active lease.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    pub cpu_pct: f64,
    pub memory_mb: u64,
    pub storage_mb: u64,
    pub network_rx_mb: u64,
    pub network_tx_mb: u64,
}

/// A lease of one promise to one user.
///
/// Terminated allocations are retained as records, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineAllocation {
    pub id: AllocationId,
    pub promise_id: PromiseId,
    pub user: String,
    /// Spec snapshot at lease time; the promise spec never changes but the
    /// promise itself may be unregistered later.
    pub spec: MachineSpec,
    pub capabilities: Capabilities,
    pub status: AllocationStatus,
    /// Runtime node assigned by the operator's activation endpoint.
    pub node_id: Option<String>,
    pub node_endpoint: Option<String>,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    /// Accumulated lease cost in wei.
    pub cost_wei: u128,
    pub last_billed_at: u64,
    pub usage: ResourceUsage,
    pub container_count: u32,
}

// ── Benchmark job ─────────────────────────────────────────────────

/// What caused a benchmark to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Initial,
    Scheduled,
    Random,
    Manual,
}

/// Lifecycle status of a benchmark job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One verification attempt against a machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkJob {
    pub id: JobId,
    pub machine_id: PromiseId,
    pub trigger: TriggerType,
    pub status: JobStatus,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub result: Option<BenchmarkResult>,
    /// Deviation percentage computed from the result, when completed.
    pub deviation_pct: Option<f64>,
    pub error: Option<String>,
}

// ── Benchmark result ──────────────────────────────────────────────

/// The untrusted report returned by a machine's benchmark endpoint.
///
/// Strictly validated before use: scores are bounded to 0..=10000,
/// categories are closed enums, and hashes must be well-formed hex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkResult {
    pub cpu: CpuMeasurement,
    pub memory: MemoryMeasurement,
    pub storage: StorageMeasurement,
    pub network: NetworkMeasurement,
    pub gpu: Option<GpuMeasurement>,
    pub tee: Option<TeeMeasurement>,
    /// Proof-of-cloud verification outcome, merged in by the executor when
    /// a cloud verifier is configured.
    pub cloud: Option<CloudVerification>,
    /// Composite benchmark score, 0..=10000.
    pub overall_score: u32,
    pub attestation_hash: Option<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuMeasurement {
    pub cores: u32,
    pub frequency_mhz: u32,
    /// Synthetic CPU score, 0..=10000.
    pub score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryMeasurement {
    pub size_mb: u64,
    pub read_mbps: u32,
    pub write_mbps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageMeasurement {
    pub size_mb: u64,
    pub kind: StorageKind,
    pub iops: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkMeasurement {
    pub bandwidth_mbps: u32,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuMeasurement {
    pub detected: bool,
    pub model: String,
    pub count: u32,
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeeMeasurement {
    pub detected: bool,
    pub platform: Option<TeePlatform>,
    pub attestation_valid: bool,
    pub attestation_hash: Option<String>,
}

/// Third-party proof-of-cloud verification outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudVerification {
    pub verified: bool,
    /// Assurance level, 1..=3.
    pub level: u8,
    pub provider: String,
    pub region: String,
    pub hardware_id_hash: String,
    /// Signed reputation adjustment from the verifier.
    pub reputation_delta: i64,
}

/// Completed-benchmark history row (last 10 retained per machine).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkRecord {
    pub machine_id: PromiseId,
    pub job_id: JobId,
    pub trigger: TriggerType,
    pub deviation_pct: f64,
    pub result: BenchmarkResult,
    pub completed_at: u64,
}

impl BenchmarkRecord {
    /// Build the composite key for the results table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.machine_id, self.completed_at)
    }
}

// ── Reputation ────────────────────────────────────────────────────

/// Per-machine trust state, mutated only by the reputation engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineReputation {
    pub machine_id: PromiseId,
    /// Trust score, clamped to 0..=100.
    pub score: i64,
    pub benchmark_count: u32,
    pub pass_count: u32,
    pub fail_count: u32,
    pub last_benchmark_at: Option<u64>,
    pub last_deviation_pct: Option<f64>,
    /// Append-only free-text event log (deviation events, verification
    /// outcomes).
    pub flags: Vec<String>,
}

impl MachineReputation {
    /// Fresh record at the neutral starting score.
    pub fn initial(machine_id: &str) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            score: 50,
            benchmark_count: 0,
            pass_count: 0,
            fail_count: 0,
            last_benchmark_at: None,
            last_deviation_pct: None,
            flags: Vec::new(),
        }
    }
}

// ── Aggregate statistics ──────────────────────────────────────────

/// Marketplace-wide aggregate statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketStats {
    pub promises_by_status: HashMap<String, u64>,
    pub total_cpu_cores: u64,
    pub available_cpu_cores: u64,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub total_gpus: u64,
    pub available_gpus: u64,
    pub regions: HashMap<String, u64>,
}
