//! Interface-only collaborators.
//!
//! These subsystems exist elsewhere in the platform; the core only
//! depends on their call contracts. The daemon wires real
//! implementations in; tests and local runs use mocks or the null
//! placement sync.

use async_trait::async_trait;
use tracing::debug;

use gridpact_state::{BenchmarkResult, CloudVerification, MachinePromise};

use crate::error::ClientResult;

/// On-chain registry/ledger client used to publish results and disputes.
#[async_trait]
pub trait ChainRegistry: Send + Sync {
    /// Publish a completed benchmark result. Returns the transaction hash.
    async fn submit_benchmark(&self, result: &BenchmarkResult) -> ClientResult<String>;

    /// File a dispute against an operator. Returns the transaction hash.
    async fn dispute_benchmark(&self, operator: &str, reason: &str) -> ClientResult<String>;
}

/// Third-party proof-of-cloud verification service.
#[async_trait]
pub trait CloudVerifier: Send + Sync {
    /// Check a machine's TEE/cloud identity against the alliance registry.
    async fn verify_node(
        &self,
        agent_id: &str,
        attestation_hash: &str,
    ) -> ClientResult<CloudVerification>;
}

/// External scheduling layer used for workload placement.
///
/// Registration and deregistration mirror the promise table into the
/// placement system; failures are logged by callers and never block
/// registry operations.
#[async_trait]
pub trait PlacementSync: Send + Sync {
    async fn register_machine(&self, promise: &MachinePromise) -> ClientResult<()>;
    async fn deregister_machine(&self, promise_id: &str) -> ClientResult<()>;
    async fn mark_offline(&self, promise_id: &str) -> ClientResult<()>;
}

/// Placement sync that does nothing, for local runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlacementSync;

#[async_trait]
impl PlacementSync for NullPlacementSync {
    async fn register_machine(&self, promise: &MachinePromise) -> ClientResult<()> {
        debug!(promise_id = %promise.id, "placement sync disabled, skipping register");
        Ok(())
    }

    async fn deregister_machine(&self, promise_id: &str) -> ClientResult<()> {
        debug!(%promise_id, "placement sync disabled, skipping deregister");
        Ok(())
    }

    async fn mark_offline(&self, promise_id: &str) -> ClientResult<()> {
        debug!(%promise_id, "placement sync disabled, skipping offline");
        Ok(())
    }
}
