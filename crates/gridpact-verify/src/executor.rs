//! BenchmarkExecutor — runs one verification attempt end to end.
//!
//! There is exactly one execution path for every trigger type (initial,
//! scheduled, random, manual), so deviation scoring and reputation
//! updates can never diverge between entry points.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use gridpact_client::{BenchmarkRequest, ChainRegistry, CloudVerifier, MachineClient};
use gridpact_core::{Clock, ids};
use gridpact_reputation::ReputationEngine;
use gridpact_state::*;

use crate::config::VerifyConfig;
use crate::deviation::deviation_pct;
use crate::error::{VerifyError, VerifyResult};
use crate::validate::validate_result;

/// RAII claim on a machine's in-flight slot. Dropping releases the slot
/// on every exit path — success, validation failure, network failure, or
/// panic unwinding — so a machine can never be locked out of future
/// checks.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    machine_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.machine_id);
    }
}

/// The benchmark executor — exclusive owner of job records.
pub struct BenchmarkExecutor {
    store: StateStore,
    clock: Arc<dyn Clock>,
    client: Arc<dyn MachineClient>,
    chain: Option<Arc<dyn ChainRegistry>>,
    verifier: Option<Arc<dyn CloudVerifier>>,
    reputation: Arc<ReputationEngine>,
    config: VerifyConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl BenchmarkExecutor {
    pub fn new(
        store: StateStore,
        clock: Arc<dyn Clock>,
        client: Arc<dyn MachineClient>,
        chain: Option<Arc<dyn ChainRegistry>>,
        verifier: Option<Arc<dyn CloudVerifier>>,
        reputation: Arc<ReputationEngine>,
        config: VerifyConfig,
    ) -> Self {
        Self {
            store,
            clock,
            client,
            chain,
            verifier,
            reputation,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Number of benchmarks currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in-flight set poisoned").len()
    }

    /// Whether a machine currently has a benchmark in flight.
    pub fn is_in_flight(&self, machine_id: &str) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .contains(machine_id)
    }

    /// Claim the machine's in-flight slot, or fail with `Busy`.
    fn claim(&self, machine_id: &str) -> VerifyResult<InFlightGuard> {
        let mut set = self.in_flight.lock().expect("in-flight set poisoned");
        if !set.insert(machine_id.to_string()) {
            return Err(VerifyError::Busy(machine_id.to_string()));
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            machine_id: machine_id.to_string(),
        })
    }

    /// Run one benchmark against a machine.
    ///
    /// Upstream and validation failures land on the returned job record
    /// (`Failed` with an error message); only claim conflicts, unknown
    /// machines, and store failures surface as typed errors.
    pub async fn run(&self, machine_id: &str, trigger: TriggerType) -> VerifyResult<BenchmarkJob> {
        let _guard = self.claim(machine_id)?;

        let promise = self
            .store
            .get_promise(machine_id)?
            .ok_or_else(|| VerifyError::NotFound(machine_id.to_string()))?;

        let now = self.clock.now_ms();
        let mut job = BenchmarkJob {
            id: ids::new_id(ids::JOB),
            machine_id: machine_id.to_string(),
            trigger,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            deviation_pct: None,
            error: None,
        };
        self.store.put_job(&job)?;

        job.status = JobStatus::Running;
        job.started_at = Some(self.clock.now_ms());
        self.store.put_job(&job)?;
        debug!(job_id = %job.id, %machine_id, ?trigger, "benchmark dispatched");

        let request = BenchmarkRequest {
            job_id: job.id.clone(),
            image: self.config.benchmark_image.clone(),
            timeout: self.config.benchmark_timeout_ms / 1_000,
        };
        let deadline = Duration::from_millis(self.config.benchmark_timeout_ms);
        let mut result = match self
            .client
            .run_benchmark(&promise.activation_endpoint, &request, deadline)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                return self.fail_job(job, format!("benchmark call failed: {e}"));
            }
        };

        if let Err(violation) = validate_result(&result) {
            return self.fail_job(job, format!("report rejected: {violation}"));
        }

        self.maybe_verify_cloud(&promise, &mut result).await;

        let deviation = deviation_pct(&promise.spec, &result);
        let reputation = self
            .reputation
            .record_benchmark(machine_id, deviation, &result)?;
        self.log_severity(&promise, deviation, reputation.score).await;
        self.publish_result(&result).await;

        let finished = self.clock.now_ms();
        job.status = JobStatus::Completed;
        job.finished_at = Some(finished);
        job.deviation_pct = Some(deviation);
        job.result = Some(result.clone());
        self.store.put_job(&job)?;

        self.store.push_benchmark_record(&BenchmarkRecord {
            machine_id: machine_id.to_string(),
            job_id: job.id.clone(),
            trigger,
            deviation_pct: deviation,
            result,
            completed_at: finished,
        })?;

        info!(
            job_id = %job.id,
            %machine_id,
            deviation_pct = deviation,
            score = reputation.score,
            "benchmark completed"
        );
        Ok(job)
    }

    /// Merge a proof-of-cloud verification into the result when the
    /// machine attested a TEE and both the verifier and the promise's
    /// on-chain identity are available. Verifier failures are logged;
    /// the benchmark proceeds unmerged.
    async fn maybe_verify_cloud(&self, promise: &MachinePromise, result: &mut BenchmarkResult) {
        let (Some(verifier), Some(agent_id)) = (&self.verifier, &promise.agent_id) else {
            return;
        };
        let Some(tee) = &result.tee else {
            return;
        };
        if !tee.detected {
            return;
        }
        let Some(hash) = tee
            .attestation_hash
            .as_ref()
            .or(result.attestation_hash.as_ref())
        else {
            return;
        };

        match verifier.verify_node(agent_id, hash).await {
            Ok(cloud) => {
                debug!(
                    promise_id = %promise.id,
                    verified = cloud.verified,
                    level = cloud.level,
                    provider = %cloud.provider,
                    "proof-of-cloud verification merged"
                );
                result.cloud = Some(cloud);
            }
            Err(e) => {
                warn!(promise_id = %promise.id, error = %e, "proof-of-cloud verification failed");
            }
        }
    }

    /// Log by severity band; past the slashing threshold, file a dispute.
    async fn log_severity(&self, promise: &MachinePromise, deviation: f64, score: i64) {
        let c = &self.config;
        if deviation >= c.slash_threshold_pct {
            error!(
                promise_id = %promise.id,
                operator = %promise.operator,
                deviation_pct = deviation,
                score,
                "deviation past slashing threshold"
            );
            self.file_dispute(promise, deviation).await;
        } else if deviation >= c.fail_threshold_pct {
            error!(
                promise_id = %promise.id,
                deviation_pct = deviation,
                score,
                "benchmark failed deviation check"
            );
        } else if deviation >= c.warn_threshold_pct {
            warn!(promise_id = %promise.id, deviation_pct = deviation, score, "deviation warning");
        } else {
            debug!(promise_id = %promise.id, deviation_pct = deviation, score, "benchmark passed");
        }
    }

    /// Submit a dispute to the on-chain registry. A submission failure is
    /// logged and never rolls back the local reputation update.
    async fn file_dispute(&self, promise: &MachinePromise, deviation: f64) {
        let Some(chain) = &self.chain else {
            warn!(promise_id = %promise.id, "no chain registry configured, dispute not filed");
            return;
        };
        let reason = format!(
            "machine {} deviated {:.1}% from its claimed hardware",
            promise.id, deviation
        );
        match chain.dispute_benchmark(&promise.operator, &reason).await {
            Ok(tx) => info!(
                promise_id = %promise.id,
                operator = %promise.operator,
                tx_hash = %tx,
                "dispute filed"
            ),
            Err(e) => error!(
                promise_id = %promise.id,
                operator = %promise.operator,
                error = %e,
                "dispute submission failed"
            ),
        }
    }

    /// Publish a completed result on-chain; failures only log.
    async fn publish_result(&self, result: &BenchmarkResult) {
        let Some(chain) = &self.chain else {
            return;
        };
        match chain.submit_benchmark(result).await {
            Ok(tx) => debug!(tx_hash = %tx, "benchmark result published"),
            Err(e) => warn!(error = %e, "benchmark result publication failed"),
        }
    }

    /// Land an upstream or validation failure on the job record.
    fn fail_job(&self, mut job: BenchmarkJob, reason: String) -> VerifyResult<BenchmarkJob> {
        warn!(job_id = %job.id, machine_id = %job.machine_id, %reason, "benchmark failed");
        job.status = JobStatus::Failed;
        job.finished_at = Some(self.clock.now_ms());
        job.error = Some(reason);
        self.store.put_job(&job)?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridpact_client::{ActivateRequest, ActivateResponse, ClientError, ClientResult};
    use gridpact_core::ManualClock;
    use gridpact_reputation::ReputationThresholds;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Semaphore;

    fn claimed_spec() -> MachineSpec {
        MachineSpec {
            cpu: CpuSpec {
                cores: 8,
                model: "EPYC 7302".to_string(),
                architecture: "x86_64".to_string(),
                frequency_mhz: 3_000,
            },
            memory: MemorySpec {
                size_mb: 16_000,
                kind: "ddr4".to_string(),
                frequency_mhz: 3_200,
            },
            storage: StorageSpec {
                size_mb: 1_000_000,
                kind: StorageKind::Nvme,
                iops: 500_000,
            },
            network: NetworkSpec {
                bandwidth_mbps: 10_000,
                public_ips: vec![],
            },
            gpu: None,
            tee: None,
            location: Location {
                region: "eu-west".to_string(),
                zone: "a".to_string(),
                datacenter: "dc".to_string(),
            },
        }
    }

    fn promise(id: &str) -> MachinePromise {
        MachinePromise {
            id: id.to_string(),
            operator: "op-a".to_string(),
            agent_id: None,
            spec: claimed_spec(),
            capabilities: Capabilities::default(),
            status: PromiseStatus::Available,
            activation_endpoint: "http://host:7070".to_string(),
            ssh_endpoint: None,
            price_per_hour_wei: 100,
            price_per_gb_wei: 0,
            min_lease_hours: 1,
            stake_wei: 0,
            registered_at: 1_000,
            last_heartbeat: 1_000,
            allocation_id: None,
            allocated_to: None,
            allocated_at: None,
        }
    }

    fn honest_report() -> BenchmarkResult {
        BenchmarkResult {
            cpu: CpuMeasurement {
                cores: 8,
                frequency_mhz: 3_000,
                score: 7_000,
            },
            memory: MemoryMeasurement {
                size_mb: 16_000,
                read_mbps: 20_000,
                write_mbps: 18_000,
            },
            storage: StorageMeasurement {
                size_mb: 1_000_000,
                kind: StorageKind::Nvme,
                iops: 480_000,
            },
            network: NetworkMeasurement {
                bandwidth_mbps: 10_000,
                latency_ms: 1.0,
            },
            gpu: None,
            tee: None,
            cloud: None,
            overall_score: 8_000,
            attestation_hash: None,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    enum BenchBehavior {
        Report(BenchmarkResult),
        Fail,
        Gated(Arc<Semaphore>, BenchmarkResult),
    }

    struct MockBenchClient {
        behavior: BenchBehavior,
    }

    #[async_trait]
    impl MachineClient for MockBenchClient {
        async fn activate(
            &self,
            _endpoint: &str,
            _req: &ActivateRequest,
            _timeout: Duration,
        ) -> ClientResult<ActivateResponse> {
            Err(ClientError::Status(501))
        }

        async fn deactivate(
            &self,
            _endpoint: &str,
            _allocation_id: &str,
            _timeout: Duration,
        ) -> ClientResult<()> {
            Ok(())
        }

        async fn run_benchmark(
            &self,
            _endpoint: &str,
            _req: &BenchmarkRequest,
            _timeout: Duration,
        ) -> ClientResult<BenchmarkResult> {
            match &self.behavior {
                BenchBehavior::Report(r) => Ok(r.clone()),
                BenchBehavior::Fail => Err(ClientError::Timeout(300_000)),
                BenchBehavior::Gated(gate, r) => {
                    let _permit = gate.acquire().await.map_err(|_| ClientError::Status(500))?;
                    Ok(r.clone())
                }
            }
        }
    }

    #[derive(Default)]
    struct MockChain {
        disputes: StdMutex<Vec<(String, String)>>,
        submissions: StdMutex<Vec<u32>>,
    }

    #[async_trait]
    impl ChainRegistry for MockChain {
        async fn submit_benchmark(&self, result: &BenchmarkResult) -> ClientResult<String> {
            self.submissions.lock().unwrap().push(result.overall_score);
            Ok("0xsubmit".to_string())
        }

        async fn dispute_benchmark(&self, operator: &str, reason: &str) -> ClientResult<String> {
            self.disputes
                .lock()
                .unwrap()
                .push((operator.to_string(), reason.to_string()));
            Ok("0xdispute".to_string())
        }
    }

    struct MockVerifier {
        delta: i64,
    }

    #[async_trait]
    impl CloudVerifier for MockVerifier {
        async fn verify_node(
            &self,
            _agent_id: &str,
            _attestation_hash: &str,
        ) -> ClientResult<CloudVerification> {
            Ok(CloudVerification {
                verified: self.delta >= 0,
                level: 2,
                provider: "aws".to_string(),
                region: "eu-west-1".to_string(),
                hardware_id_hash: "ab".repeat(32),
                reputation_delta: self.delta,
            })
        }
    }

    struct Harness {
        executor: Arc<BenchmarkExecutor>,
        store: StateStore,
        chain: Arc<MockChain>,
    }

    fn harness(behavior: BenchBehavior, verifier: Option<Arc<dyn CloudVerifier>>) -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let clock = ManualClock::at(1_700_000_000_000);
        let chain = Arc::new(MockChain::default());
        let reputation = Arc::new(ReputationEngine::new(
            store.clone(),
            clock.clone(),
            ReputationThresholds::default(),
        ));
        let executor = Arc::new(BenchmarkExecutor::new(
            store.clone(),
            clock,
            Arc::new(MockBenchClient { behavior }),
            Some(chain.clone() as Arc<dyn ChainRegistry>),
            verifier,
            reputation,
            VerifyConfig::default(),
        ));
        Harness {
            executor,
            store,
            chain,
        }
    }

    #[tokio::test]
    async fn honest_machine_completes_with_zero_deviation() {
        let h = harness(BenchBehavior::Report(honest_report()), None);
        h.store.put_promise(&promise("mp-1")).unwrap();

        let job = h.executor.run("mp-1", TriggerType::Scheduled).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.deviation_pct, Some(0.0));
        assert!(job.result.is_some());
        assert!(job.error.is_none());

        let rep = h.store.get_reputation("mp-1").unwrap().unwrap();
        assert_eq!(rep.score, 55);
        assert_eq!(rep.pass_count, 1);

        let history = h.store.list_benchmark_records("mp-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].job_id, job.id);

        // Completed results are published; no dispute.
        assert_eq!(h.chain.submissions.lock().unwrap().len(), 1);
        assert!(h.chain.disputes.lock().unwrap().is_empty());
        assert_eq!(h.executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn unknown_machine_is_not_found() {
        let h = harness(BenchBehavior::Report(honest_report()), None);
        let result = h.executor.run("mp-ghost", TriggerType::Manual).await;
        assert!(matches!(result, Err(VerifyError::NotFound(_))));
        assert_eq!(h.executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_fails_job_and_frees_slot() {
        let h = harness(BenchBehavior::Fail, None);
        h.store.put_promise(&promise("mp-1")).unwrap();

        let job = h.executor.run("mp-1", TriggerType::Manual).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("benchmark call failed"));

        // No reputation movement, no history, slot free for the next tick.
        assert!(h.store.get_reputation("mp-1").unwrap().is_none());
        assert!(h.store.list_benchmark_records("mp-1").unwrap().is_empty());
        assert_eq!(h.executor.in_flight_count(), 0);

        // The machine can be benchmarked again immediately.
        assert!(h.executor.run("mp-1", TriggerType::Manual).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_report_fails_job_without_reputation_change() {
        let mut bogus = honest_report();
        bogus.overall_score = 50_000;
        let h = harness(BenchBehavior::Report(bogus), None);
        h.store.put_promise(&promise("mp-1")).unwrap();

        let job = h.executor.run("mp-1", TriggerType::Scheduled).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("report rejected"));
        assert!(h.store.get_reputation("mp-1").unwrap().is_none());
        assert_eq!(h.executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn severe_deviation_files_dispute() {
        // Claims 8 cores / 16 GB; delivers 2 cores / 4 GB and a quarter of
        // storage and bandwidth: deviation 75%.
        let mut weak = honest_report();
        weak.cpu.cores = 2;
        weak.memory.size_mb = 4_000;
        weak.storage.size_mb = 250_000;
        weak.network.bandwidth_mbps = 2_500;
        let h = harness(BenchBehavior::Report(weak), None);
        h.store.put_promise(&promise("mp-1")).unwrap();

        let job = h.executor.run("mp-1", TriggerType::Random).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.deviation_pct.unwrap() >= 50.0);

        let disputes = h.chain.disputes.lock().unwrap();
        assert_eq!(disputes.len(), 1);
        assert_eq!(disputes[0].0, "op-a");
        assert!(disputes[0].1.contains("mp-1"));

        let rep = h.store.get_reputation("mp-1").unwrap().unwrap();
        assert_eq!(rep.fail_count, 1);
        assert_eq!(rep.score, 35);
    }

    #[tokio::test]
    async fn cloud_verification_merges_when_tee_attested() {
        let mut attested = honest_report();
        attested.tee = Some(TeeMeasurement {
            detected: true,
            platform: Some(TeePlatform::Sev),
            attestation_valid: true,
            attestation_hash: Some("cd".repeat(32)),
        });
        let h = harness(
            BenchBehavior::Report(attested),
            Some(Arc::new(MockVerifier { delta: 7 })),
        );
        let mut p = promise("mp-1");
        p.agent_id = Some("agent-9".to_string());
        // The promise claims the matching TEE platform.
        p.spec.tee = Some(TeePlatform::Sev);
        h.store.put_promise(&p).unwrap();

        let job = h.executor.run("mp-1", TriggerType::Scheduled).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let merged = job.result.unwrap().cloud.unwrap();
        assert!(merged.verified);
        assert_eq!(merged.reputation_delta, 7);

        // 50 + 5 pass + 7 delta.
        let rep = h.store.get_reputation("mp-1").unwrap().unwrap();
        assert_eq!(rep.score, 62);
        assert!(rep.flags.iter().any(|f| f.contains("cloud verification passed")));
    }

    #[tokio::test]
    async fn no_agent_identity_skips_cloud_verification() {
        let mut attested = honest_report();
        attested.tee = Some(TeeMeasurement {
            detected: true,
            platform: Some(TeePlatform::Sev),
            attestation_valid: true,
            attestation_hash: Some("cd".repeat(32)),
        });
        let h = harness(
            BenchBehavior::Report(attested),
            Some(Arc::new(MockVerifier { delta: 7 })),
        );
        let mut p = promise("mp-1");
        p.spec.tee = Some(TeePlatform::Sev);
        h.store.put_promise(&p).unwrap(); // no agent_id

        let job = h.executor.run("mp-1", TriggerType::Scheduled).await.unwrap();
        assert!(job.result.unwrap().cloud.is_none());
    }

    #[tokio::test]
    async fn concurrent_triggers_keep_one_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(BenchBehavior::Gated(gate.clone(), honest_report()), None);
        h.store.put_promise(&promise("mp-1")).unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let executor = Arc::clone(&h.executor);
            handles.push(tokio::spawn(async move {
                executor.run("mp-1", TriggerType::Manual).await
            }));
        }

        // Give every task a chance to reach the claim.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.executor.in_flight_count(), 1);

        gate.add_permits(5);
        let mut completed = 0;
        let mut busy = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(job) => {
                    assert_eq!(job.status, JobStatus::Completed);
                    completed += 1;
                }
                Err(VerifyError::Busy(_)) => busy += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(busy, 4);
        assert_eq!(h.executor.in_flight_count(), 0);
        assert_eq!(h.store.list_jobs().unwrap().len(), 1);
    }
}
