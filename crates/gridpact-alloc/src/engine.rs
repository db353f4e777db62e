//! AllocationEngine — lease lifecycle and supervised activation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use gridpact_client::{ActivateRequest, MachineClient};
use gridpact_core::{Clock, Environment, ids};
use gridpact_state::*;

use crate::error::{AllocError, AllocResult};
use crate::matcher::{Requirements, rank_candidates};

/// Allocation engine tuning knobs.
#[derive(Debug, Clone)]
pub struct AllocConfig {
    /// Deadline for the operator's `/v1/activate` call.
    pub activation_timeout_ms: u64,
    /// Deadline for the operator's `/v1/deactivate` call.
    pub deactivation_timeout_ms: u64,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            activation_timeout_ms: 30_000,
            deactivation_timeout_ms: 10_000,
        }
    }
}

/// The allocation engine — exclusive owner of allocation records.
///
/// Cheap to clone (all fields are handles); activation tasks run on a
/// clone so dispatches never borrow the caller.
#[derive(Clone)]
pub struct AllocationEngine {
    store: StateStore,
    clock: Arc<dyn Clock>,
    client: Arc<dyn MachineClient>,
    env: Environment,
    config: AllocConfig,
}

impl AllocationEngine {
    pub fn new(
        store: StateStore,
        clock: Arc<dyn Clock>,
        client: Arc<dyn MachineClient>,
        env: Environment,
        config: AllocConfig,
    ) -> Self {
        Self {
            store,
            clock,
            client,
            env,
            config,
        }
    }

    /// Lease a machine matching the requirements.
    ///
    /// The winning promise is flipped to `Reserved` before any network
    /// call, so a concurrent `allocate` can never double-book it; losing
    /// a reservation race falls through to the next-ranked candidate.
    /// The returned allocation is `Pending` — activation resolves
    /// asynchronously.
    pub async fn allocate(&self, user: &str, req: &Requirements) -> AllocResult<MachineAllocation> {
        let ranked = rank_candidates(self.store.list_promises()?, req);
        if ranked.is_empty() {
            return Err(AllocError::NoSuitableMachine);
        }

        let now = self.clock.now_ms();
        let mut reserved = None;
        for candidate in ranked {
            if self.store.try_reserve_promise(&candidate.id, now)? {
                reserved = Some(candidate);
                break;
            }
        }
        let promise = reserved.ok_or(AllocError::NoSuitableMachine)?;

        let alloc = MachineAllocation {
            id: ids::new_id(ids::ALLOCATION),
            promise_id: promise.id.clone(),
            user: user.to_string(),
            spec: promise.spec.clone(),
            capabilities: promise.capabilities,
            status: AllocationStatus::Pending,
            node_id: None,
            node_endpoint: None,
            started_at: now,
            ended_at: None,
            cost_wei: 0,
            last_billed_at: now,
            usage: ResourceUsage::default(),
            container_count: 0,
        };
        self.store.put_allocation(&alloc)?;

        info!(
            allocation_id = %alloc.id,
            promise_id = %promise.id,
            %user,
            "promise reserved, activation dispatched"
        );

        let engine = self.clone();
        let task_alloc = alloc.clone();
        tokio::spawn(async move {
            engine.run_activation(promise, task_alloc).await;
        });

        Ok(alloc)
    }

    /// The supervised activation unit: one outbound call whose outcome is
    /// always converted into a state transition on the allocation.
    async fn run_activation(&self, promise: MachinePromise, alloc: MachineAllocation) {
        // Best effort: release may already have raced past us.
        let _ = self.store.update_allocation(&alloc.id, |a| {
            if a.status != AllocationStatus::Pending {
                return false;
            }
            a.status = AllocationStatus::Activating;
            true
        });

        let request = ActivateRequest {
            allocation_id: alloc.id.clone(),
            user: alloc.user.clone(),
            specs: alloc.spec.clone(),
        };
        let timeout = Duration::from_millis(self.config.activation_timeout_ms);
        let outcome = self
            .client
            .activate(&promise.activation_endpoint, &request, timeout)
            .await;

        match outcome {
            Ok(resp) => {
                let updated = self.store.update_allocation(&alloc.id, |a| {
                    if !a.status.awaits_activation() {
                        return false;
                    }
                    a.status = AllocationStatus::Active;
                    a.node_id = Some(resp.node_id.clone());
                    a.node_endpoint = Some(resp.endpoint.clone());
                    true
                });
                match updated {
                    Ok(Some(active)) => {
                        let linked = self.store.update_promise(&promise.id, |p| {
                            if p.status != PromiseStatus::Reserved {
                                return false;
                            }
                            p.status = PromiseStatus::Allocated;
                            p.allocation_id = Some(active.id.clone());
                            p.allocated_to = Some(active.user.clone());
                            true
                        });
                        match linked {
                            Ok(Some(_)) => info!(
                                allocation_id = %alloc.id,
                                promise_id = %promise.id,
                                node_id = %resp.node_id,
                                "allocation active"
                            ),
                            Ok(None) => warn!(
                                allocation_id = %alloc.id,
                                promise_id = %promise.id,
                                "promise left reserved state during activation"
                            ),
                            Err(e) => error!(
                                allocation_id = %alloc.id,
                                error = %e,
                                "failed to link promise after activation"
                            ),
                        }
                    }
                    Ok(None) => {
                        // Released while the call was outstanding: the lease
                        // is dead, so tear the late activation down.
                        warn!(
                            allocation_id = %alloc.id,
                            promise_id = %promise.id,
                            "activation completed after release, discarding"
                        );
                        let deadline =
                            Duration::from_millis(self.config.deactivation_timeout_ms);
                        if let Err(e) = self
                            .client
                            .deactivate(&promise.activation_endpoint, &alloc.id, deadline)
                            .await
                        {
                            warn!(allocation_id = %alloc.id, error = %e, "late deactivate failed");
                        }
                    }
                    Err(e) => error!(
                        allocation_id = %alloc.id,
                        error = %e,
                        "failed to record activation result"
                    ),
                }
            }
            Err(e) => {
                warn!(
                    allocation_id = %alloc.id,
                    promise_id = %promise.id,
                    error = %e,
                    "activation failed, rolling back"
                );
                self.fail_allocation(&alloc.id, &promise.id);
            }
        }
    }

    /// Roll an unactivated allocation to `Failed` and free its promise.
    fn fail_allocation(&self, allocation_id: &str, promise_id: &str) {
        let now = self.clock.now_ms();
        let failed = self.store.update_allocation(allocation_id, |a| {
            if !a.status.awaits_activation() {
                return false;
            }
            a.status = AllocationStatus::Failed;
            a.ended_at = Some(now);
            true
        });
        if let Err(e) = &failed {
            error!(%allocation_id, error = %e, "failed to mark allocation failed");
        }
        if matches!(failed, Ok(Some(_))) {
            let freed = self.store.update_promise(promise_id, |p| {
                if p.status != PromiseStatus::Reserved {
                    return false;
                }
                p.status = PromiseStatus::Available;
                p.allocation_id = None;
                p.allocated_to = None;
                p.allocated_at = None;
                true
            });
            if let Err(e) = freed {
                error!(%promise_id, error = %e, "failed to free promise after rollback");
            }
        }
    }

    /// Release a lease.
    ///
    /// Idempotent once the allocation is terminal. Deactivation failures
    /// are logged and never prevent the release from completing.
    pub async fn release(&self, allocation_id: &str, user: &str) -> AllocResult<MachineAllocation> {
        let alloc = self
            .store
            .get_allocation(allocation_id)?
            .ok_or_else(|| AllocError::NotFound(allocation_id.to_string()))?;
        if alloc.user != user {
            return Err(AllocError::NotOwner(allocation_id.to_string()));
        }
        if matches!(
            alloc.status,
            AllocationStatus::Terminated | AllocationStatus::Failed
        ) {
            return Ok(alloc);
        }

        let began = self.store.update_allocation(allocation_id, |a| {
            if matches!(
                a.status,
                AllocationStatus::Terminated | AllocationStatus::Failed
            ) {
                return false;
            }
            a.status = AllocationStatus::Terminating;
            true
        })?;
        if began.is_none() {
            // Raced to a terminal state; nothing left to do.
            return self.get(allocation_id);
        }

        let promise = self.store.get_promise(&alloc.promise_id)?;
        if let Some(p) = &promise {
            let _ = self.store.update_promise(&p.id, |p| {
                if !matches!(p.status, PromiseStatus::Reserved | PromiseStatus::Allocated) {
                    return false;
                }
                p.status = PromiseStatus::Draining;
                true
            })?;

            let deadline = Duration::from_millis(self.config.deactivation_timeout_ms);
            if let Err(e) = self
                .client
                .deactivate(&p.activation_endpoint, allocation_id, deadline)
                .await
            {
                warn!(%allocation_id, promise_id = %p.id, error = %e, "deactivate failed during release");
            }
        }

        let now = self.clock.now_ms();
        let (hourly_wei, min_hours) = promise
            .as_ref()
            .map(|p| (p.price_per_hour_wei, p.min_lease_hours as u64))
            .unwrap_or((0, 0));
        let released = self
            .store
            .update_allocation(allocation_id, |a| {
                a.status = AllocationStatus::Terminated;
                a.ended_at = Some(now);
                let elapsed_hours = now.saturating_sub(a.started_at).div_ceil(3_600_000);
                a.cost_wei = u128::from(elapsed_hours.max(min_hours)) * hourly_wei;
                a.last_billed_at = now;
                true
            })?
            .ok_or_else(|| AllocError::NotFound(allocation_id.to_string()))?;

        if let Some(p) = &promise {
            let _ = self.store.update_promise(&p.id, |p| {
                if p.status != PromiseStatus::Draining {
                    return false;
                }
                p.status = PromiseStatus::Available;
                p.allocation_id = None;
                p.allocated_to = None;
                p.allocated_at = None;
                true
            })?;
        }

        info!(
            %allocation_id,
            promise_id = %alloc.promise_id,
            cost_wei = %released.cost_wei,
            "allocation released"
        );
        Ok(released)
    }

    /// One janitor pass: fail allocations whose activation never resolved
    /// within the environment's timeout and free their promises.
    pub fn reap_stuck(&self) -> AllocResult<Vec<String>> {
        let now = self.clock.now_ms();
        let timeout = self.env.allocation_timeout_ms();
        let mut reaped = Vec::new();

        for alloc in self.store.list_allocations()? {
            if !alloc.status.awaits_activation() {
                continue;
            }
            let promise = self.store.get_promise(&alloc.promise_id)?;
            let reserved_at = promise
                .as_ref()
                .and_then(|p| p.allocated_at)
                .unwrap_or(alloc.started_at);
            if now.saturating_sub(reserved_at) <= timeout {
                continue;
            }

            warn!(
                allocation_id = %alloc.id,
                promise_id = %alloc.promise_id,
                age_ms = now.saturating_sub(reserved_at),
                "failing stuck allocation"
            );
            self.fail_allocation(&alloc.id, &alloc.promise_id);
            reaped.push(alloc.id);
        }
        Ok(reaped)
    }

    /// Get an allocation by id.
    pub fn get(&self, id: &str) -> AllocResult<MachineAllocation> {
        self.store
            .get_allocation(id)?
            .ok_or_else(|| AllocError::NotFound(id.to_string()))
    }

    /// All allocations held by a user.
    pub fn list_for_user(&self, user: &str) -> AllocResult<Vec<MachineAllocation>> {
        Ok(self.store.list_allocations_for_user(user)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridpact_client::{ActivateResponse, BenchmarkRequest, ClientError, ClientResult};
    use gridpact_core::ManualClock;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// What the mock operator agent should do with activation calls.
    enum ActivateBehavior {
        Succeed,
        Fail,
        /// Wait for a permit, then succeed.
        Gated(Arc<Semaphore>),
    }

    struct MockClient {
        behavior: ActivateBehavior,
        deactivations: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn new(behavior: ActivateBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                deactivations: Mutex::new(Vec::new()),
            })
        }

        fn deactivated(&self) -> Vec<String> {
            self.deactivations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MachineClient for MockClient {
        async fn activate(
            &self,
            _endpoint: &str,
            req: &ActivateRequest,
            _timeout: Duration,
        ) -> ClientResult<ActivateResponse> {
            match &self.behavior {
                ActivateBehavior::Succeed => {}
                ActivateBehavior::Fail => return Err(ClientError::Status(503)),
                ActivateBehavior::Gated(gate) => {
                    let _permit = gate.acquire().await.map_err(|_| ClientError::Status(500))?;
                }
            }
            Ok(ActivateResponse {
                node_id: format!("node-{}", req.allocation_id),
                endpoint: "10.0.0.9:9000".to_string(),
            })
        }

        async fn deactivate(
            &self,
            _endpoint: &str,
            allocation_id: &str,
            _timeout: Duration,
        ) -> ClientResult<()> {
            self.deactivations
                .lock()
                .unwrap()
                .push(allocation_id.to_string());
            Ok(())
        }

        async fn run_benchmark(
            &self,
            _endpoint: &str,
            _req: &BenchmarkRequest,
            _timeout: Duration,
        ) -> ClientResult<BenchmarkResult> {
            Err(ClientError::Status(501))
        }
    }

    fn promise(id: &str, cores: u32, price: u128, registered_at: u64) -> MachinePromise {
        MachinePromise {
            id: id.to_string(),
            operator: "op".to_string(),
            agent_id: None,
            spec: MachineSpec {
                cpu: CpuSpec {
                    cores,
                    model: "test".to_string(),
                    architecture: "x86_64".to_string(),
                    frequency_mhz: 3_000,
                },
                memory: MemorySpec {
                    size_mb: 32_768,
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
            },
            capabilities: Capabilities::default(),
            status: PromiseStatus::Available,
            activation_endpoint: "http://host:7070".to_string(),
            ssh_endpoint: None,
            price_per_hour_wei: price,
            price_per_gb_wei: 0,
            min_lease_hours: 1,
            stake_wei: 0,
            registered_at,
            last_heartbeat: registered_at,
            allocation_id: None,
            allocated_to: None,
            allocated_at: None,
        }
    }

    fn requirements() -> Requirements {
        Requirements {
            min_cpu_cores: 4,
            min_memory_mb: 1_024,
            min_storage_mb: 10_000,
            ..Requirements::default()
        }
    }

    fn engine(client: Arc<MockClient>) -> (Arc<AllocationEngine>, StateStore, Arc<ManualClock>) {
        let store = StateStore::open_in_memory().unwrap();
        let clock = ManualClock::at(1_000_000);
        let engine = Arc::new(AllocationEngine::new(
            store.clone(),
            clock.clone(),
            client,
            Environment::Local,
            AllocConfig::default(),
        ));
        (engine, store, clock)
    }

    /// Poll until the predicate holds or a wall-clock deadline passes.
    async fn wait_until<F: Fn() -> bool>(pred: F) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn allocate_activates_best_fit() {
        let client = MockClient::new(ActivateBehavior::Succeed);
        let (engine, store, _) = engine(client);
        store.put_promise(&promise("mp-big", 64, 100, 1_000)).unwrap();
        store.put_promise(&promise("mp-fit", 8, 100, 1_000)).unwrap();

        let alloc = engine.allocate("alice", &requirements()).await.unwrap();
        assert_eq!(alloc.promise_id, "mp-fit");
        assert_eq!(alloc.status, AllocationStatus::Pending);

        let store2 = store.clone();
        let id = alloc.id.clone();
        wait_until(move || {
            store2.get_allocation(&id).unwrap().unwrap().status == AllocationStatus::Active
        })
        .await;

        let active = store.get_allocation(&alloc.id).unwrap().unwrap();
        assert_eq!(active.node_id.as_deref(), Some(format!("node-{}", alloc.id).as_str()));

        let p = store.get_promise("mp-fit").unwrap().unwrap();
        assert_eq!(p.status, PromiseStatus::Allocated);
        assert_eq!(p.allocation_id, Some(alloc.id.clone()));
        assert_eq!(p.allocated_to.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn allocate_with_no_match_changes_nothing() {
        let client = MockClient::new(ActivateBehavior::Succeed);
        let (engine, store, _) = engine(client);
        store.put_promise(&promise("mp-1", 2, 100, 1_000)).unwrap();

        let result = engine.allocate("alice", &requirements()).await;
        assert!(matches!(result, Err(AllocError::NoSuitableMachine)));

        assert!(store.list_allocations().unwrap().is_empty());
        let p = store.get_promise("mp-1").unwrap().unwrap();
        assert_eq!(p.status, PromiseStatus::Available);
    }

    #[tokio::test]
    async fn activation_failure_rolls_back() {
        let client = MockClient::new(ActivateBehavior::Fail);
        let (engine, store, _) = engine(client);
        store.put_promise(&promise("mp-1", 8, 100, 1_000)).unwrap();

        let alloc = engine.allocate("alice", &requirements()).await.unwrap();

        let store2 = store.clone();
        let id = alloc.id.clone();
        wait_until(move || {
            store2.get_allocation(&id).unwrap().unwrap().status == AllocationStatus::Failed
        })
        .await;

        let p = store.get_promise("mp-1").unwrap().unwrap();
        assert_eq!(p.status, PromiseStatus::Available);
        assert!(p.allocation_id.is_none());
        assert!(p.allocated_at.is_none());
    }

    #[tokio::test]
    async fn concurrent_allocates_never_double_book() {
        let client = MockClient::new(ActivateBehavior::Succeed);
        let (engine, store, _) = engine(client);
        store.put_promise(&promise("mp-only", 8, 100, 1_000)).unwrap();

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.allocate("alice", &requirements()).await })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.allocate("bob", &requirements()).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let capacity_errors = results
            .iter()
            .filter(|r| matches!(r, Err(AllocError::NoSuitableMachine)))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(capacity_errors, 1);
        assert_eq!(store.list_allocations().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn release_before_activation_leaves_no_leaked_reservation() {
        let gate = Arc::new(Semaphore::new(0));
        let client = MockClient::new(ActivateBehavior::Gated(gate.clone()));
        let (engine, store, _) = engine(client.clone());
        store.put_promise(&promise("mp-1", 8, 100, 1_000)).unwrap();

        let alloc = engine.allocate("alice", &requirements()).await.unwrap();

        // Release while the activation call is still blocked.
        let released = engine.release(&alloc.id, "alice").await.unwrap();
        assert_eq!(released.status, AllocationStatus::Terminated);
        assert_eq!(
            store.get_promise("mp-1").unwrap().unwrap().status,
            PromiseStatus::Available
        );

        // Unblock the activation; the late result must be discarded and
        // torn down, not resurrect the lease.
        gate.add_permits(1);
        let client2 = client.clone();
        let id = alloc.id.clone();
        wait_until(move || client2.deactivated().iter().filter(|d| **d == id).count() >= 2).await;

        let after = store.get_allocation(&alloc.id).unwrap().unwrap();
        assert_eq!(after.status, AllocationStatus::Terminated);
        assert_eq!(
            store.get_promise("mp-1").unwrap().unwrap().status,
            PromiseStatus::Available
        );
    }

    #[tokio::test]
    async fn release_is_idempotent_and_owner_checked() {
        let client = MockClient::new(ActivateBehavior::Succeed);
        let (engine, store, _) = engine(client);
        store.put_promise(&promise("mp-1", 8, 100, 1_000)).unwrap();

        let alloc = engine.allocate("alice", &requirements()).await.unwrap();
        let store2 = store.clone();
        let id = alloc.id.clone();
        wait_until(move || {
            store2.get_allocation(&id).unwrap().unwrap().status == AllocationStatus::Active
        })
        .await;

        assert!(matches!(
            engine.release(&alloc.id, "mallory").await,
            Err(AllocError::NotOwner(_))
        ));
        assert!(matches!(
            engine.release("al-nope", "alice").await,
            Err(AllocError::NotFound(_))
        ));

        let first = engine.release(&alloc.id, "alice").await.unwrap();
        assert_eq!(first.status, AllocationStatus::Terminated);
        let second = engine.release(&alloc.id, "alice").await.unwrap();
        assert_eq!(second.status, AllocationStatus::Terminated);
        assert_eq!(second.ended_at, first.ended_at);
    }

    #[tokio::test]
    async fn release_accrues_minimum_lease_cost() {
        let client = MockClient::new(ActivateBehavior::Succeed);
        let (engine, store, clock) = engine(client);
        let mut p = promise("mp-1", 8, 1_000, 1_000);
        p.min_lease_hours = 2;
        store.put_promise(&p).unwrap();

        let alloc = engine.allocate("alice", &requirements()).await.unwrap();
        let store2 = store.clone();
        let id = alloc.id.clone();
        wait_until(move || {
            store2.get_allocation(&id).unwrap().unwrap().status == AllocationStatus::Active
        })
        .await;

        // Released after 30 virtual minutes — still billed the 2-hour floor.
        clock.advance(30 * 60 * 1_000);
        let released = engine.release(&alloc.id, "alice").await.unwrap();
        assert_eq!(released.cost_wei, 2 * 1_000);
    }

    #[tokio::test]
    async fn janitor_reaps_stuck_allocation() {
        let gate = Arc::new(Semaphore::new(0));
        let client = MockClient::new(ActivateBehavior::Gated(gate));
        let (engine, store, clock) = engine(client);
        store.put_promise(&promise("mp-1", 8, 100, 1_000)).unwrap();

        let alloc = engine.allocate("alice", &requirements()).await.unwrap();

        // Inside the window: nothing reaped.
        assert!(engine.reap_stuck().unwrap().is_empty());

        clock.advance(Environment::Local.allocation_timeout_ms() + 1);
        assert_eq!(engine.reap_stuck().unwrap(), vec![alloc.id.clone()]);

        let failed = store.get_allocation(&alloc.id).unwrap().unwrap();
        assert_eq!(failed.status, AllocationStatus::Failed);
        assert_eq!(
            store.get_promise("mp-1").unwrap().unwrap().status,
            PromiseStatus::Available
        );
    }
}
