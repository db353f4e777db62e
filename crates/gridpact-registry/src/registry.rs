//! MachineRegistry — owns promise registration, heartbeats, and queries.

use std::sync::Arc;

use tracing::{info, warn};

use gridpact_client::PlacementSync;
use gridpact_core::{Clock, Environment, ids};
use gridpact_state::*;

use crate::error::{RegistryError, RegistryResult};
use crate::validate::validate_spec;

/// Registry tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Expected operator heartbeat cadence. A promise is swept offline
    /// after three missed intervals.
    pub heartbeat_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// Registration input from an operator.
#[derive(Debug, Clone)]
pub struct NewMachine {
    pub operator: String,
    pub agent_id: Option<String>,
    pub spec: MachineSpec,
    pub capabilities: Capabilities,
    pub activation_endpoint: String,
    pub ssh_endpoint: Option<String>,
    pub price_per_hour_wei: u128,
    pub price_per_gb_wei: u128,
    pub min_lease_hours: u32,
    pub stake_wei: u128,
}

/// Optional constraints for listing available machines.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MachineFilter {
    pub region: Option<String>,
    pub min_cpu_cores: Option<u32>,
    pub min_memory_mb: Option<u64>,
    pub min_storage_mb: Option<u64>,
    #[serde(default)]
    pub gpu_required: bool,
    #[serde(default)]
    pub tee_required: bool,
    pub max_price_per_hour_wei: Option<u128>,
}

impl MachineFilter {
    /// Whether an available promise satisfies every set constraint.
    pub fn matches(&self, p: &MachinePromise) -> bool {
        if let Some(region) = &self.region {
            if &p.spec.location.region != region {
                return false;
            }
        }
        if let Some(min) = self.min_cpu_cores {
            if p.spec.cpu.cores < min {
                return false;
            }
        }
        if let Some(min) = self.min_memory_mb {
            if p.spec.memory.size_mb < min {
                return false;
            }
        }
        if let Some(min) = self.min_storage_mb {
            if p.spec.storage.size_mb < min {
                return false;
            }
        }
        if self.gpu_required && p.spec.gpu.is_none() {
            return false;
        }
        if self.tee_required && p.spec.tee.is_none() {
            return false;
        }
        if let Some(max) = self.max_price_per_hour_wei {
            if p.price_per_hour_wei > max {
                return false;
            }
        }
        true
    }
}

/// The machine promise registry.
pub struct MachineRegistry {
    store: StateStore,
    clock: Arc<dyn Clock>,
    placement: Arc<dyn PlacementSync>,
    env: Environment,
    config: RegistryConfig,
}

impl MachineRegistry {
    pub fn new(
        store: StateStore,
        clock: Arc<dyn Clock>,
        placement: Arc<dyn PlacementSync>,
        env: Environment,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            clock,
            placement,
            env,
            config,
        }
    }

    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.config.heartbeat_interval_ms
    }

    /// Register a new machine promise.
    ///
    /// Validates the claimed spec, enforces the environment's operator cap
    /// and minimum stake, and mirrors the promise into the external
    /// scheduling layer (mirror failures are logged, not fatal).
    pub async fn register(&self, new: NewMachine) -> RegistryResult<MachinePromise> {
        validate_spec(&new.spec)?;

        let cap = self.env.max_promises_per_operator();
        let held = self.list_by_operator(&new.operator)?.len();
        if held >= cap {
            return Err(RegistryError::OperatorAtCap {
                operator: new.operator,
                cap,
            });
        }

        let required_wei = self.env.min_stake_wei();
        if new.stake_wei < required_wei {
            return Err(RegistryError::StakeTooLow {
                offered_wei: new.stake_wei,
                required_wei,
            });
        }

        let now = self.clock.now_ms();
        let promise = MachinePromise {
            id: ids::new_id(ids::PROMISE),
            operator: new.operator,
            agent_id: new.agent_id,
            spec: new.spec,
            capabilities: new.capabilities,
            status: PromiseStatus::Available,
            activation_endpoint: new.activation_endpoint,
            ssh_endpoint: new.ssh_endpoint,
            price_per_hour_wei: new.price_per_hour_wei,
            price_per_gb_wei: new.price_per_gb_wei,
            min_lease_hours: new.min_lease_hours,
            stake_wei: new.stake_wei,
            registered_at: now,
            last_heartbeat: now,
            allocation_id: None,
            allocated_to: None,
            allocated_at: None,
        };
        self.store.put_promise(&promise)?;

        if let Err(e) = self.placement.register_machine(&promise).await {
            warn!(promise_id = %promise.id, error = %e, "placement sync register failed");
        }

        info!(
            promise_id = %promise.id,
            operator = %promise.operator,
            region = %promise.spec.location.region,
            cores = promise.spec.cpu.cores,
            "machine registered"
        );
        Ok(promise)
    }

    /// Record an operator heartbeat.
    ///
    /// Returns `Ok(false)` when the machine does not exist — a stale agent
    /// pinging after unregistration is routine, not an error. An offline
    /// promise recovers to available.
    pub fn heartbeat(&self, id: &str, operator: &str) -> RegistryResult<bool> {
        let Some(promise) = self.store.get_promise(id)? else {
            return Ok(false);
        };
        if promise.operator != operator {
            return Err(RegistryError::NotOwner(id.to_string()));
        }

        let was_offline = promise.status == PromiseStatus::Offline;
        let _ = self.store.touch_heartbeat(id, self.clock.now_ms())?;
        if was_offline {
            info!(promise_id = %id, "offline machine recovered on heartbeat");
        }
        Ok(true)
    }

    /// Remove a promise. Only idle (available/offline) promises may be
    /// destroyed; a leased machine must be released first.
    pub async fn unregister(&self, id: &str, operator: &str) -> RegistryResult<()> {
        let promise = self
            .store
            .get_promise(id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if promise.operator != operator {
            return Err(RegistryError::NotOwner(id.to_string()));
        }

        match self.store.remove_promise_if_idle(id)? {
            RemoveOutcome::Removed => {}
            RemoveOutcome::Busy => return Err(RegistryError::PromiseBusy(id.to_string())),
            RemoveOutcome::Missing => return Err(RegistryError::NotFound(id.to_string())),
        }

        if let Err(e) = self.placement.deregister_machine(id).await {
            warn!(promise_id = %id, error = %e, "placement sync deregister failed");
        }
        info!(promise_id = %id, %operator, "machine unregistered");
        Ok(())
    }

    /// Get a promise by id.
    pub fn get(&self, id: &str) -> RegistryResult<MachinePromise> {
        self.store
            .get_promise(id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// All promises registered by an operator.
    pub fn list_by_operator(&self, operator: &str) -> RegistryResult<Vec<MachinePromise>> {
        Ok(self
            .store
            .list_promises()?
            .into_iter()
            .filter(|p| p.operator == operator)
            .collect())
    }

    /// Available promises satisfying the filter.
    pub fn list_available(&self, filter: &MachineFilter) -> RegistryResult<Vec<MachinePromise>> {
        Ok(self
            .store
            .list_promises()?
            .into_iter()
            .filter(|p| p.status == PromiseStatus::Available && filter.matches(p))
            .collect())
    }

    /// Marketplace-wide aggregate statistics.
    pub fn stats(&self) -> RegistryResult<MarketStats> {
        let mut stats = MarketStats::default();
        for p in self.store.list_promises()? {
            let status = match p.status {
                PromiseStatus::Available => "available",
                PromiseStatus::Reserved => "reserved",
                PromiseStatus::Allocated => "allocated",
                PromiseStatus::Draining => "draining",
                PromiseStatus::Offline => "offline",
            };
            *stats.promises_by_status.entry(status.to_string()).or_insert(0) += 1;
            *stats
                .regions
                .entry(p.spec.location.region.clone())
                .or_insert(0) += 1;

            let gpus = p.spec.gpu.as_ref().map(|g| g.count as u64).unwrap_or(0);
            stats.total_cpu_cores += p.spec.cpu.cores as u64;
            stats.total_memory_mb += p.spec.memory.size_mb;
            stats.total_gpus += gpus;
            if p.status == PromiseStatus::Available {
                stats.available_cpu_cores += p.spec.cpu.cores as u64;
                stats.available_memory_mb += p.spec.memory.size_mb;
                stats.available_gpus += gpus;
            }
        }
        Ok(stats)
    }

    /// One heartbeat-sweep pass: mark stale available promises offline.
    ///
    /// Returns the ids that flipped. Each lapse flips a promise exactly
    /// once — already-offline machines are left alone until a heartbeat
    /// restores them.
    pub async fn sweep_once(&self) -> RegistryResult<Vec<String>> {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(3 * self.config.heartbeat_interval_ms);
        let mut flipped = Vec::new();

        for p in self.store.list_promises()? {
            if p.status != PromiseStatus::Available || p.last_heartbeat >= cutoff {
                continue;
            }
            if self.store.mark_offline_if_stale(&p.id, cutoff)? {
                warn!(
                    promise_id = %p.id,
                    operator = %p.operator,
                    last_heartbeat = p.last_heartbeat,
                    "machine marked offline after missed heartbeats"
                );
                if let Err(e) = self.placement.mark_offline(&p.id).await {
                    warn!(promise_id = %p.id, error = %e, "placement sync offline failed");
                }
                flipped.push(p.id);
            }
        }
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridpact_client::NullPlacementSync;
    use gridpact_core::ManualClock;

    fn test_spec() -> MachineSpec {
        MachineSpec {
            cpu: CpuSpec {
                cores: 8,
                model: "EPYC 7302".to_string(),
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
                zone: "eu-west-1a".to_string(),
                datacenter: "dc-3".to_string(),
            },
        }
    }

    fn new_machine(operator: &str) -> NewMachine {
        NewMachine {
            operator: operator.to_string(),
            agent_id: None,
            spec: test_spec(),
            capabilities: Capabilities {
                compute: true,
                ..Capabilities::default()
            },
            activation_endpoint: "http://203.0.113.7:7070".to_string(),
            ssh_endpoint: None,
            price_per_hour_wei: 1_000_000,
            price_per_gb_wei: 500,
            min_lease_hours: 1,
            stake_wei: 0,
        }
    }

    fn registry(env: Environment) -> (MachineRegistry, Arc<ManualClock>) {
        let clock = ManualClock::at(1_000_000);
        let registry = MachineRegistry::new(
            StateStore::open_in_memory().unwrap(),
            clock.clone(),
            Arc::new(NullPlacementSync),
            env,
            RegistryConfig::default(),
        );
        (registry, clock)
    }

    #[tokio::test]
    async fn register_creates_available_promise() {
        let (registry, _) = registry(Environment::Local);
        let promise = registry.register(new_machine("op-a")).await.unwrap();

        assert!(promise.id.starts_with("mp-"));
        assert_eq!(promise.status, PromiseStatus::Available);
        assert_eq!(promise.registered_at, 1_000_000);
        assert!(promise.allocation_id.is_none());

        let fetched = registry.get(&promise.id).unwrap();
        assert_eq!(fetched, promise);
    }

    #[tokio::test]
    async fn register_rejects_invalid_spec() {
        let (registry, _) = registry(Environment::Local);
        let mut new = new_machine("op-a");
        new.spec.cpu.cores = 0;

        assert!(matches!(
            registry.register(new).await,
            Err(RegistryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn register_enforces_operator_cap() {
        let (registry, _) = registry(Environment::Mainnet);
        let cap = Environment::Mainnet.max_promises_per_operator();

        for _ in 0..cap {
            let mut new = new_machine("op-a");
            new.stake_wei = Environment::Mainnet.min_stake_wei();
            registry.register(new).await.unwrap();
        }

        let mut over = new_machine("op-a");
        over.stake_wei = Environment::Mainnet.min_stake_wei();
        assert!(matches!(
            registry.register(over).await,
            Err(RegistryError::OperatorAtCap { .. })
        ));

        // A different operator is unaffected.
        let mut other = new_machine("op-b");
        other.stake_wei = Environment::Mainnet.min_stake_wei();
        assert!(registry.register(other).await.is_ok());
    }

    #[tokio::test]
    async fn register_enforces_minimum_stake() {
        let (registry, _) = registry(Environment::Testnet);
        let mut new = new_machine("op-a");
        new.stake_wei = Environment::Testnet.min_stake_wei() - 1;

        assert!(matches!(
            registry.register(new).await,
            Err(RegistryError::StakeTooLow { .. })
        ));
    }

    #[tokio::test]
    async fn heartbeat_unknown_machine_is_false_not_error() {
        let (registry, _) = registry(Environment::Local);
        assert!(!registry.heartbeat("mp-nope", "op-a").unwrap());
    }

    #[tokio::test]
    async fn heartbeat_wrong_operator_is_denied() {
        let (registry, _) = registry(Environment::Local);
        let promise = registry.register(new_machine("op-a")).await.unwrap();

        assert!(matches!(
            registry.heartbeat(&promise.id, "op-b"),
            Err(RegistryError::NotOwner(_))
        ));
    }

    #[tokio::test]
    async fn sweep_marks_stale_available_offline_exactly_once() {
        let (registry, clock) = registry(Environment::Local);
        let promise = registry.register(new_machine("op-a")).await.unwrap();

        // Within three intervals: nothing happens.
        clock.advance(2 * registry.heartbeat_interval_ms());
        assert!(registry.sweep_once().await.unwrap().is_empty());

        // Past three intervals: flips once.
        clock.advance(2 * registry.heartbeat_interval_ms());
        assert_eq!(registry.sweep_once().await.unwrap(), vec![promise.id.clone()]);
        assert_eq!(
            registry.get(&promise.id).unwrap().status,
            PromiseStatus::Offline
        );

        // Second sweep over the same lapse is a no-op.
        assert!(registry.sweep_once().await.unwrap().is_empty());

        // Heartbeat restores availability.
        assert!(registry.heartbeat(&promise.id, "op-a").unwrap());
        assert_eq!(
            registry.get(&promise.id).unwrap().status,
            PromiseStatus::Available
        );
    }

    #[tokio::test]
    async fn unregister_checks_owner_and_status() {
        let (registry, _) = registry(Environment::Local);
        let promise = registry.register(new_machine("op-a")).await.unwrap();

        assert!(matches!(
            registry.unregister(&promise.id, "op-b").await,
            Err(RegistryError::NotOwner(_))
        ));

        registry.unregister(&promise.id, "op-a").await.unwrap();
        assert!(matches!(
            registry.get(&promise.id),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.unregister(&promise.id, "op-a").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_available_applies_filters() {
        let (registry, _) = registry(Environment::Local);

        let small = registry.register(new_machine("op-a")).await.unwrap();

        let mut big = new_machine("op-a");
        big.spec.cpu.cores = 64;
        big.spec.gpu = Some(GpuSpec {
            model: "A100".to_string(),
            count: 2,
            memory_mb: 81_920,
        });
        big.spec.location.region = "us-east".to_string();
        big.price_per_hour_wei = 9_000_000;
        let big = registry.register(big).await.unwrap();

        let all = registry.list_available(&MachineFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let gpus = registry
            .list_available(&MachineFilter {
                gpu_required: true,
                ..MachineFilter::default()
            })
            .unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].id, big.id);

        let cheap = registry
            .list_available(&MachineFilter {
                max_price_per_hour_wei: Some(2_000_000),
                ..MachineFilter::default()
            })
            .unwrap();
        assert_eq!(cheap.len(), 1);
        assert_eq!(cheap[0].id, small.id);

        let eu_big = registry
            .list_available(&MachineFilter {
                region: Some("eu-west".to_string()),
                min_cpu_cores: Some(32),
                ..MachineFilter::default()
            })
            .unwrap();
        assert!(eu_big.is_empty());
    }

    #[tokio::test]
    async fn stats_aggregate_by_status_and_region() {
        let (registry, _) = registry(Environment::Local);
        registry.register(new_machine("op-a")).await.unwrap();

        let mut other = new_machine("op-b");
        other.spec.location.region = "us-east".to_string();
        other.spec.gpu = Some(GpuSpec {
            model: "L40".to_string(),
            count: 1,
            memory_mb: 49_152,
        });
        registry.register(other).await.unwrap();

        let stats = registry.stats().unwrap();
        assert_eq!(stats.promises_by_status.get("available"), Some(&2));
        assert_eq!(stats.total_cpu_cores, 16);
        assert_eq!(stats.available_cpu_cores, 16);
        assert_eq!(stats.total_gpus, 1);
        assert_eq!(stats.regions.get("eu-west"), Some(&1));
        assert_eq!(stats.regions.get("us-east"), Some(&1));
    }
}
