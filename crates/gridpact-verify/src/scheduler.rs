//! BenchmarkScheduler — reputation-tiered re-verification cadence.
//!
//! Runs on a fixed tick. Machines that have never been checked are
//! benchmarked immediately; after that, the interval stretches with the
//! machine's trust score, and on any eligible day a low-probability spot
//! check can fire regardless of the schedule.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gridpact_core::Clock;
use gridpact_state::{JobStatus, MachineReputation, PromiseStatus, StateStore, TriggerType};

use crate::config::VerifyConfig;
use crate::error::VerifyResult;
use crate::executor::BenchmarkExecutor;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Source of the uniform [0, 100) spot-check draw. A trait so tests fix
/// the outcome instead of sampling.
pub trait Sampler: Send + Sync {
    fn draw_percent(&self) -> f64;
}

/// Production sampler backed by the thread RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn draw_percent(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

/// Sampler that always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub f64);

impl Sampler for FixedSampler {
    fn draw_percent(&self) -> f64 {
        self.0
    }
}

/// Decide whether a machine is due for verification.
///
/// `reputation` is `None` for machines that have never been benchmarked.
pub fn should_benchmark(
    reputation: Option<&MachineReputation>,
    now_ms: u64,
    config: &VerifyConfig,
    sampler: &dyn Sampler,
) -> Option<TriggerType> {
    let Some(rep) = reputation else {
        return Some(TriggerType::Scheduled);
    };
    if rep.benchmark_count == 0 {
        return Some(TriggerType::Scheduled);
    }

    let last = rep.last_benchmark_at.unwrap_or(0);
    let elapsed_days = now_ms.saturating_sub(last) as f64 / MS_PER_DAY;

    let interval_days = if rep.score < 30 {
        config.low_tier_interval_days
    } else if rep.score < 70 {
        config.mid_tier_interval_days
    } else {
        config.high_tier_interval_days
    };

    if elapsed_days >= interval_days {
        return Some(TriggerType::Scheduled);
    }
    if elapsed_days >= 1.0 && sampler.draw_percent() < config.spot_check_pct {
        return Some(TriggerType::Random);
    }
    None
}

/// The benchmark scheduler — decides and dispatches, never executes.
pub struct BenchmarkScheduler {
    store: StateStore,
    clock: Arc<dyn Clock>,
    executor: Arc<BenchmarkExecutor>,
    config: VerifyConfig,
    sampler: Arc<dyn Sampler>,
}

impl BenchmarkScheduler {
    pub fn new(
        store: StateStore,
        clock: Arc<dyn Clock>,
        executor: Arc<BenchmarkExecutor>,
        config: VerifyConfig,
        sampler: Arc<dyn Sampler>,
    ) -> Self {
        Self {
            store,
            clock,
            executor,
            config,
            sampler,
        }
    }

    /// One scheduling pass.
    ///
    /// Walks available promises not already in flight, dispatches due
    /// benchmarks as supervised tasks, and stops once the tick's
    /// concurrency budget (`max_concurrent − in_flight`) is spent.
    /// Returns the number of dispatches.
    pub fn tick(&self) -> VerifyResult<usize> {
        let mut budget = self
            .config
            .max_concurrent_benchmarks
            .saturating_sub(self.executor.in_flight_count());
        let now = self.clock.now_ms();
        let mut dispatched = 0;

        for promise in self.store.list_promises()? {
            if budget == 0 {
                debug!("benchmark budget exhausted for this tick");
                break;
            }
            if promise.status != PromiseStatus::Available {
                continue;
            }
            if self.executor.is_in_flight(&promise.id) {
                continue;
            }

            let reputation = self.store.get_reputation(&promise.id)?;
            let Some(trigger) =
                should_benchmark(reputation.as_ref(), now, &self.config, self.sampler.as_ref())
            else {
                continue;
            };

            budget -= 1;
            dispatched += 1;
            debug!(promise_id = %promise.id, ?trigger, "benchmark due");

            let executor = Arc::clone(&self.executor);
            let machine_id = promise.id.clone();
            tokio::spawn(async move {
                match executor.run(&machine_id, trigger).await {
                    Ok(job) if job.status == JobStatus::Failed => {
                        warn!(
                            %machine_id,
                            job_id = %job.id,
                            error = job.error.as_deref().unwrap_or("unknown"),
                            "scheduled benchmark failed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(%machine_id, error = %e, "scheduled benchmark not run"),
                }
            });
        }
        Ok(dispatched)
    }
}

/// Spawn the benchmark tick loop.
pub fn spawn_benchmark_scheduler(
    scheduler: Arc<BenchmarkScheduler>,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_s = tick_interval.as_secs(),
            "benchmark scheduler started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(tick_interval) => {
                    match scheduler.tick() {
                        Ok(count) if count > 0 => {
                            debug!(dispatched = count, "benchmark tick dispatched");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "benchmark tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("benchmark scheduler shutting down");
                    break;
                }
            }
        }
    })
}
