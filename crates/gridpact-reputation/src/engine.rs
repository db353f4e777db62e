//! Reputation adjustment after each completed benchmark.

use std::sync::Arc;

use tracing::{debug, info};

use gridpact_core::Clock;
use gridpact_state::{BenchmarkResult, MachineReputation, StateResult, StateStore};

/// Deviation bands that drive score movement.
#[derive(Debug, Clone, Copy)]
pub struct ReputationThresholds {
    /// Below this deviation percentage a benchmark counts as a pass.
    pub warn_pct: f64,
    /// At or above this deviation percentage a benchmark counts as a fail.
    pub fail_pct: f64,
}

impl Default for ReputationThresholds {
    fn default() -> Self {
        Self {
            warn_pct: 10.0,
            fail_pct: 25.0,
        }
    }
}

const SCORE_MIN: i64 = 0;
const SCORE_MAX: i64 = 100;
const PASS_REWARD: i64 = 5;
const WARN_PENALTY: i64 = 2;
const FAIL_PENALTY: i64 = 15;

/// Apply one benchmark outcome to a reputation record.
///
/// Pure so the clamping property is testable without a store.
pub fn apply_benchmark(
    rep: &mut MachineReputation,
    deviation_pct: f64,
    result: &BenchmarkResult,
    thresholds: ReputationThresholds,
    now_ms: u64,
) {
    rep.benchmark_count += 1;
    rep.last_benchmark_at = Some(now_ms);
    rep.last_deviation_pct = Some(deviation_pct);

    if deviation_pct < thresholds.warn_pct {
        rep.pass_count += 1;
        rep.score = (rep.score + PASS_REWARD).min(SCORE_MAX);
    } else if deviation_pct < thresholds.fail_pct {
        rep.score = (rep.score - WARN_PENALTY).max(SCORE_MIN);
    } else {
        rep.fail_count += 1;
        rep.score = (rep.score - FAIL_PENALTY).max(SCORE_MIN);
        rep.flags
            .push(format!("deviation {deviation_pct:.1}% at {now_ms}"));
    }

    if let Some(cloud) = &result.cloud {
        if cloud.reputation_delta != 0 {
            rep.score = (rep.score + cloud.reputation_delta).clamp(SCORE_MIN, SCORE_MAX);
            if cloud.verified {
                rep.flags.push(format!(
                    "cloud verification passed (level {}) at {now_ms}",
                    cloud.level
                ));
            } else {
                rep.flags
                    .push(format!("cloud verification failed at {now_ms}"));
            }
        }
    }
}

/// The reputation engine — exclusive owner of reputation records.
pub struct ReputationEngine {
    store: StateStore,
    clock: Arc<dyn Clock>,
    thresholds: ReputationThresholds,
}

impl ReputationEngine {
    pub fn new(store: StateStore, clock: Arc<dyn Clock>, thresholds: ReputationThresholds) -> Self {
        Self {
            store,
            clock,
            thresholds,
        }
    }

    /// Load-or-initialize the machine's record, apply one benchmark
    /// outcome, persist, and return the updated record.
    pub fn record_benchmark(
        &self,
        machine_id: &str,
        deviation_pct: f64,
        result: &BenchmarkResult,
    ) -> StateResult<MachineReputation> {
        let mut rep = self
            .store
            .get_reputation(machine_id)?
            .unwrap_or_else(|| MachineReputation::initial(machine_id));

        let before = rep.score;
        apply_benchmark(
            &mut rep,
            deviation_pct,
            result,
            self.thresholds,
            self.clock.now_ms(),
        );
        self.store.put_reputation(&rep)?;

        if rep.score < before {
            info!(
                %machine_id,
                deviation_pct,
                score = rep.score,
                "reputation decreased"
            );
        } else {
            debug!(%machine_id, deviation_pct, score = rep.score, "reputation updated");
        }
        Ok(rep)
    }

    /// A machine's reputation, if it has ever been benchmarked.
    pub fn get(&self, machine_id: &str) -> StateResult<Option<MachineReputation>> {
        self.store.get_reputation(machine_id)
    }
}
