//! Verification tuning knobs.

use gridpact_reputation::ReputationThresholds;

/// Configuration for benchmark scheduling and execution.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Benchmark container image dispatched to operator agents.
    pub benchmark_image: String,
    /// Client-side deadline for one benchmark run.
    pub benchmark_timeout_ms: u64,
    /// Global cap on simultaneously running benchmarks.
    pub max_concurrent_benchmarks: usize,
    /// Probability (percent) of a spot check on any eligible day.
    pub spot_check_pct: f64,
    /// Re-verification interval for machines scoring below 30.
    pub low_tier_interval_days: f64,
    /// Re-verification interval for machines scoring 30..70.
    pub mid_tier_interval_days: f64,
    /// Re-verification interval for machines scoring 70 and above.
    pub high_tier_interval_days: f64,
    /// Deviation percentage logged as a warning.
    pub warn_threshold_pct: f64,
    /// Deviation percentage counted as a failed benchmark.
    pub fail_threshold_pct: f64,
    /// Deviation percentage that files an on-chain dispute.
    pub slash_threshold_pct: f64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            benchmark_image: "gridpact/bench:latest".to_string(),
            benchmark_timeout_ms: 5 * 60 * 1_000,
            max_concurrent_benchmarks: 5,
            spot_check_pct: 1.0,
            low_tier_interval_days: 7.0,
            mid_tier_interval_days: 30.0,
            high_tier_interval_days: 90.0,
            warn_threshold_pct: 10.0,
            fail_threshold_pct: 25.0,
            slash_threshold_pct: 50.0,
        }
    }
}

impl VerifyConfig {
    /// The reputation bands implied by this config.
    pub fn reputation_thresholds(&self) -> ReputationThresholds {
        ReputationThresholds {
            warn_pct: self.warn_threshold_pct,
            fail_pct: self.fail_threshold_pct,
        }
    }
}
