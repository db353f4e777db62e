//! gridpact-verify — the verification engine.
//!
//! Operators have a financial incentive to overstate hardware, so the
//! marketplace re-measures machines on a cadence driven by their trust
//! history:
//!
//! - `scheduler`: reputation-tiered re-verification intervals plus a
//!   low-probability random spot check, under a global concurrency budget
//! - `executor`: dispatches one benchmark to a machine, strictly validates
//!   the report, scores deviation, merges proof-of-cloud results, updates
//!   reputation, and files disputes past the slashing threshold
//! - `deviation`: the claimed-vs-actual component scoring
//! - `validate`: strict payload validation (ranges, categories, hashes)
//!
//! Per machine at most one benchmark is ever in flight; the in-flight
//! claim is released on every exit path.

pub mod config;
pub mod deviation;
pub mod error;
pub mod executor;
pub mod scheduler;
pub mod validate;

pub use config::VerifyConfig;
pub use deviation::deviation_pct;
pub use error::{VerifyError, VerifyResult};
pub use executor::BenchmarkExecutor;
pub use scheduler::{
    BenchmarkScheduler, FixedSampler, RandomSampler, Sampler, should_benchmark,
    spawn_benchmark_scheduler,
};
pub use validate::validate_result;
