//! gridpact-reputation — per-machine trust scoring.
//!
//! The reputation engine is the only writer of reputation records. Every
//! completed benchmark lands here exactly once: counters advance, the
//! score moves by the deviation band, and any signed delta from the
//! proof-of-cloud verifier is applied on top. Scores are integers clamped
//! to 0..=100; a fresh machine starts at 50.

pub mod engine;

pub use engine::{ReputationEngine, ReputationThresholds, apply_benchmark};
