//! Deviation scoring — how far a machine's measured hardware strays from
//! its operator's claims.
//!
//! Each applicable claimed/actual pair contributes one component in
//! [0, 1]; the deviation percentage is the mean of all components × 100.
//! A claim with nothing to compare against (no GPU claimed, no TEE
//! claimed) contributes nothing rather than a zero, so honest small
//! machines aren't diluted into passing grades for dishonest big ones.

use gridpact_state::{BenchmarkResult, MachineSpec};

/// GPU claimed but the benchmark saw none: maximal mismatch.
const GPU_MISSING: f64 = 1.0;
/// TEE claimed but not detected.
const TEE_MISSING: f64 = 1.0;
/// TEE detected but its attestation did not verify.
const TEE_ATTESTATION_INVALID: f64 = 0.5;
/// TEE detected and attested, but on a different platform than claimed.
const TEE_PLATFORM_MISMATCH: f64 = 0.3;

/// Relative difference bounded to [0, 1]. Callers guarantee claimed > 0.
fn relative_diff(claimed: f64, actual: f64) -> f64 {
    ((claimed - actual).abs() / claimed).min(1.0)
}

/// Collect the applicable deviation components for a claim/report pair.
pub(crate) fn components(claimed: &MachineSpec, actual: &BenchmarkResult) -> Vec<f64> {
    let mut parts = Vec::new();

    if claimed.cpu.cores > 0 {
        parts.push(relative_diff(
            claimed.cpu.cores as f64,
            actual.cpu.cores as f64,
        ));
    }
    if claimed.memory.size_mb > 0 {
        parts.push(relative_diff(
            claimed.memory.size_mb as f64,
            actual.memory.size_mb as f64,
        ));
    }
    if claimed.storage.size_mb > 0 {
        parts.push(relative_diff(
            claimed.storage.size_mb as f64,
            actual.storage.size_mb as f64,
        ));
    }
    if claimed.network.bandwidth_mbps > 0 {
        parts.push(relative_diff(
            claimed.network.bandwidth_mbps as f64,
            actual.network.bandwidth_mbps as f64,
        ));
    }

    if let Some(gpu_claim) = &claimed.gpu {
        if gpu_claim.count > 0 && !gpu_claim.model.trim().is_empty() {
            match &actual.gpu {
                Some(measured) if measured.detected => {
                    if gpu_claim.memory_mb > 0 {
                        parts.push(relative_diff(
                            gpu_claim.memory_mb as f64,
                            measured.memory_mb as f64,
                        ));
                    }
                }
                _ => parts.push(GPU_MISSING),
            }
        }
    }

    if let Some(platform_claim) = claimed.tee {
        match &actual.tee {
            Some(measured) if measured.detected => {
                if !measured.attestation_valid {
                    parts.push(TEE_ATTESTATION_INVALID);
                } else if measured.platform != Some(platform_claim) {
                    parts.push(TEE_PLATFORM_MISMATCH);
                }
            }
            _ => parts.push(TEE_MISSING),
        }
    }

    parts
}

/// Deviation percentage for a claim/report pair. Zero when nothing was
/// comparable.
pub fn deviation_pct(claimed: &MachineSpec, actual: &BenchmarkResult) -> f64 {
    let parts = components(claimed, actual);
    if parts.is_empty() {
        return 0.0;
    }
    parts.iter().sum::<f64>() / parts.len() as f64 * 100.0
}
