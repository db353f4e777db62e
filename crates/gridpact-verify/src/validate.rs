//! Strict validation of benchmark reports.
//!
//! Reports come from machines the marketplace explicitly distrusts, so
//! anything out of range or malformed is rejected outright — values are
//! never clamped or coerced. Category fields (storage kind, TEE platform)
//! are closed serde enums, so unknown variants already fail at decode;
//! this pass covers the numeric ranges and hash formats.

use gridpact_state::BenchmarkResult;

/// Score fields are bounded to 0..=10000.
pub const MAX_SCORE: u32 = 10_000;

const MAX_REPORT_CPU_CORES: u32 = 4_096;
const MAX_REPORT_FREQUENCY_MHZ: u32 = 20_000;
const MAX_REPORT_MEMORY_MB: u64 = 16 * 1_048_576; // 16 TiB
const MAX_REPORT_STORAGE_MB: u64 = 2_147_483_648; // 2 PiB
const MAX_REPORT_IOPS: u32 = 50_000_000;
const MAX_REPORT_BANDWIDTH_MBPS: u32 = 1_000_000;
const MAX_REPORT_GPU_COUNT: u32 = 64;
const MAX_REPORT_GPU_MEMORY_MB: u64 = 4 * 1_048_576; // 4 TiB

/// Validate a decoded benchmark report. Returns a description of the
/// first violation found.
pub fn validate_result(result: &BenchmarkResult) -> Result<(), String> {
    if result.overall_score > MAX_SCORE {
        return Err(format!(
            "overall score {} above {MAX_SCORE}",
            result.overall_score
        ));
    }
    if result.cpu.score > MAX_SCORE {
        return Err(format!("cpu score {} above {MAX_SCORE}", result.cpu.score));
    }
    if result.cpu.cores == 0 || result.cpu.cores > MAX_REPORT_CPU_CORES {
        return Err(format!(
            "reported cpu cores {} outside 1..={MAX_REPORT_CPU_CORES}",
            result.cpu.cores
        ));
    }
    if result.cpu.frequency_mhz > MAX_REPORT_FREQUENCY_MHZ {
        return Err(format!(
            "reported cpu frequency {} MHz above {MAX_REPORT_FREQUENCY_MHZ}",
            result.cpu.frequency_mhz
        ));
    }
    if result.memory.size_mb > MAX_REPORT_MEMORY_MB {
        return Err(format!(
            "reported memory {} MB above {MAX_REPORT_MEMORY_MB}",
            result.memory.size_mb
        ));
    }
    if result.storage.size_mb > MAX_REPORT_STORAGE_MB {
        return Err(format!(
            "reported storage {} MB above {MAX_REPORT_STORAGE_MB}",
            result.storage.size_mb
        ));
    }
    if result.storage.iops > MAX_REPORT_IOPS {
        return Err(format!(
            "reported iops {} above {MAX_REPORT_IOPS}",
            result.storage.iops
        ));
    }
    if result.network.bandwidth_mbps > MAX_REPORT_BANDWIDTH_MBPS {
        return Err(format!(
            "reported bandwidth {} Mbps above {MAX_REPORT_BANDWIDTH_MBPS}",
            result.network.bandwidth_mbps
        ));
    }
    if !result.network.latency_ms.is_finite() || result.network.latency_ms < 0.0 {
        return Err(format!(
            "reported latency {} ms is not a non-negative number",
            result.network.latency_ms
        ));
    }
    if result.timestamp_ms == 0 {
        return Err("timestamp must be set".to_string());
    }

    if let Some(gpu) = &result.gpu {
        if gpu.detected {
            if gpu.count == 0 || gpu.count > MAX_REPORT_GPU_COUNT {
                return Err(format!(
                    "reported gpu count {} outside 1..={MAX_REPORT_GPU_COUNT}",
                    gpu.count
                ));
            }
            if gpu.memory_mb > MAX_REPORT_GPU_MEMORY_MB {
                return Err(format!(
                    "reported gpu memory {} MB above {MAX_REPORT_GPU_MEMORY_MB}",
                    gpu.memory_mb
                ));
            }
        }
    }

    if let Some(tee) = &result.tee {
        if let Some(hash) = &tee.attestation_hash {
            validate_hex("tee attestation hash", hash)?;
        }
        if tee.attestation_valid && !tee.detected {
            return Err("attestation cannot be valid without a detected tee".to_string());
        }
    }

    if let Some(hash) = &result.attestation_hash {
        validate_hex("attestation hash", hash)?;
    }

    if let Some(cloud) = &result.cloud {
        if !(1..=3).contains(&cloud.level) {
            return Err(format!("cloud assurance level {} outside 1..=3", cloud.level));
        }
        validate_hex("hardware id hash", &cloud.hardware_id_hash)?;
    }

    Ok(())
}

/// Hash fields must be lowercase-insensitive hex of a sane digest length.
fn validate_hex(field: &str, value: &str) -> Result<(), String> {
    if value.len() < 16 || value.len() > 128 {
        return Err(format!(
            "{field} length {} outside 16..=128 characters",
            value.len()
        ));
    }
    hex::decode(value).map_err(|_| format!("{field} is not valid hex"))?;
    Ok(())
}
