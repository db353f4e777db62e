//! Machine spec validation.
//!
//! Claimed hardware is bounds-checked once at registration; anything
//! outside the envelope is rejected, never clamped. The bounds are
//! deliberately generous — they exist to catch nonsense and unit
//! confusion (bytes vs megabytes), not to police plausibility, which is
//! the benchmark pipeline's job.

use gridpact_state::MachineSpec;

use crate::error::{RegistryError, RegistryResult};

pub const MAX_CPU_CORES: u32 = 1_024;
pub const MIN_CPU_FREQUENCY_MHZ: u32 = 100;
pub const MAX_CPU_FREQUENCY_MHZ: u32 = 10_000;
pub const MIN_MEMORY_MB: u64 = 512;
pub const MAX_MEMORY_MB: u64 = 8_388_608; // 8 TiB
pub const MIN_STORAGE_MB: u64 = 1_024;
pub const MAX_STORAGE_MB: u64 = 1_073_741_824; // 1 PiB
pub const MAX_STORAGE_IOPS: u32 = 10_000_000;
pub const MIN_BANDWIDTH_MBPS: u32 = 1;
pub const MAX_BANDWIDTH_MBPS: u32 = 400_000;
pub const MAX_GPU_COUNT: u32 = 16;
pub const MAX_GPU_MEMORY_MB: u64 = 1_048_576; // 1 TiB

/// Validate a claimed machine spec against registration bounds.
pub fn validate_spec(spec: &MachineSpec) -> RegistryResult<()> {
    let fail = |msg: String| Err(RegistryError::Validation(msg));

    if spec.cpu.cores == 0 || spec.cpu.cores > MAX_CPU_CORES {
        return fail(format!(
            "cpu cores {} outside 1..={MAX_CPU_CORES}",
            spec.cpu.cores
        ));
    }
    if spec.cpu.frequency_mhz < MIN_CPU_FREQUENCY_MHZ
        || spec.cpu.frequency_mhz > MAX_CPU_FREQUENCY_MHZ
    {
        return fail(format!(
            "cpu frequency {} MHz outside {MIN_CPU_FREQUENCY_MHZ}..={MAX_CPU_FREQUENCY_MHZ}",
            spec.cpu.frequency_mhz
        ));
    }
    if spec.memory.size_mb < MIN_MEMORY_MB || spec.memory.size_mb > MAX_MEMORY_MB {
        return fail(format!(
            "memory {} MB outside {MIN_MEMORY_MB}..={MAX_MEMORY_MB}",
            spec.memory.size_mb
        ));
    }
    if spec.storage.size_mb < MIN_STORAGE_MB || spec.storage.size_mb > MAX_STORAGE_MB {
        return fail(format!(
            "storage {} MB outside {MIN_STORAGE_MB}..={MAX_STORAGE_MB}",
            spec.storage.size_mb
        ));
    }
    if spec.storage.iops > MAX_STORAGE_IOPS {
        return fail(format!("storage iops {} above {MAX_STORAGE_IOPS}", spec.storage.iops));
    }
    if spec.network.bandwidth_mbps < MIN_BANDWIDTH_MBPS
        || spec.network.bandwidth_mbps > MAX_BANDWIDTH_MBPS
    {
        return fail(format!(
            "bandwidth {} Mbps outside {MIN_BANDWIDTH_MBPS}..={MAX_BANDWIDTH_MBPS}",
            spec.network.bandwidth_mbps
        ));
    }
    if let Some(gpu) = &spec.gpu {
        if gpu.count == 0 || gpu.count > MAX_GPU_COUNT {
            return fail(format!("gpu count {} outside 1..={MAX_GPU_COUNT}", gpu.count));
        }
        if gpu.model.trim().is_empty() {
            return fail("gpu model must be non-empty".to_string());
        }
        if gpu.memory_mb == 0 || gpu.memory_mb > MAX_GPU_MEMORY_MB {
            return fail(format!(
                "gpu memory {} MB outside 1..={MAX_GPU_MEMORY_MB}",
                gpu.memory_mb
            ));
        }
    }
    if spec.location.region.trim().is_empty() {
        return fail("region must be non-empty".to_string());
    }
    Ok(())
}
