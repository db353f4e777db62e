//! Candidate matching for allocation requests.
//!
//! Filters available promises against hard constraints, then ranks the
//! survivors:
//!
//! 1. smallest CPU-core surplus over the requirement (best fit)
//! 2. lowest hourly price
//! 3. earliest registration (longest-proven uptime)

use serde::Deserialize;

use gridpact_state::{MachinePromise, PromiseStatus};

/// Hard constraints for an allocation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Requirements {
    pub min_cpu_cores: u32,
    pub min_memory_mb: u64,
    pub min_storage_mb: u64,
    #[serde(default)]
    pub gpu_required: bool,
    /// Exact GPU model required, if any (implies `gpu_required`).
    pub gpu_model: Option<String>,
    #[serde(default)]
    pub tee_required: bool,
    pub region: Option<String>,
    pub max_price_per_hour_wei: Option<u128>,
}

/// Whether a promise satisfies every constraint.
///
/// Only `Available` promises qualify; reserved, leased, draining, and
/// offline machines are never candidates.
pub fn satisfies(p: &MachinePromise, req: &Requirements) -> bool {
    if p.status != PromiseStatus::Available {
        return false;
    }
    if p.spec.cpu.cores < req.min_cpu_cores {
        return false;
    }
    if p.spec.memory.size_mb < req.min_memory_mb {
        return false;
    }
    if p.spec.storage.size_mb < req.min_storage_mb {
        return false;
    }
    if req.gpu_required || req.gpu_model.is_some() {
        let Some(gpu) = &p.spec.gpu else {
            return false;
        };
        if let Some(model) = &req.gpu_model {
            if !gpu.model.eq_ignore_ascii_case(model) {
                return false;
            }
        }
    }
    if req.tee_required && p.spec.tee.is_none() {
        return false;
    }
    if let Some(region) = &req.region {
        if &p.spec.location.region != region {
            return false;
        }
    }
    if let Some(max) = req.max_price_per_hour_wei {
        if p.price_per_hour_wei > max {
            return false;
        }
    }
    true
}

/// Filter and rank candidates, best first.
pub fn rank_candidates(promises: Vec<MachinePromise>, req: &Requirements) -> Vec<MachinePromise> {
    let mut candidates: Vec<MachinePromise> =
        promises.into_iter().filter(|p| satisfies(p, req)).collect();

    candidates.sort_by(|a, b| {
        let surplus_a = a.spec.cpu.cores - req.min_cpu_cores;
        let surplus_b = b.spec.cpu.cores - req.min_cpu_cores;
        surplus_a
            .cmp(&surplus_b)
            .then(a.price_per_hour_wei.cmp(&b.price_per_hour_wei))
            .then(a.registered_at.cmp(&b.registered_at))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridpact_state::*;

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

    fn req(cores: u32) -> Requirements {
        Requirements {
            min_cpu_cores: cores,
            min_memory_mb: 1_024,
            min_storage_mb: 10_000,
            ..Requirements::default()
        }
    }

    #[test]
    fn non_available_promises_never_match() {
        let mut p = promise("mp-1", 8, 100, 1_000);
        for status in [
            PromiseStatus::Reserved,
            PromiseStatus::Allocated,
            PromiseStatus::Draining,
            PromiseStatus::Offline,
        ] {
            p.status = status;
            assert!(!satisfies(&p, &req(1)));
        }
    }

    #[test]
    fn resource_floors_are_hard() {
        let p = promise("mp-1", 4, 100, 1_000);
        assert!(satisfies(&p, &req(4)));
        assert!(!satisfies(&p, &req(8)));

        let mut heavy = req(4);
        heavy.min_memory_mb = 64_000;
        assert!(!satisfies(&p, &heavy));

        let mut bulky = req(4);
        bulky.min_storage_mb = 2_000_000;
        assert!(!satisfies(&p, &bulky));
    }

    #[test]
    fn gpu_and_tee_requirements() {
        let plain = promise("mp-1", 8, 100, 1_000);
        let mut gpu_req = req(4);
        gpu_req.gpu_required = true;
        assert!(!satisfies(&plain, &gpu_req));

        let mut gpu_machine = promise("mp-2", 8, 100, 1_000);
        gpu_machine.spec.gpu = Some(GpuSpec {
            model: "A100".to_string(),
            count: 2,
            memory_mb: 81_920,
        });
        assert!(satisfies(&gpu_machine, &gpu_req));

        // Model constraint is exact (case-insensitive).
        gpu_req.gpu_model = Some("a100".to_string());
        assert!(satisfies(&gpu_machine, &gpu_req));
        gpu_req.gpu_model = Some("H100".to_string());
        assert!(!satisfies(&gpu_machine, &gpu_req));

        let mut tee_req = req(4);
        tee_req.tee_required = true;
        assert!(!satisfies(&plain, &tee_req));
        let mut tee_machine = promise("mp-3", 8, 100, 1_000);
        tee_machine.spec.tee = Some(TeePlatform::Sgx);
        assert!(satisfies(&tee_machine, &tee_req));
    }

    #[test]
    fn region_and_price_constraints() {
        let p = promise("mp-1", 8, 500, 1_000);

        let mut r = req(4);
        r.region = Some("us-east".to_string());
        assert!(!satisfies(&p, &r));
        r.region = Some("eu-west".to_string());
        assert!(satisfies(&p, &r));

        r.max_price_per_hour_wei = Some(400);
        assert!(!satisfies(&p, &r));
        r.max_price_per_hour_wei = Some(500);
        assert!(satisfies(&p, &r));
    }

    #[test]
    fn ranking_prefers_smallest_core_surplus() {
        let candidates = vec![
            promise("mp-big", 64, 100, 1_000),
            promise("mp-fit", 8, 100, 1_000),
            promise("mp-mid", 16, 100, 1_000),
        ];
        let ranked = rank_candidates(candidates, &req(8));

        assert_eq!(ranked[0].id, "mp-fit");
        assert_eq!(ranked[1].id, "mp-mid");
        assert_eq!(ranked[2].id, "mp-big");
    }

    #[test]
    fn price_breaks_surplus_ties() {
        let candidates = vec![
            promise("mp-dear", 8, 900, 1_000),
            promise("mp-cheap", 8, 100, 1_000),
        ];
        let ranked = rank_candidates(candidates, &req(8));

        assert_eq!(ranked[0].id, "mp-cheap");
    }

    #[test]
    fn seniority_breaks_price_ties() {
        let candidates = vec![
            promise("mp-new", 8, 100, 5_000),
            promise("mp-old", 8, 100, 1_000),
        ];
        let ranked = rank_candidates(candidates, &req(8));

        assert_eq!(ranked[0].id, "mp-old");
    }

    #[test]
    fn unmatchable_requirements_rank_empty() {
        let candidates = vec![promise("mp-1", 8, 100, 1_000)];
        assert!(rank_candidates(candidates, &req(128)).is_empty());
    }
}
