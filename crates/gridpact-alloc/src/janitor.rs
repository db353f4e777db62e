//! Allocation janitor — background recovery of stuck allocations.
//!
//! Activations normally resolve within their HTTP deadline, but a crash
//! between reservation and dispatch can strand an allocation in
//! pending/activating forever. The janitor fails those past the
//! environment's timeout and frees their promises.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::AllocationEngine;

/// How often the janitor scans for stuck allocations.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the allocation janitor loop.
pub fn spawn_allocation_janitor(
    engine: Arc<AllocationEngine>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_s = SWEEP_INTERVAL.as_secs(), "allocation janitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    match engine.reap_stuck() {
                        Ok(reaped) if !reaped.is_empty() => {
                            debug!(count = reaped.len(), "janitor recovered stuck allocations");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "janitor iteration failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("allocation janitor shutting down");
                    break;
                }
            }
        }
    })
}
