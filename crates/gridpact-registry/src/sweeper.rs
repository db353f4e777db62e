//! Heartbeat sweep — background task marking stale promises offline.
//!
//! One loop per process. Each iteration absorbs its own failures so a
//! store hiccup never kills the sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::registry::MachineRegistry;

/// Spawn the heartbeat sweep loop.
///
/// Sweeps every `heartbeat_interval_ms` until the shutdown channel fires.
pub fn spawn_heartbeat_sweep(
    registry: Arc<MachineRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = Duration::from_millis(registry.heartbeat_interval_ms());
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "heartbeat sweep started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match registry.sweep_once().await {
                        Ok(flipped) if !flipped.is_empty() => {
                            debug!(count = flipped.len(), "sweep marked machines offline");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "heartbeat sweep iteration failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("heartbeat sweep shutting down");
                    break;
                }
            }
        }
    })
}
