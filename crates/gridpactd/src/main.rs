//! gridpactd — the GridPact daemon.
//!
//! Single binary that assembles the marketplace core:
//! - State store (redb)
//! - Machine registry + heartbeat sweep
//! - Allocation engine + stuck-allocation janitor
//! - Reputation engine
//! - Benchmark executor + reputation-tiered scheduler
//! - REST API
//!
//! # Usage
//!
//! ```text
//! gridpactd standalone --port 8460 --data-dir /var/lib/gridpact --environment local
//! ```
//!
//! The on-chain registry and proof-of-cloud verifier are platform
//! collaborators wired in by the full deployment; standalone mode runs
//! without them (disputes and cloud verification are logged as skipped).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use gridpact_alloc::{AllocConfig, AllocationEngine, spawn_allocation_janitor};
use gridpact_api::{ApiState, build_router};
use gridpact_client::{HttpMachineClient, NullPlacementSync};
use gridpact_core::{Environment, SystemClock};
use gridpact_registry::{MachineRegistry, RegistryConfig, spawn_heartbeat_sweep};
use gridpact_reputation::ReputationEngine;
use gridpact_verify::{
    BenchmarkExecutor, BenchmarkScheduler, RandomSampler, VerifyConfig, spawn_benchmark_scheduler,
};

#[derive(Parser)]
#[command(name = "gridpactd", about = "GridPact marketplace daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all subsystems in one process.
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8460")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/gridpact")]
        data_dir: PathBuf,

        /// Marketplace environment: local, testnet, or mainnet.
        #[arg(long, default_value = "local")]
        environment: Environment,

        /// Expected operator heartbeat cadence in milliseconds.
        #[arg(long, default_value = "30000")]
        heartbeat_interval_ms: u64,

        /// Benchmark scheduler tick in seconds.
        #[arg(long, default_value = "3600")]
        benchmark_tick_secs: u64,

        /// Benchmark container image dispatched to operator agents.
        #[arg(long, default_value = "gridpact/bench:latest")]
        benchmark_image: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridpactd=debug,gridpact=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            environment,
            heartbeat_interval_ms,
            benchmark_tick_secs,
            benchmark_image,
        } => {
            run_standalone(
                port,
                data_dir,
                environment,
                heartbeat_interval_ms,
                benchmark_tick_secs,
                benchmark_image,
            )
            .await
        }
    }
}

async fn run_standalone(
    port: u16,
    data_dir: PathBuf,
    environment: Environment,
    heartbeat_interval_ms: u64,
    benchmark_tick_secs: u64,
    benchmark_image: String,
) -> anyhow::Result<()> {
    info!(%environment, "GridPact daemon starting in standalone mode");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("gridpact.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = gridpact_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let clock = Arc::new(SystemClock);
    let machine_client = Arc::new(HttpMachineClient::new());

    let registry = Arc::new(MachineRegistry::new(
        store.clone(),
        clock.clone(),
        Arc::new(NullPlacementSync),
        environment,
        RegistryConfig {
            heartbeat_interval_ms,
        },
    ));
    info!("machine registry initialized");

    let alloc = Arc::new(AllocationEngine::new(
        store.clone(),
        clock.clone(),
        machine_client.clone(),
        environment,
        AllocConfig::default(),
    ));
    info!("allocation engine initialized");

    let verify_config = VerifyConfig {
        benchmark_image,
        ..VerifyConfig::default()
    };
    let reputation = Arc::new(ReputationEngine::new(
        store.clone(),
        clock.clone(),
        verify_config.reputation_thresholds(),
    ));
    let executor = Arc::new(BenchmarkExecutor::new(
        store.clone(),
        clock.clone(),
        machine_client,
        None,
        None,
        reputation.clone(),
        verify_config.clone(),
    ));
    let scheduler = Arc::new(BenchmarkScheduler::new(
        store.clone(),
        clock,
        executor.clone(),
        verify_config,
        Arc::new(RandomSampler),
    ));
    info!("verification engine initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sweep_handle = spawn_heartbeat_sweep(registry.clone(), shutdown_rx.clone());
    let janitor_handle = spawn_allocation_janitor(alloc.clone(), shutdown_rx.clone());
    let scheduler_handle = spawn_benchmark_scheduler(
        scheduler,
        Duration::from_secs(benchmark_tick_secs),
        shutdown_rx,
    );

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        store,
        registry,
        alloc,
        executor,
        reputation,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = sweep_handle.await;
    let _ = janitor_handle.await;
    let _ = scheduler_handle.await;

    info!("GridPact daemon stopped");
    Ok(())
}
