//! gridpact-api — REST surface over the marketplace core.
//!
//! Provides axum route handlers for machine registration, allocation,
//! reputation, and benchmark management.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/machines` | Register a machine promise |
//! | GET | `/api/v1/machines` | List available machines (filters) |
//! | GET | `/api/v1/machines/{id}` | Get machine details |
//! | DELETE | `/api/v1/machines/{id}` | Unregister a machine |
//! | POST | `/api/v1/machines/{id}/heartbeat` | Operator heartbeat |
//! | GET | `/api/v1/machines/{id}/reputation` | Get reputation |
//! | GET | `/api/v1/machines/{id}/benchmarks` | Benchmark history (last 10) |
//! | POST | `/api/v1/machines/{id}/benchmark` | Trigger a manual benchmark |
//! | GET | `/api/v1/operators/{operator}/machines` | Machines by operator |
//! | POST | `/api/v1/allocations` | Lease a machine |
//! | GET | `/api/v1/allocations/{id}` | Get allocation |
//! | DELETE | `/api/v1/allocations/{id}` | Release an allocation |
//! | GET | `/api/v1/users/{user}/allocations` | Allocations by user |
//! | GET | `/api/v1/jobs` | List benchmark jobs |
//! | GET | `/api/v1/stats` | Aggregate marketplace stats |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use gridpact_alloc::AllocationEngine;
use gridpact_registry::MachineRegistry;
use gridpact_reputation::ReputationEngine;
use gridpact_state::StateStore;
use gridpact_verify::BenchmarkExecutor;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub registry: Arc<MachineRegistry>,
    pub alloc: Arc<AllocationEngine>,
    pub executor: Arc<BenchmarkExecutor>,
    pub reputation: Arc<ReputationEngine>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/machines",
            get(handlers::list_machines).post(handlers::register_machine),
        )
        .route(
            "/machines/{id}",
            get(handlers::get_machine).delete(handlers::unregister_machine),
        )
        .route("/machines/{id}/heartbeat", post(handlers::heartbeat_machine))
        .route("/machines/{id}/reputation", get(handlers::get_reputation))
        .route("/machines/{id}/benchmarks", get(handlers::list_benchmarks))
        .route("/machines/{id}/benchmark", post(handlers::trigger_benchmark))
        .route(
            "/operators/{operator}/machines",
            get(handlers::list_operator_machines),
        )
        .route("/allocations", post(handlers::create_allocation))
        .route(
            "/allocations/{id}",
            get(handlers::get_allocation).delete(handlers::release_allocation),
        )
        .route("/users/{user}/allocations", get(handlers::list_user_allocations))
        .route("/jobs", get(handlers::list_jobs))
        .route("/stats", get(handlers::get_stats))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
