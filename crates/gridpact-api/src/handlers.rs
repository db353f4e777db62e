//! REST API handlers.
//!
//! Each handler delegates to the owning engine and maps its error
//! taxonomy onto HTTP status codes: validation → 400, authorization →
//! 403, not-found → 404, capacity → 409.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::warn;

use gridpact_alloc::{AllocError, Requirements};
use gridpact_registry::{MachineFilter, NewMachine, RegistryError};
use gridpact_state::*;
use gridpact_verify::VerifyError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn registry_error(e: RegistryError) -> axum::response::Response {
    let status = match &e {
        RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
        RegistryError::StakeTooLow { .. } => StatusCode::BAD_REQUEST,
        RegistryError::NotOwner(_) => StatusCode::FORBIDDEN,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::OperatorAtCap { .. } | RegistryError::PromiseBusy(_) => {
            StatusCode::CONFLICT
        }
        RegistryError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn alloc_error(e: AllocError) -> axum::response::Response {
    let status = match &e {
        AllocError::NoSuitableMachine => StatusCode::CONFLICT,
        AllocError::NotOwner(_) => StatusCode::FORBIDDEN,
        AllocError::NotFound(_) => StatusCode::NOT_FOUND,
        AllocError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn verify_error(e: VerifyError) -> axum::response::Response {
    let status = match &e {
        VerifyError::Busy(_) => StatusCode::CONFLICT,
        VerifyError::NotFound(_) => StatusCode::NOT_FOUND,
        VerifyError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

/// Query parameter naming the acting operator or user.
#[derive(serde::Deserialize)]
pub struct ActorParam {
    pub actor: String,
}

// ── Machines ───────────────────────────────────────────────────

/// Registration request body.
#[derive(serde::Deserialize)]
pub struct RegisterMachineRequest {
    pub operator: String,
    pub agent_id: Option<String>,
    pub spec: MachineSpec,
    pub capabilities: Capabilities,
    pub activation_endpoint: String,
    pub ssh_endpoint: Option<String>,
    pub price_per_hour_wei: u128,
    #[serde(default)]
    pub price_per_gb_wei: u128,
    #[serde(default)]
    pub min_lease_hours: u32,
    #[serde(default)]
    pub stake_wei: u128,
}

/// POST /api/v1/machines
///
/// On success an initial benchmark is fired asynchronously; its outcome
/// lands on the job table, never on this response.
pub async fn register_machine(
    State(state): State<ApiState>,
    Json(req): Json<RegisterMachineRequest>,
) -> impl IntoResponse {
    let new = NewMachine {
        operator: req.operator,
        agent_id: req.agent_id,
        spec: req.spec,
        capabilities: req.capabilities,
        activation_endpoint: req.activation_endpoint,
        ssh_endpoint: req.ssh_endpoint,
        price_per_hour_wei: req.price_per_hour_wei,
        price_per_gb_wei: req.price_per_gb_wei,
        min_lease_hours: req.min_lease_hours,
        stake_wei: req.stake_wei,
    };
    match state.registry.register(new).await {
        Ok(promise) => {
            let executor = state.executor.clone();
            let machine_id = promise.id.clone();
            tokio::spawn(async move {
                if let Err(e) = executor.run(&machine_id, TriggerType::Initial).await {
                    warn!(%machine_id, error = %e, "initial benchmark not run");
                }
            });
            (StatusCode::CREATED, ApiResponse::ok(promise)).into_response()
        }
        Err(e) => registry_error(e),
    }
}

/// Machine listing filters as query parameters.
///
/// Prices arrive as u64 here — query-string deserialization has no u128
/// path — and widen into the domain filter.
#[derive(serde::Deserialize)]
pub struct MachineQuery {
    pub region: Option<String>,
    pub min_cpu_cores: Option<u32>,
    pub min_memory_mb: Option<u64>,
    pub min_storage_mb: Option<u64>,
    #[serde(default)]
    pub gpu_required: bool,
    #[serde(default)]
    pub tee_required: bool,
    pub max_price_per_hour_wei: Option<u64>,
}

impl From<MachineQuery> for MachineFilter {
    fn from(q: MachineQuery) -> Self {
        MachineFilter {
            region: q.region,
            min_cpu_cores: q.min_cpu_cores,
            min_memory_mb: q.min_memory_mb,
            min_storage_mb: q.min_storage_mb,
            gpu_required: q.gpu_required,
            tee_required: q.tee_required,
            max_price_per_hour_wei: q.max_price_per_hour_wei.map(u128::from),
        }
    }
}

/// GET /api/v1/machines
pub async fn list_machines(
    State(state): State<ApiState>,
    Query(query): Query<MachineQuery>,
) -> impl IntoResponse {
    match state.registry.list_available(&MachineFilter::from(query)) {
        Ok(machines) => ApiResponse::ok(machines).into_response(),
        Err(e) => registry_error(e),
    }
}

/// GET /api/v1/machines/:id
pub async fn get_machine(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Ok(promise) => ApiResponse::ok(promise).into_response(),
        Err(e) => registry_error(e),
    }
}

/// DELETE /api/v1/machines/:id?actor=operator
pub async fn unregister_machine(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(actor): Query<ActorParam>,
) -> impl IntoResponse {
    match state.registry.unregister(&id, &actor.actor).await {
        Ok(()) => ApiResponse::ok("unregistered").into_response(),
        Err(e) => registry_error(e),
    }
}

/// Heartbeat request body.
#[derive(serde::Deserialize)]
pub struct HeartbeatRequest {
    pub operator: String,
}

/// POST /api/v1/machines/:id/heartbeat
pub async fn heartbeat_machine(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    match state.registry.heartbeat(&id, &req.operator) {
        Ok(found) => ApiResponse::ok(serde_json::json!({ "found": found })).into_response(),
        Err(e) => registry_error(e),
    }
}

/// GET /api/v1/operators/:operator/machines
pub async fn list_operator_machines(
    State(state): State<ApiState>,
    Path(operator): Path<String>,
) -> impl IntoResponse {
    match state.registry.list_by_operator(&operator) {
        Ok(machines) => ApiResponse::ok(machines).into_response(),
        Err(e) => registry_error(e),
    }
}

// ── Reputation & benchmarks ────────────────────────────────────

/// GET /api/v1/machines/:id/reputation
pub async fn get_reputation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.reputation.get(&id) {
        Ok(Some(rep)) => ApiResponse::ok(rep).into_response(),
        Ok(None) => error_response("machine has never been benchmarked", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/machines/:id/benchmarks
pub async fn list_benchmarks(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_benchmark_records(&id) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /api/v1/machines/:id/benchmark
pub async fn trigger_benchmark(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.executor.run(&id, TriggerType::Manual).await {
        Ok(job) => (StatusCode::ACCEPTED, ApiResponse::ok(job)).into_response(),
        Err(e) => verify_error(e),
    }
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_jobs() {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Allocations ────────────────────────────────────────────────

/// Allocation request body.
#[derive(serde::Deserialize)]
pub struct CreateAllocationRequest {
    pub user: String,
    pub requirements: Requirements,
}

/// POST /api/v1/allocations
pub async fn create_allocation(
    State(state): State<ApiState>,
    Json(req): Json<CreateAllocationRequest>,
) -> impl IntoResponse {
    match state.alloc.allocate(&req.user, &req.requirements).await {
        Ok(alloc) => (StatusCode::CREATED, ApiResponse::ok(alloc)).into_response(),
        Err(e) => alloc_error(e),
    }
}

/// GET /api/v1/allocations/:id
pub async fn get_allocation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.alloc.get(&id) {
        Ok(alloc) => ApiResponse::ok(alloc).into_response(),
        Err(e) => alloc_error(e),
    }
}

/// DELETE /api/v1/allocations/:id?actor=user
pub async fn release_allocation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(actor): Query<ActorParam>,
) -> impl IntoResponse {
    match state.alloc.release(&id, &actor.actor).await {
        Ok(alloc) => ApiResponse::ok(alloc).into_response(),
        Err(e) => alloc_error(e),
    }
}

/// GET /api/v1/users/:user/allocations
pub async fn list_user_allocations(
    State(state): State<ApiState>,
    Path(user): Path<String>,
) -> impl IntoResponse {
    match state.alloc.list_for_user(&user) {
        Ok(allocs) => ApiResponse::ok(allocs).into_response(),
        Err(e) => alloc_error(e),
    }
}

// ── Stats ──────────────────────────────────────────────────────

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<ApiState>) -> impl IntoResponse {
    match state.registry.stats() {
        Ok(stats) => ApiResponse::ok(stats).into_response(),
        Err(e) => registry_error(e),
    }
}
