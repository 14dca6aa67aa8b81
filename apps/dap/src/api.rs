//! # HTTP API
//!
//! JSON endpoints over a shared [`RedbStore`].
//!
//! Handlers hold no logic of their own: they decode the request, run the
//! store call on the blocking pool and map [`DapError`] to a status code.
//!
//! | Method | Path                              | Store call                    |
//! |--------|-----------------------------------|-------------------------------|
//! | GET    | `/health`                         | -                             |
//! | POST   | `/v1/evaluate`                    | `evaluate` (no store)         |
//! | POST   | `/v1/plans`                       | `create_adoption_plan`        |
//! | GET    | `/v1/plans/{id}`                  | `adoption_plan`, `plan_tasks` |
//! | POST   | `/v1/plans/{id}/sync`             | `sync_adoption_plan`          |
//! | POST   | `/v1/plans/{id}/telemetry`        | `import_telemetry`            |
//! | POST   | `/v1/tasks/{id}/evaluate`         | `evaluate_task_telemetry`     |
//! | POST   | `/v1/tasks/{id}/status`           | `set_task_status`             |
//! | PUT    | `/v1/customer-products/{id}`      | `update_customer_product`     |

use crate::config::ServerConfig;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use dap_core::evaluator::{EvalContext, EvaluationResult, evaluate_with};
use dap_core::formats::decode_criteria_value;
use dap_core::{
    AdoptionPlan, CustomerProduct, CustomerProductUpdate, CustomerTask, DapError, DataType,
    ImportSummary, RedbStore, SyncOutcome, TaskEvaluation, TaskStatus,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Error half of every handler result.
pub type ApiError = (StatusCode, String);

// =============================================================================
// STATE
// =============================================================================

/// Shared handler state.
pub struct AppState {
    pub store: Arc<RedbStore>,
}

impl AppState {
    pub fn new(store: RedbStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

// =============================================================================
// REQUEST / RESPONSE BODIES
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Ad-hoc evaluation of one value. `criteria` accepts canonical or legacy JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub value: Option<String>,
    pub data_type: DataType,
    #[serde(default)]
    pub criteria: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePlanRequest {
    pub customer_product_id: String,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShowPlanParams {
    #[serde(default)]
    pub include_removed: bool,
}

/// A plan together with its tasks in sequence order.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlanView {
    pub plan: AdoptionPlan,
    pub tasks: Vec<CustomerTask>,
}

/// A telemetry batch. Each row is loosely shaped JSON, see [`dap_core::ImportRow`].
#[derive(Debug, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub rows: Vec<Value>,
    #[serde(default)]
    pub batch_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusRequest {
    pub status: TaskStatus,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateCustomerProductRequest {
    #[serde(flatten)]
    pub update: CustomerProductUpdate,
    #[serde(default)]
    pub actor: Option<String>,
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the router. `rate_limit` caps requests per second across all clients.
pub fn create_router(state: AppState, rate_limit: Option<NonZeroU32>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/evaluate", post(evaluate_handler))
        .route("/v1/plans", post(create_plan_handler))
        .route("/v1/plans/{id}", get(show_plan_handler))
        .route("/v1/plans/{id}/sync", post(sync_plan_handler))
        .route("/v1/plans/{id}/telemetry", post(import_telemetry_handler))
        .route("/v1/tasks/{id}/evaluate", post(evaluate_task_handler))
        .route("/v1/tasks/{id}/status", post(task_status_handler))
        .route(
            "/v1/customer-products/{id}",
            put(update_customer_product_handler),
        )
        .with_state(Arc::new(state));

    if let Some(per_second) = rate_limit {
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }
    router.layer(TraceLayer::new_for_http())
}

/// Open the store and serve until the process is stopped.
pub async fn serve(config: &ServerConfig) -> Result<(), DapError> {
    let addr = config.socket_addr().map_err(DapError::Invalid)?;
    let store = RedbStore::open(&config.db)?;
    let app = create_router(AppState::new(store), config.quota_per_second());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, db = %config.db.display(), "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn rate_limit_middleware(
    State(limiter): State<Arc<DefaultDirectRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.check().is_err() {
        warn!(path = %request.uri().path(), "rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }
    next.run(request).await
}

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// Map a core error to an HTTP status and message.
pub fn error_response(err: DapError) -> ApiError {
    let status = match &err {
        DapError::NotFound { .. } => StatusCode::NOT_FOUND,
        DapError::Invalid(_) | DapError::Criteria(_) => StatusCode::BAD_REQUEST,
        DapError::Storage(_) | DapError::Encoding(_) | DapError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    (status, err.to_string())
}

/// Run a store call on the blocking pool.
async fn with_store<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&RedbStore) -> Result<T, DapError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("store task failed: {e}"),
            )
        })?
        .map_err(error_response)
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn evaluate_handler(
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluationResult>, ApiError> {
    let criteria = decode_criteria_value(request.criteria)
        .map_err(|e| error_response(DapError::Criteria(e)))?;
    let result = match criteria {
        Some(criteria) => evaluate_with(
            &EvalContext::now(),
            request.value.as_deref(),
            request.data_type,
            &criteria,
        ),
        None => EvaluationResult::pass("no success criteria defined"),
    };
    Ok(Json(result))
}

async fn create_plan_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<SyncOutcome>), ApiError> {
    let outcome = with_store(&state, move |store| {
        store.create_adoption_plan(&request.customer_product_id, request.actor.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn show_plan_handler(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<String>,
    Query(params): Query<ShowPlanParams>,
) -> Result<Json<PlanView>, ApiError> {
    let view = with_store(&state, move |store| {
        Ok(PlanView {
            plan: store.adoption_plan(&plan_id)?,
            tasks: store.plan_tasks(&plan_id, params.include_removed)?,
        })
    })
    .await?;
    Ok(Json(view))
}

async fn sync_plan_handler(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<String>,
) -> Result<Json<SyncOutcome>, ApiError> {
    let outcome = with_store(&state, move |store| store.sync_adoption_plan(&plan_id)).await?;
    Ok(Json(outcome))
}

async fn import_telemetry_handler(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<String>,
    Json(batch): Json<TelemetryBatch>,
) -> Result<Json<ImportSummary>, ApiError> {
    let summary = with_store(&state, move |store| match batch.batch_id {
        Some(batch_id) => {
            store.import_telemetry_at(&plan_id, &batch.rows, &batch_id, &EvalContext::now())
        }
        None => store.import_telemetry(&plan_id, &batch.rows),
    })
    .await?;
    Ok(Json(summary))
}

async fn evaluate_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskEvaluation>, ApiError> {
    let evaluation =
        with_store(&state, move |store| store.evaluate_task_telemetry(&task_id)).await?;
    Ok(Json(evaluation))
}

async fn task_status_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<CustomerTask>, ApiError> {
    let task = with_store(&state, move |store| {
        store.set_task_status(
            &task_id,
            request.status,
            request.actor.as_deref(),
            request.notes.as_deref(),
        )
    })
    .await?;
    Ok(Json(task))
}

async fn update_customer_product_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateCustomerProductRequest>,
) -> Result<Json<CustomerProduct>, ApiError> {
    let cp = with_store(&state, move |store| {
        store.update_customer_product(&id, &request.update, request.actor.as_deref())
    })
    .await?;
    Ok(Json(cp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        let cases = [
            (DapError::not_found("adoption plan", "p1"), StatusCode::NOT_FOUND),
            (DapError::Invalid("x".into()), StatusCode::BAD_REQUEST),
            (
                DapError::Criteria(dap_core::CriteriaError::NonFiniteThreshold),
                StatusCode::BAD_REQUEST,
            ),
            (DapError::Encoding("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let message = err.to_string();
            assert_eq!(error_response(err), (expected, message));
        }
    }
}
