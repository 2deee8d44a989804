//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` (or the usage provider) and
//! returns JSON responses in a `{ success, data, error }` envelope.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{info, warn};

use tidegrid_autoscale::{AutoscaleError, validate};
use tidegrid_state::*;

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

fn internal(e: StateError) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

/// `{namespace}/{kind}/{name}` path segments.
#[derive(Debug, Deserialize)]
pub struct TargetPath {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl TargetPath {
    fn id(&self) -> TargetId {
        ScalingTarget::new(&self.namespace, &self.kind, &self.name).id()
    }
}

// ── Targets ────────────────────────────────────────────────────────

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_targets() {
        Ok(targets) => ApiResponse::ok(targets).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/targets/{namespace}/{kind}/{name}
pub async fn get_target(
    State(state): State<ApiState>,
    Path(path): Path<TargetPath>,
) -> impl IntoResponse {
    match state.store.get_target(&path.id()) {
        Ok(Some(config)) => ApiResponse::ok(config).into_response(),
        Ok(None) => error_response("target not found", StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/targets
///
/// Rejects configs the autoscaler would refuse with 400.
pub async fn put_target(
    State(state): State<ApiState>,
    Json(config): Json<TargetConfig>,
) -> impl IntoResponse {
    if let Err(e) = validate(&config) {
        let status = match &e {
            AutoscaleError::ConfigInvalid { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(target_id = %config.id(), error = %e, "rejected target config");
        return error_response(&e.to_string(), status);
    }
    match state.store.put_target(&config) {
        Ok(()) => {
            info!(target_id = %config.id(), "target config stored");
            (StatusCode::CREATED, ApiResponse::ok(config)).into_response()
        }
        Err(e) => internal(e),
    }
}

/// DELETE /api/v1/targets/{namespace}/{kind}/{name}
///
/// Removes the config only; the loop notices on its next tick and exits.
pub async fn delete_target(
    State(state): State<ApiState>,
    Path(path): Path<TargetPath>,
) -> impl IntoResponse {
    match state.store.delete_target(&path.id()) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("target not found", StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

// ── Decisions ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /api/v1/targets/{namespace}/{kind}/{name}/decisions?limit=N
///
/// Newest first.
pub async fn list_decisions(
    State(state): State<ApiState>,
    Path(path): Path<TargetPath>,
    Query(query): Query<DecisionQuery>,
) -> impl IntoResponse {
    match state.store.list_decisions(&path.id(), query.limit) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/targets/{namespace}/{kind}/{name}/recommendations
///
/// Recommendations carried by the latest decision event.
pub async fn get_recommendations(
    State(state): State<ApiState>,
    Path(path): Path<TargetPath>,
) -> impl IntoResponse {
    let id = path.id();
    match state.store.get_target(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("target not found", StatusCode::NOT_FOUND),
        Err(e) => return internal(e),
    }
    match state.store.latest_decision(&id) {
        Ok(event) => {
            let recs = event.map(|e| e.recommendations).unwrap_or_default();
            ApiResponse::ok(recs).into_response()
        }
        Err(e) => internal(e),
    }
}

// ── Workload ───────────────────────────────────────────────────────

/// GET /api/v1/targets/{namespace}/{kind}/{name}/workload
pub async fn get_workload(
    State(state): State<ApiState>,
    Path(path): Path<TargetPath>,
) -> impl IntoResponse {
    match state.store.get_workload(&path.id()) {
        Ok(Some(workload)) => ApiResponse::ok(workload).into_response(),
        Ok(None) => error_response("workload not found", StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

/// PUT /api/v1/targets/{namespace}/{kind}/{name}/workload
///
/// The stored state takes its id from the path.
pub async fn put_workload(
    State(state): State<ApiState>,
    Path(path): Path<TargetPath>,
    Json(mut workload): Json<WorkloadState>,
) -> impl IntoResponse {
    workload.target_id = path.id();
    if workload.instances.len() != workload.replicas as usize {
        return error_response(
            &format!(
                "replicas {} does not match {} instances",
                workload.replicas,
                workload.instances.len()
            ),
            StatusCode::BAD_REQUEST,
        );
    }
    match state.store.put_workload(&workload) {
        Ok(()) => ApiResponse::ok(workload).into_response(),
        Err(e) => internal(e),
    }
}

// ── Usage ──────────────────────────────────────────────────────────

/// One usage point; `timestamp` defaults to the time of receipt.
#[derive(Debug, Deserialize)]
pub struct UsagePoint {
    pub instance_id: InstanceId,
    pub container_name: String,
    pub value: f64,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UsageBatch {
    pub metric: String,
    pub samples: Vec<UsagePoint>,
}

/// POST /api/v1/targets/{namespace}/{kind}/{name}/usage
pub async fn ingest_usage(
    State(state): State<ApiState>,
    Path(path): Path<TargetPath>,
    Json(batch): Json<UsageBatch>,
) -> impl IntoResponse {
    if batch.samples.iter().any(|s| !s.value.is_finite() || s.value < 0.0) {
        return error_response("usage values must be finite and >= 0", StatusCode::BAD_REQUEST);
    }
    let now = epoch_secs();
    let count = batch.samples.len();
    let samples = batch
        .samples
        .into_iter()
        .map(|p| UsageSample {
            instance_id: p.instance_id,
            container_name: p.container_name,
            value: p.value,
            timestamp: p.timestamp.unwrap_or(now),
        })
        .collect();
    state
        .usage
        .record_batch(&path.id(), &batch.metric, samples)
        .await;
    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(serde_json::json!({ "metric": batch.metric, "accepted": count })),
    )
        .into_response()
}

// ── Prometheus ─────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    // Latest decision for every known target.
    let ids = state.store.list_target_ids().unwrap_or_default();
    let events: Vec<DecisionEvent> = ids
        .iter()
        .filter_map(|id| state.store.latest_decision(id).ok().flatten())
        .collect();

    let body = tidegrid_metrics::render_prometheus(&events);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
