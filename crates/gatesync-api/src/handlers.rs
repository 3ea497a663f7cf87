//! Route handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::debug;

use gatesync_report::{ApplySummary, ReportError, apply_results, parse_batch, parse_single};

use crate::ApiState;
use crate::error::ApiError;
use crate::poll::{PollQuery, View, long_poll};

/// Body of a successful status POST.
#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl From<&ApplySummary> for ReportResponse {
    fn from(summary: &ApplySummary) -> Self {
        Self {
            applied: summary.applied.len(),
            unchanged: summary.unchanged.len(),
            skipped: summary.skipped.len(),
        }
    }
}

// ── Retrieval ──────────────────────────────────────────────────

/// GET /deployments
pub async fn list_deployments(
    State(state): State<ApiState>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    long_poll(&state, View::All, &query, &headers).await
}

/// GET /deployments/current
pub async fn current_deployment(
    State(state): State<ApiState>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    long_poll(&state, View::Current, &query, &headers).await
}

// ── Status reporting ───────────────────────────────────────────

/// POST /deployments
pub async fn report_statuses(State(state): State<ApiState>, body: Bytes) -> Result<Json<ReportResponse>, ApiError> {
    let results = parse_batch(&body)?;
    let summary = apply_results(&state.store, &results)?;
    forward_upstream(&state, &summary);
    Ok(Json(ReportResponse::from(&summary)))
}

/// POST /deployments/{id}
pub async fn report_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ReportResponse>, ApiError> {
    let result = parse_single(&id, &body)?;
    // Existence is decided inside the apply transaction.
    let summary = apply_results(&state.store, std::slice::from_ref(&result))?;
    if !summary.skipped.is_empty() {
        return Err(ReportError::NotFound(id).into());
    }
    forward_upstream(&state, &summary);
    Ok(Json(ReportResponse::from(&summary)))
}

fn forward_upstream(state: &ApiState, summary: &ApplySummary) {
    if summary.applied.is_empty() {
        return;
    }
    match &state.reporter {
        Some(reporter) => reporter.spawn_send_pending(),
        None => debug!(count = summary.applied.len(), "upstream reporting disabled"),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let ready = state.store.list_ready_deployments()?.len();
    Ok(Json(serde_json::json!({ "status": "ok", "ready": ready, "waiters": state.hub.waiter_count() })).into_response())
}
