use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use super::{authorized, AppState};
use crate::db::queries;
use crate::services::campaign_service;

/// POST /api/dispatch/run - claim and dispatch every due campaign once.
/// Safe to call on any schedule and from any number of concurrent callers.
async fn run_dispatch(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, &state.config.dispatch_secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": "invalid dispatch secret"})),
        )
            .into_response();
    }

    let summary =
        campaign_service::run_claim_cycle(&state.pool, state.provider.as_ref(), &state.config.dispatch)
            .await;
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "processed": summary.processed,
            "sent": summary.sent,
            "failed": summary.failed,
            "errors": summary.errors,
        })),
    )
        .into_response()
}

/// GET /api/dispatch/status - scheduler state plus the due-campaign backlog.
async fn dispatch_status(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, &state.config.dispatch_secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": "invalid dispatch secret"})),
        )
            .into_response();
    }

    let now = chrono::Utc::now().timestamp();
    match queries::count_due_campaigns(&state.pool, now).await {
        Ok(due) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "scheduler": state.scheduler.status(),
                "due_campaigns": due,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn start_scheduler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, &state.config.dispatch_secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": "invalid dispatch secret"})),
        )
            .into_response();
    }
    let started = state.scheduler.start();
    (
        StatusCode::OK,
        Json(json!({"ok": true, "started": started, "scheduler": state.scheduler.status()})),
    )
        .into_response()
}

async fn stop_scheduler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, &state.config.dispatch_secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": "invalid dispatch secret"})),
        )
            .into_response();
    }
    let stopped = state.scheduler.stop();
    (
        StatusCode::OK,
        Json(json!({"ok": true, "stopped": stopped, "scheduler": state.scheduler.status()})),
    )
        .into_response()
}

/// GET /api/messages/:id - single-message lookup at the provider, for
/// chasing a recipient's delivery state by hand.
async fn lookup_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !authorized(&headers, &state.config.dispatch_secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": "invalid dispatch secret"})),
        )
            .into_response();
    }
    match state.provider.get_message(&id).await {
        Ok(details) => (StatusCode::OK, Json(json!({"ok": true, "message": details}))).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/dispatch/run", post(run_dispatch))
        .route("/api/dispatch/status", get(dispatch_status))
        .route("/api/dispatch/scheduler/start", post(start_scheduler))
        .route("/api/dispatch/scheduler/stop", post(stop_scheduler))
        .route("/api/messages/:id", get(lookup_message))
}
