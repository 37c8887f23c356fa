use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use super::AppState;
use crate::services::event_service;

/// POST /api/webhooks/email - inbound delivery events from the provider.
/// The signature is verified before anything touches the store; replays are
/// acknowledged, not reprocessed.
async fn receive_delivery_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let verified = match event_service::verify_webhook(
        &state.config.webhook_signing_secret,
        &headers,
        &body,
    ) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "error": e.to_string()})),
            )
                .into_response();
        }
    };

    let event = match event_service::parse_event(&verified.event_id, &body) {
        Ok(ev) => ev,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"ok": false, "error": e.to_string()})),
            )
                .into_response();
        }
    };

    match event_service::process_event(&state.pool, event).await {
        Ok(disposition) => (
            StatusCode::OK,
            Json(json!({"ok": true, "disposition": disposition.as_str()})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/webhooks/email", post(receive_delivery_event))
}
