use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::{header, HeaderMap};
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::provider::DeliveryProvider;
use crate::services::scheduler::DispatchScheduler;

pub mod dispatch;
pub mod webhooks;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub provider: Arc<dyn DeliveryProvider>,
    pub scheduler: Arc<DispatchScheduler>,
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<DispatchScheduler> {
    fn from_ref(state: &AppState) -> Self {
        state.scheduler.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(dispatch::router())
        .merge(webhooks::router())
        .with_state(state)
}

/// Pre-shared bearer secret for the trigger surface; checked before any
/// store access.
pub(crate) fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == secret)
        .unwrap_or(false)
}
