use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mailora_hub_campaigns::config::Config;
use mailora_hub_campaigns::db;
use mailora_hub_campaigns::provider::{DeliveryProvider, HttpDeliveryProvider};
use mailora_hub_campaigns::routes::{self, AppState};
use mailora_hub_campaigns::services::scheduler::DispatchScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mailora_hub_campaigns=debug")),
        )
        .init();

    let config = Arc::new(Config::from_env()?);

    // Build a correct sqlite URL (sqlx expects sqlite://path or sqlite::memory:)
    let db_url = normalize_sqlite_url(&config.database_url);
    if let Some(path) = db_file_path(&db_url) {
        // Ensure file exists for file-based sqlite (avoid open error on some setups)
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        if !path.exists() {
            std::fs::File::create(&path).ok();
        }
    }

    let pool = db::connect(&db_url).await?;
    db::run_migrations(&pool).await?;

    let provider: Arc<dyn DeliveryProvider> = Arc::new(HttpDeliveryProvider::new(
        &config.provider_base_url,
        &config.provider_api_key,
    ));
    if let Err(e) = provider.verify_connectivity().await {
        tracing::warn!("provider connectivity check failed: {e}");
    }

    let scheduler = Arc::new(DispatchScheduler::new(
        pool.clone(),
        provider.clone(),
        config.dispatch.clone(),
        Duration::from_secs(config.scheduler_interval_secs),
    ));
    if config.scheduler_enabled {
        scheduler.start();
    } else {
        tracing::info!("dispatch scheduler disabled by config");
    }

    let state = AppState {
        pool,
        config: config.clone(),
        provider,
        scheduler: scheduler.clone(),
    };
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop();
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}

fn normalize_sqlite_url(input: &str) -> String {
    // Accept forms: sqlite:foo.db (fix), sqlite://foo.db (ok), file:foo.db (convert), just path (prepend)
    if input.starts_with("sqlite://") || input.starts_with("sqlite::memory:") {
        return input.to_string();
    }
    if input.starts_with("sqlite:") {
        // single colon like sqlite:foo.db -> make it sqlite://foo.db
        let rest = input.trim_start_matches("sqlite:");
        return format!("sqlite://{}", rest.trim_start_matches('/'));
    }
    if input.starts_with("file:") {
        return format!("sqlite://{}", input.trim_start_matches("file:"));
    }
    // bare path
    format!("sqlite://{}", input)
}

fn db_file_path(url: &str) -> Option<std::path::PathBuf> {
    // sqlite URLs: sqlite://<path>. Strip prefix
    if let Some(rest) = url.strip_prefix("sqlite://") {
        if rest == ":memory:" {
            return None;
        }
        return Some(std::path::PathBuf::from(rest));
    }
    None
}
