/// Periodic dispatch trigger. Owns its own start/stop lifecycle; a tick that
/// arrives while the previous one is still in flight is skipped, not stacked,
/// and state is observable through status().
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::provider::DeliveryProvider;
use crate::services::campaign_service;

pub struct DispatchScheduler {
    pool: SqlitePool,
    provider: Arc<dyn DeliveryProvider>,
    cfg: DispatchConfig,
    interval: Duration,
    running: AtomicBool,
    tick_in_flight: AtomicBool,
    shutdown: Notify,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub tick_in_flight: bool,
}

impl DispatchScheduler {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn DeliveryProvider>,
        cfg: DispatchConfig,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            provider,
            cfg,
            interval,
            running: AtomicBool::new(false),
            tick_in_flight: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Spawns the tick loop. Returns false when a loop is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let this = self.clone();
        tokio::spawn(async move {
            info!(interval_secs = this.interval.as_secs(), "dispatch scheduler started");
            loop {
                tokio::select! {
                    _ = this.shutdown.notified() => break,
                    _ = tokio::time::sleep(this.interval) => this.clone().tick(),
                }
            }
            info!("dispatch scheduler stopped");
        });
        true
    }

    /// Stops the loop after the current sleep. Returns false when no loop
    /// was running.
    pub fn stop(&self) -> bool {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.shutdown.notify_one();
        true
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            interval_secs: self.interval.as_secs(),
            tick_in_flight: self.tick_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Runs one cycle in its own task, guarded so overlapping ticks skip.
    fn tick(self: Arc<Self>) {
        if self
            .tick_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous dispatch tick still running, skipping");
            return;
        }
        tokio::spawn(async move {
            let summary =
                campaign_service::run_claim_cycle(&self.pool, self.provider.as_ref(), &self.cfg)
                    .await;
            if summary.processed > 0 {
                info!(
                    processed = summary.processed,
                    sent = summary.sent,
                    failed = summary.failed,
                    "dispatch tick completed"
                );
            }
            if !summary.errors.is_empty() {
                warn!(errors = ?summary.errors, "dispatch tick reported errors");
            }
            self.tick_in_flight.store(false, Ordering::SeqCst);
        });
    }
}
