#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use mailora_hub_campaigns::config::{Config, DispatchConfig};
use mailora_hub_campaigns::db;
use mailora_hub_campaigns::models::delivery_event::DeliveryEventRecord;
use mailora_hub_campaigns::provider::{
    DeliveryProvider, MessageDetails, OutboundEmail, SendOutcome,
};
use mailora_hub_campaigns::routes::AppState;
use mailora_hub_campaigns::services::scheduler::DispatchScheduler;

pub const WEBHOOK_SECRET: &str = "whsec_dGVzdC1zaWduaW5nLXNlY3JldA==";
pub const DISPATCH_SECRET: &str = "test-dispatch-secret";

/// One shared in-memory database; a single connection so every concurrent
/// task sees the same state.
pub async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

/// Dispatch knobs with the throttling delays zeroed out.
pub fn fast_config() -> DispatchConfig {
    DispatchConfig {
        claim_limit: 50,
        batch_size: 10,
        batch_delay_ms: 0,
        campaign_delay_ms: 0,
    }
}

pub async fn insert_campaign(
    pool: &SqlitePool,
    id: &str,
    status: &str,
    scheduled_at: Option<i64>,
) {
    let now = db::now_epoch();
    sqlx::query(
        "INSERT INTO campaigns
         (id, subject, body, sender_email, sender_name, status, scheduled_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind("Hello {{name}}")
    .bind("<p>Hi {{name}}, mail for {{email}}</p>")
    .bind("news@example.com")
    .bind("Mailora News")
    .bind(status)
    .bind(scheduled_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert campaign");
}

pub async fn insert_recipient(pool: &SqlitePool, id: &str, campaign_id: &str, email: &str) {
    let now = db::now_epoch();
    sqlx::query(
        "INSERT INTO recipients (id, campaign_id, email, status, created_at, updated_at)
         VALUES (?, ?, ?, 'pending', ?, ?)",
    )
    .bind(id)
    .bind(campaign_id)
    .bind(email)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert recipient");
}

pub async fn campaign_status(pool: &SqlitePool, id: &str) -> String {
    sqlx::query_scalar("SELECT status FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("campaign status")
}

pub async fn campaign_sent_at(pool: &SqlitePool, id: &str) -> Option<i64> {
    sqlx::query_scalar("SELECT sent_at FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("campaign sent_at")
}

/// (status, error_message, provider_message_id, last_event)
pub async fn recipient_row(
    pool: &SqlitePool,
    id: &str,
) -> (String, Option<String>, Option<String>, Option<String>) {
    sqlx::query_as(
        "SELECT status, error_message, provider_message_id, last_event
         FROM recipients WHERE id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .expect("recipient row")
}

pub async fn stored_events(pool: &SqlitePool) -> Vec<DeliveryEventRecord> {
    sqlx::query_as("SELECT * FROM delivery_events ORDER BY id ASC")
        .fetch_all(pool)
        .await
        .expect("stored events")
}

pub async fn delivery_event_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM delivery_events")
        .fetch_one(pool)
        .await
        .expect("delivery event count")
}

/// Records every send in order; failures are scripted per address, or for a
/// whole batch when the subject carries the refusal marker.
pub struct MockProvider {
    pub sent: Mutex<Vec<(String, String)>>,
    pub reject: HashSet<String>,
    pub refuse_subject: Option<String>,
    counter: AtomicU64,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: HashSet::new(),
            refuse_subject: None,
            counter: AtomicU64::new(0),
        }
    }

    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            reject: addresses.iter().map(|a| a.to_string()).collect(),
            ..Self::new()
        }
    }

    /// Addresses handed to the provider, in send order.
    pub fn sends(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(to, _)| to.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl DeliveryProvider for MockProvider {
    async fn send_batch(
        &self,
        emails: &[OutboundEmail],
        idempotency_key: &str,
    ) -> anyhow::Result<Vec<SendOutcome>> {
        if let Some(marker) = &self.refuse_subject {
            if emails.iter().any(|m| m.subject.contains(marker.as_str())) {
                anyhow::bail!("provider unavailable");
            }
        }
        let mut out = Vec::with_capacity(emails.len());
        for email in emails {
            self.sent
                .lock()
                .unwrap()
                .push((email.to.clone(), idempotency_key.to_string()));
            if self.reject.contains(&email.to) {
                out.push(SendOutcome::rejected(&email.to, "mailbox unavailable".into()));
            } else {
                let id = self.counter.fetch_add(1, Ordering::SeqCst);
                out.push(SendOutcome::accepted(&email.to, format!("msg_{id}")));
            }
        }
        Ok(out)
    }

    async fn get_message(&self, id: &str) -> anyhow::Result<MessageDetails> {
        Ok(MessageDetails {
            id: id.to_string(),
            to: vec![],
            subject: None,
            last_event: Some("delivered".into()),
            created_at: None,
        })
    }

    async fn verify_connectivity(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn test_state(pool: SqlitePool, provider: Arc<MockProvider>) -> AppState {
    let config = Arc::new(Config {
        database_url: "sqlite::memory:".into(),
        port: 0,
        provider_base_url: "http://127.0.0.1:0".into(),
        provider_api_key: "test-key".into(),
        webhook_signing_secret: WEBHOOK_SECRET.into(),
        dispatch_secret: DISPATCH_SECRET.into(),
        dispatch: fast_config(),
        scheduler_interval_secs: 3600,
        scheduler_enabled: false,
    });
    let provider: Arc<dyn DeliveryProvider> = provider;
    let scheduler = Arc::new(DispatchScheduler::new(
        pool.clone(),
        provider.clone(),
        config.dispatch.clone(),
        Duration::from_secs(3600),
    ));
    AppState {
        pool,
        config,
        provider,
        scheduler,
    }
}

/// Signature the provider would attach: HMAC-SHA256 over
/// `{id}.{timestamp}.{body}` with the base64 secret material.
pub fn sign_webhook(event_id: &str, timestamp: i64, body: &[u8]) -> String {
    let material = WEBHOOK_SECRET.strip_prefix("whsec_").unwrap();
    let key = BASE64.decode(material).unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(format!("{event_id}.{timestamp}.").as_bytes());
    mac.update(body);
    format!("v1,{}", BASE64.encode(mac.finalize().into_bytes()))
}
