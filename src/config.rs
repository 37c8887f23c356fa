use anyhow::{Context, Result};
use serde::Serialize;
use std::env;
use std::time::Duration;

/// Knobs for the claim/dispatch pipeline. The delays are backpressure against
/// the provider's rate limits, not correctness requirements.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchConfig {
    /// Max campaigns claimed per cycle.
    pub claim_limit: i64,
    /// Recipients per provider call.
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub campaign_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            claim_limit: 50,
            batch_size: 10,
            batch_delay_ms: 1000,
            campaign_delay_ms: 500,
        }
    }
}

impl DispatchConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn campaign_delay(&self) -> Duration {
        Duration::from_millis(self.campaign_delay_ms)
    }
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub provider_base_url: String,
    pub provider_api_key: String,
    /// Shared secret for inbound delivery-event signatures.
    pub webhook_signing_secret: String,
    /// Pre-shared bearer secret for the dispatch trigger endpoints.
    pub dispatch_secret: String,
    pub dispatch: DispatchConfig,
    pub scheduler_interval_secs: u64,
    pub scheduler_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://mailora_campaigns.db".into()),
            port: env_or("PORT", 3040),
            provider_base_url: env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://api.resend.com".into()),
            provider_api_key: env::var("PROVIDER_API_KEY")
                .context("PROVIDER_API_KEY must be set")?,
            webhook_signing_secret: env::var("WEBHOOK_SIGNING_SECRET")
                .context("WEBHOOK_SIGNING_SECRET must be set")?,
            dispatch_secret: env::var("DISPATCH_SECRET")
                .context("DISPATCH_SECRET must be set")?,
            dispatch: DispatchConfig {
                claim_limit: env_or("DISPATCH_CLAIM_LIMIT", 50),
                batch_size: env_or("DISPATCH_BATCH_SIZE", 10),
                batch_delay_ms: env_or("DISPATCH_BATCH_DELAY_MS", 1000),
                campaign_delay_ms: env_or("DISPATCH_CAMPAIGN_DELAY_MS", 500),
            },
            scheduler_interval_secs: env_or("DISPATCH_INTERVAL_SECS", 60),
            scheduler_enabled: env::var("DISPATCH_SCHEDULER_ENABLED")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
