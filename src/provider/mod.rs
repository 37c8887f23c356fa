/// Delivery provider boundary: batched sends, idempotency tokens, message
/// lookup. The engine only talks to the trait so tests can inject their own
/// provider.
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod http;

pub use http::HttpDeliveryProvider;

/// One personalized message, ready for the provider.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Per-message result of a batch send. `message_id` is set exactly when the
/// provider accepted the message.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub to: String,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn accepted(to: &str, message_id: String) -> Self {
        Self {
            to: to.to_string(),
            message_id: Some(message_id),
            error: None,
        }
    }

    pub fn rejected(to: &str, error: String) -> Self {
        Self {
            to: to.to_string(),
            message_id: None,
            error: Some(error),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.message_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetails {
    pub id: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub last_event: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[async_trait::async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Sends every message in the slice. The returned outcomes align with the
    /// input order; one member failing never hides its siblings' results.
    /// `idempotency_key` scopes provider-side deduplication for the batch, so
    /// a retried run reusing the key cannot double-send.
    async fn send_batch(
        &self,
        emails: &[OutboundEmail],
        idempotency_key: &str,
    ) -> Result<Vec<SendOutcome>>;

    async fn get_message(&self, id: &str) -> Result<MessageDetails>;

    async fn verify_connectivity(&self) -> Result<()>;
}
