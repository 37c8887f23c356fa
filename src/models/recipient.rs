use serde::{Deserialize, Serialize};

/// Recipient send state. `pending` rows transition at most once, to `sent`
/// or `failed`, during dispatch reconciliation; a delivery event may later
/// move `sent` to `failed` (bounce after accept).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipient {
    pub id: String,
    pub campaign_id: String,
    pub email: String,
    pub name: Option<String>,
    pub status: RecipientStatus,
    pub sent_at: Option<i64>,
    pub error_message: Option<String>,
    /// Provider-assigned id, set once when the send is accepted.
    pub provider_message_id: Option<String>,
    /// Last delivery-lifecycle label seen for this recipient ("delivered",
    /// "bounced", ...).
    pub last_event: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Recipient {
    /// Name used for {{name}} personalization; falls back to the address
    /// local part.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.email.split('@').next().unwrap_or(&self.email),
        }
    }
}
