/// Campaign model and status state machine
use serde::{Deserialize, Serialize};

/// Campaign lifecycle: draft -> scheduled -> sending -> {sent, failed}.
/// `sent` and `failed` are terminal for the automated path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub status: CampaignStatus,
    /// UTC epoch seconds; must be non-null and <= now for the claim engine
    /// to pick the campaign up.
    pub scheduled_at: Option<i64>,
    /// Display timezone only. Never used for scheduling comparisons.
    pub scheduled_tz: Option<String>,
    pub sent_at: Option<i64>,
    pub owner_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Campaign {
    /// RFC 5322 style From header value for the provider.
    pub fn from_header(&self) -> String {
        match self.sender_name.as_deref() {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.sender_email),
            _ => self.sender_email.clone(),
        }
    }
}
