use serde::{Deserialize, Serialize};

/// Stored copy of an inbound provider callback. One row per external event
/// identity; rows are written once and never updated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryEventRecord {
    pub id: i64,
    pub event_id: String,
    pub event_type: String,
    pub provider_message_id: Option<String>,
    pub payload: String,
    pub received_at: i64,
}
