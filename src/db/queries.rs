/// Status Store access for the dispatch engine. Every status write here is a
/// single-row compare-and-update; callers treat zero affected rows as "lost
/// the race", never as an error. No other mutual exclusion exists.
use sqlx::SqlitePool;

use crate::models::campaign::{Campaign, CampaignStatus};
use crate::models::recipient::Recipient;

/// Campaigns due for dispatch: scheduled, send time in the past, oldest first.
pub async fn due_campaigns(
    pool: &SqlitePool,
    now: i64,
    limit: i64,
) -> Result<Vec<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(
        "SELECT * FROM campaigns
         WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
         ORDER BY scheduled_at ASC
         LIMIT ?",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn count_due_campaigns(pool: &SqlitePool, now: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM campaigns
         WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?",
    )
    .bind(now)
    .fetch_one(pool)
    .await
}

pub async fn get_campaign(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Claims a scheduled campaign for this invocation. Returns false when a
/// concurrent invocation already moved it out of `scheduled`.
pub async fn claim_campaign(pool: &SqlitePool, id: &str, now: i64) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE campaigns SET status = 'sending', updated_at = ?
         WHERE id = ? AND status = 'scheduled'",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Guarded status move, optionally stamping sent_at. Zero affected rows means
/// the campaign is no longer in `from`.
pub async fn transition_campaign(
    pool: &SqlitePool,
    id: &str,
    from: CampaignStatus,
    to: CampaignStatus,
    sent_at: Option<i64>,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE campaigns SET status = ?, sent_at = COALESCE(?, sent_at), updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(to)
    .bind(sent_at)
    .bind(now)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Forces a campaign out of the in-flight states after an unexpected error.
pub async fn force_campaign_failed(
    pool: &SqlitePool,
    id: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE campaigns SET status = 'failed', updated_at = ?
         WHERE id = ? AND status IN ('scheduled', 'sending')",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Ordered by id so dispatch order is deterministic for a given campaign.
pub async fn pending_recipients(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Vec<Recipient>, sqlx::Error> {
    sqlx::query_as::<_, Recipient>(
        "SELECT * FROM recipients
         WHERE campaign_id = ? AND status = 'pending'
         ORDER BY id ASC",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await
}

/// pending -> sent, recording the provider message id. Guarded on `pending`
/// so a raced duplicate reconcile cannot overwrite an earlier outcome.
pub async fn mark_recipient_sent(
    pool: &SqlitePool,
    id: &str,
    provider_message_id: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE recipients
         SET status = 'sent', sent_at = ?, provider_message_id = ?, updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(now)
    .bind(provider_message_id)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// pending -> failed with the send error. Same guard as mark_recipient_sent.
pub async fn mark_recipient_failed(
    pool: &SqlitePool,
    id: &str,
    error: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE recipients
         SET status = 'failed', error_message = ?, updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(error)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

pub async fn delivery_event_seen(
    pool: &SqlitePool,
    event_id: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM delivery_events WHERE event_id = ?")
            .bind(event_id)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Returns false when the event identity is already stored: the UNIQUE
/// constraint closes the race two concurrent deliveries leave between the
/// seen-check and the insert.
pub async fn insert_delivery_event(
    pool: &SqlitePool,
    event_id: &str,
    event_type: &str,
    provider_message_id: Option<&str>,
    payload: &str,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO delivery_events
         (event_id, event_type, provider_message_id, payload, received_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(event_id)
    .bind(event_type)
    .bind(provider_message_id)
    .bind(payload)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Stamps the latest lifecycle label on every recipient carrying this
/// provider message id (normally exactly one).
pub async fn apply_recipient_event(
    pool: &SqlitePool,
    provider_message_id: &str,
    label: &str,
    now: i64,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE recipients SET last_event = ?, updated_at = ?
         WHERE provider_message_id = ?",
    )
    .bind(label)
    .bind(now)
    .bind(provider_message_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Failure-class events additionally fail the recipient and record the
/// provider's reason.
pub async fn apply_recipient_failure(
    pool: &SqlitePool,
    provider_message_id: &str,
    label: &str,
    error: &str,
    now: i64,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE recipients
         SET last_event = ?, status = 'failed', error_message = ?, updated_at = ?
         WHERE provider_message_id = ?",
    )
    .bind(label)
    .bind(error)
    .bind(now)
    .bind(provider_message_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}
