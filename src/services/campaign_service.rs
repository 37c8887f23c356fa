/// Campaign Claim Engine: finds due campaigns, claims each with a
/// compare-and-update, drives it through the batch dispatcher, and reconciles
/// per-recipient outcomes back into the store.
use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::db::queries;
use crate::models::campaign::{Campaign, CampaignStatus};
use crate::models::recipient::Recipient;
use crate::provider::{DeliveryProvider, OutboundEmail};
use crate::services::dispatch_service;

/// Aggregate result of one claim cycle. `processed` counts claimed
/// campaigns; `sent` and `failed` count recipients.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleSummary {
    pub processed: u32,
    pub sent: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

/// Runs one dispatch cycle. Safe to call from any number of concurrent
/// triggers: every status move is a single-row compare-and-update, so a
/// racing cycle loses the claim and skips the campaign.
pub async fn run_claim_cycle(
    pool: &SqlitePool,
    provider: &dyn DeliveryProvider,
    cfg: &DispatchConfig,
) -> CycleSummary {
    let mut summary = CycleSummary::default();
    let now = chrono::Utc::now().timestamp();

    let due = match queries::due_campaigns(pool, now, cfg.claim_limit).await {
        Ok(due) => due,
        Err(e) => {
            warn!(error = %e, "due-campaign query failed");
            summary.errors.push(format!("due-campaign query failed: {e}"));
            return summary;
        }
    };

    let total = due.len();
    for (index, campaign) in due.into_iter().enumerate() {
        let now = chrono::Utc::now().timestamp();
        match queries::claim_campaign(pool, &campaign.id, now).await {
            Ok(true) => {}
            Ok(false) => {
                // Another invocation won the row. Normal under concurrent
                // triggers, not an error.
                debug!(campaign = %campaign.id, "claim lost, skipping");
                continue;
            }
            Err(e) => {
                warn!(campaign = %campaign.id, error = %e, "claim update failed");
                summary
                    .errors
                    .push(format!("campaign {}: claim update failed: {e}", campaign.id));
                continue;
            }
        }
        summary.processed += 1;

        match process_campaign(pool, provider, &campaign, cfg).await {
            Ok((sent, failed)) => {
                info!(campaign = %campaign.id, sent, failed, "campaign dispatched");
                summary.sent += sent;
                summary.failed += failed;
            }
            Err(e) => {
                // One campaign's failure never aborts the rest of the
                // candidate list.
                warn!(campaign = %campaign.id, error = %e, "campaign dispatch failed");
                summary.errors.push(format!("campaign {}: {e}", campaign.id));
                let now = chrono::Utc::now().timestamp();
                if let Err(e) = queries::force_campaign_failed(pool, &campaign.id, now).await {
                    warn!(campaign = %campaign.id, error = %e, "failed to mark campaign failed");
                }
            }
        }

        if index + 1 < total {
            tokio::time::sleep(cfg.campaign_delay()).await;
        }
    }

    summary
}

/// Steps 3-7 for one claimed campaign. Returns (sent, failed) recipient
/// counts; the caller owns the step-8 failure handling.
async fn process_campaign(
    pool: &SqlitePool,
    provider: &dyn DeliveryProvider,
    campaign: &Campaign,
    cfg: &DispatchConfig,
) -> Result<(u32, u32)> {
    // Re-read under the claim: the candidate snapshot may be stale relative
    // to concurrent partial progress.
    let recipients = queries::pending_recipients(pool, &campaign.id).await?;

    if recipients.is_empty() {
        let now = chrono::Utc::now().timestamp();
        queries::transition_campaign(
            pool,
            &campaign.id,
            CampaignStatus::Sending,
            CampaignStatus::Sent,
            Some(now),
            now,
        )
        .await?;
        info!(campaign = %campaign.id, "no pending recipients, marked sent");
        return Ok((0, 0));
    }

    let from = campaign.from_header();
    let emails: Vec<OutboundEmail> = recipients
        .iter()
        .map(|r| OutboundEmail {
            from: from.clone(),
            to: r.email.clone(),
            subject: render_template(&campaign.subject, r),
            html: render_template(&campaign.body, r),
        })
        .collect();

    let outcomes = dispatch_service::dispatch_campaign(
        provider,
        &campaign.id,
        &emails,
        cfg.batch_size,
        cfg.batch_delay(),
    )
    .await;

    let mut sent = 0u32;
    let mut failed = 0u32;
    for (recipient, outcome) in recipients.iter().zip(outcomes.iter()) {
        let now = chrono::Utc::now().timestamp();
        match outcome.message_id.as_deref() {
            Some(message_id) => {
                // Guarded on `pending`: if a raced invocation got here first
                // the row keeps its earlier outcome and we do not count it.
                if queries::mark_recipient_sent(pool, &recipient.id, message_id, now).await? {
                    sent += 1;
                }
            }
            None => {
                let error = outcome.error.as_deref().unwrap_or("send failed");
                if queries::mark_recipient_failed(pool, &recipient.id, error, now).await? {
                    failed += 1;
                }
            }
        }
    }

    // Inherited policy: one accepted recipient is enough for `sent`.
    let now = chrono::Utc::now().timestamp();
    let (final_status, sent_at) = if sent > 0 {
        (CampaignStatus::Sent, Some(now))
    } else {
        (CampaignStatus::Failed, None)
    };
    queries::transition_campaign(
        pool,
        &campaign.id,
        CampaignStatus::Sending,
        final_status,
        sent_at,
        now,
    )
    .await?;
    info!(campaign = %campaign.id, status = final_status.as_str(), "campaign settled");

    Ok((sent, failed))
}

/// {{name}} / {{email}} substitution. Template authoring lives in the
/// campaign editor, outside this service.
pub fn render_template(template: &str, recipient: &Recipient) -> String {
    template
        .replace("{{name}}", recipient.display_name())
        .replace("{{email}}", &recipient.email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::recipient::RecipientStatus;

    fn recipient(email: &str, name: Option<&str>) -> Recipient {
        Recipient {
            id: "r1".into(),
            campaign_id: "c1".into(),
            email: email.into(),
            name: name.map(str::to_string),
            status: RecipientStatus::Pending,
            sent_at: None,
            error_message: None,
            provider_message_id: None,
            last_event: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn render_substitutes_name_and_email() {
        let r = recipient("ada@example.com", Some("Ada"));
        assert_eq!(
            render_template("Hi {{name}}, mail for {{email}}", &r),
            "Hi Ada, mail for ada@example.com"
        );
    }

    #[test]
    fn render_falls_back_to_local_part() {
        let r = recipient("grace@example.com", None);
        assert_eq!(render_template("Hi {{name}}", &r), "Hi grace");
    }
}
