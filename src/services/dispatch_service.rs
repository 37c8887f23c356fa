/// Batch Dispatcher: splits a campaign's messages into rate-limited chunks
/// and turns every chunk into per-recipient outcomes.
use std::time::Duration;

use tracing::{debug, warn};

use crate::provider::{DeliveryProvider, OutboundEmail, SendOutcome};

/// Sends `emails` through the provider in chunks of `batch_size`, sleeping
/// `delay` between chunks (never after the last). The result preserves input
/// order and always carries one outcome per input message: a chunk-level
/// provider error degrades to a shared per-member failure instead of raising.
pub async fn dispatch_campaign(
    provider: &dyn DeliveryProvider,
    campaign_id: &str,
    emails: &[OutboundEmail],
    batch_size: usize,
    delay: Duration,
) -> Vec<SendOutcome> {
    let batch_size = batch_size.max(1);
    let chunk_count = emails.len().div_ceil(batch_size);
    let mut outcomes = Vec::with_capacity(emails.len());

    for (index, chunk) in emails.chunks(batch_size).enumerate() {
        // Deterministic per-batch token: a retried run reuses it and the
        // provider dedupes the resend.
        let idempotency_key = format!("{campaign_id}:batch:{index}");

        match provider.send_batch(chunk, &idempotency_key).await {
            Ok(batch) if batch.len() == chunk.len() => outcomes.extend(batch),
            Ok(batch) => {
                warn!(
                    campaign = %campaign_id,
                    expected = chunk.len(),
                    got = batch.len(),
                    "provider returned misaligned outcomes, failing chunk"
                );
                outcomes.extend(chunk.iter().map(|email| {
                    SendOutcome::rejected(&email.to, "provider returned misaligned outcomes".into())
                }));
            }
            Err(e) => {
                warn!(campaign = %campaign_id, batch = index, error = %e, "batch send failed");
                let shared = format!("batch send failed: {e}");
                outcomes.extend(
                    chunk
                        .iter()
                        .map(|email| SendOutcome::rejected(&email.to, shared.clone())),
                );
            }
        }

        if index + 1 < chunk_count {
            debug!(campaign = %campaign_id, batch = index, delay_ms = delay.as_millis() as u64, "inter-batch delay");
            tokio::time::sleep(delay).await;
        }
    }

    outcomes
}
