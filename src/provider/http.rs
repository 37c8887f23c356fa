use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Deserialize;

use super::{DeliveryProvider, MessageDetails, OutboundEmail, SendOutcome};

/// REST client for the bulk-email provider API.
pub struct HttpDeliveryProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

impl HttpDeliveryProvider {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post_email(&self, email: &OutboundEmail, idempotency_key: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&serde_json::json!({
                "from": email.from,
                "to": [email.to],
                "subject": email.subject,
                "html": email.html,
            }))
            .send()
            .await
            .context("provider request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("provider rejected send ({status}): {body}");
        }
        let parsed: SendResponse = resp.json().await.context("malformed provider response")?;
        Ok(parsed.id)
    }
}

#[async_trait::async_trait]
impl DeliveryProvider for HttpDeliveryProvider {
    async fn send_batch(
        &self,
        emails: &[OutboundEmail],
        idempotency_key: &str,
    ) -> Result<Vec<SendOutcome>> {
        // One request per member, awaited jointly. The member index extends
        // the batch key so retried batches dedupe per message.
        let sends = emails.iter().enumerate().map(|(i, email)| {
            let member_key = format!("{idempotency_key}/{i}");
            async move {
                match self.post_email(email, &member_key).await {
                    Ok(id) => SendOutcome::accepted(&email.to, id),
                    Err(e) => SendOutcome::rejected(&email.to, e.to_string()),
                }
            }
        });
        Ok(join_all(sends).await)
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetails> {
        let resp = self
            .http
            .get(format!("{}/emails/{}", self.base_url, id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("provider request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("provider lookup failed ({status})");
        }
        resp.json::<MessageDetails>()
            .await
            .context("malformed provider response")
    }

    async fn verify_connectivity(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/domains", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("provider unreachable")?;
        if !resp.status().is_success() {
            anyhow::bail!("provider auth check failed ({})", resp.status());
        }
        Ok(())
    }
}
