/// Delivery Event Reconciler: verifies signed provider callbacks, dedupes
/// them on the external event identity, and projects each event onto the
/// matching recipients.
use anyhow::{bail, Context, Result};
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::queries;

type HmacSha256 = Hmac<Sha256>;

/// Accepted skew between the signature timestamp and our clock.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

const ID_HEADERS: [&str; 2] = ["svix-id", "webhook-id"];
const TIMESTAMP_HEADERS: [&str; 2] = ["svix-timestamp", "webhook-timestamp"];
const SIGNATURE_HEADERS: [&str; 2] = ["svix-signature", "webhook-signature"];

/// Event identity authenticated by the signature; doubles as the dedupe key.
#[derive(Debug, Clone)]
pub struct VerifiedEvent {
    pub event_id: String,
}

#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event_id: String,
    pub event_type: String,
    pub provider_message_id: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDisposition {
    Processed,
    Duplicate,
    Ignored,
}

impl EventDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
        }
    }
}

fn header_value<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|n| headers.get(*n))
        .and_then(|v| v.to_str().ok())
}

/// Signature check over `{id}.{timestamp}.{body}` with HMAC-SHA256 and the
/// shared secret, compared in constant time against every `v1,<base64>`
/// entry in the signature header. Rejects before any store access.
pub fn verify_webhook(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<VerifiedEvent> {
    let event_id = header_value(headers, &ID_HEADERS).context("missing webhook id header")?;
    let timestamp =
        header_value(headers, &TIMESTAMP_HEADERS).context("missing webhook timestamp header")?;
    let signature =
        header_value(headers, &SIGNATURE_HEADERS).context("missing webhook signature header")?;

    let ts: i64 = timestamp.parse().context("invalid webhook timestamp")?;
    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
        bail!("webhook timestamp outside tolerance");
    }

    let key = decode_secret(secret);
    let mut signed = Vec::with_capacity(event_id.len() + timestamp.len() + body.len() + 2);
    signed.extend_from_slice(event_id.as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(timestamp.as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(body);

    for entry in signature.split_whitespace() {
        let Some(candidate) = entry.strip_prefix("v1,") else {
            continue;
        };
        let Ok(candidate) = BASE64.decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|_| anyhow::anyhow!("invalid signing secret"))?;
        mac.update(&signed);
        if mac.verify_slice(&candidate).is_ok() {
            return Ok(VerifiedEvent {
                event_id: event_id.to_string(),
            });
        }
    }
    bail!("webhook signature mismatch")
}

/// Secrets arrive `whsec_`-prefixed and base64 encoded; secrets issued
/// outside that convention are used as raw bytes.
fn decode_secret(secret: &str) -> Vec<u8> {
    let trimmed = secret.strip_prefix("whsec_").unwrap_or(secret);
    BASE64
        .decode(trimmed)
        .unwrap_or_else(|_| trimmed.as_bytes().to_vec())
}

pub fn parse_event(event_id: &str, body: &[u8]) -> Result<InboundEvent> {
    let payload: serde_json::Value =
        serde_json::from_slice(body).context("webhook body is not valid JSON")?;
    let event_type = payload
        .get("type")
        .and_then(|v| v.as_str())
        .context("webhook body has no event type")?
        .to_string();
    let provider_message_id = payload
        .pointer("/data/email_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Ok(InboundEvent {
        event_id: event_id.to_string(),
        event_type,
        provider_message_id,
        payload,
    })
}

/// Dedupe, persist, project. Idempotent: a replayed event is detected on the
/// stored identity and acknowledged without applying anything twice.
pub async fn process_event(pool: &SqlitePool, event: InboundEvent) -> Result<EventDisposition> {
    let Some(label) = lifecycle_label(&event.event_type) else {
        info!(event_type = %event.event_type, "ignoring non-lifecycle event");
        return Ok(EventDisposition::Ignored);
    };

    if queries::delivery_event_seen(pool, &event.event_id).await? {
        info!(event = %event.event_id, "duplicate delivery event acknowledged");
        return Ok(EventDisposition::Duplicate);
    }

    let now = chrono::Utc::now().timestamp();
    let inserted = queries::insert_delivery_event(
        pool,
        &event.event_id,
        &event.event_type,
        event.provider_message_id.as_deref(),
        &event.payload.to_string(),
        now,
    )
    .await?;
    if !inserted {
        // A concurrent delivery of the same event beat us to the insert.
        info!(event = %event.event_id, "duplicate delivery event acknowledged");
        return Ok(EventDisposition::Duplicate);
    }

    // From here on the event record exists. A failed projection is logged
    // and left to the provider's redelivery, which dedupes above.
    match event.provider_message_id.as_deref() {
        Some(message_id) => {
            let applied = if is_failure_event(&event.event_type) {
                let error = failure_message(&event);
                queries::apply_recipient_failure(pool, message_id, label, &error, now).await
            } else {
                queries::apply_recipient_event(pool, message_id, label, now).await
            };
            match applied {
                Ok(rows) => {
                    info!(event = %event.event_id, label, rows, "delivery event applied")
                }
                Err(e) => {
                    warn!(event = %event.event_id, error = %e, "recipient update failed after event stored")
                }
            }
        }
        None => warn!(event = %event.event_id, "delivery event carries no message id"),
    }

    Ok(EventDisposition::Processed)
}

fn lifecycle_label(event_type: &str) -> Option<&'static str> {
    match event_type {
        "email.sent" => Some("sent"),
        "email.delivered" => Some("delivered"),
        "email.delivery_delayed" => Some("delivery_delayed"),
        "email.complained" => Some("complained"),
        "email.opened" => Some("opened"),
        "email.clicked" => Some("clicked"),
        "email.bounced" => Some("bounced"),
        "email.failed" => Some("failed"),
        _ => None,
    }
}

fn is_failure_event(event_type: &str) -> bool {
    matches!(event_type, "email.bounced" | "email.failed")
}

fn failure_message(event: &InboundEvent) -> String {
    event
        .payload
        .pointer("/data/bounce/message")
        .or_else(|| event.payload.pointer("/data/reason"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("delivery failed ({})", event.event_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_dGVzdC1zaWduaW5nLXNlY3JldA==";

    fn sign(event_id: &str, timestamp: i64, body: &[u8]) -> String {
        let key = decode_secret(SECRET);
        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(format!("{event_id}.{timestamp}.").as_bytes());
        mac.update(body);
        format!("v1,{}", BASE64.encode(mac.finalize().into_bytes()))
    }

    fn signed_headers(event_id: &str, timestamp: i64, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("svix-id", HeaderValue::from_str(event_id).unwrap());
        headers.insert(
            "svix-timestamp",
            HeaderValue::from_str(&timestamp.to_string()).unwrap(),
        );
        headers.insert(
            "svix-signature",
            HeaderValue::from_str(&sign(event_id, timestamp, body)).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"type":"email.delivered"}"#;
        let now = chrono::Utc::now().timestamp();
        let headers = signed_headers("evt_1", now, body);
        let verified = verify_webhook(SECRET, &headers, body).unwrap();
        assert_eq!(verified.event_id, "evt_1");
    }

    #[test]
    fn accepts_signature_among_multiple_entries() {
        let body = br#"{"type":"email.delivered"}"#;
        let now = chrono::Utc::now().timestamp();
        let mut headers = signed_headers("evt_1", now, body);
        let combined = format!("v1,Zm9yZ2VyeQ== {}", sign("evt_1", now, body));
        headers.insert("svix-signature", HeaderValue::from_str(&combined).unwrap());
        assert!(verify_webhook(SECRET, &headers, body).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let body = br#"{"type":"email.delivered"}"#;
        let now = chrono::Utc::now().timestamp();
        let headers = signed_headers("evt_1", now, body);
        let tampered = br#"{"type":"email.bounced"}"#;
        assert!(verify_webhook(SECRET, &headers, tampered).is_err());
    }

    #[test]
    fn rejects_missing_headers() {
        let headers = HeaderMap::new();
        assert!(verify_webhook(SECRET, &headers, b"{}").is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let body = br#"{"type":"email.delivered"}"#;
        let stale = chrono::Utc::now().timestamp() - 3600;
        let headers = signed_headers("evt_1", stale, body);
        assert!(verify_webhook(SECRET, &headers, body).is_err());
    }

    #[test]
    fn parse_extracts_type_and_message_id() {
        let body = br#"{"type":"email.bounced","data":{"email_id":"msg_9","bounce":{"message":"550 user unknown"}}}"#;
        let event = parse_event("evt_2", body).unwrap();
        assert_eq!(event.event_type, "email.bounced");
        assert_eq!(event.provider_message_id.as_deref(), Some("msg_9"));
        assert!(is_failure_event(&event.event_type));
        assert_eq!(failure_message(&event), "550 user unknown");
    }

    #[test]
    fn unknown_types_have_no_label() {
        assert_eq!(lifecycle_label("contact.created"), None);
        assert_eq!(lifecycle_label("email.delivered"), Some("delivered"));
    }
}
