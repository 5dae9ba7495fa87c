//! Outbound change notifications.
//!
//! One notification per externally observable event mutation, POSTed to the
//! owning calendar's webhook URL. Delivery is best-effort telemetry: single
//! attempt, bounded timeout, failures logged and swallowed. Retrying would
//! need idempotency keys and backpressure machinery the use case does not
//! justify.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::event::Event;

pub const SIGNATURE_HEADER: &str = "X-Agentcal-Signature";

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

/// What happened to the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Responded,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Responded => "responded",
        }
    }
}

/// Notification payload. The signature covers the exact serialized bytes
/// as transmitted.
#[derive(Debug, Serialize)]
pub struct Notification<'a> {
    pub event: &'static str,
    pub calendar_id: Uuid,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub data: &'a Event,
}

pub struct Notifier {
    client: Client,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .user_agent(concat!("agentcal/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Notifier { client }
    }

    /// Fire-and-forget delivery of one change notification, stamped with the
    /// caller's clock. No-op when the calendar has no webhook configured.
    pub fn notify(&self, calendar: &Calendar, kind: ChangeKind, event: &Event, now: DateTime<Utc>) {
        let url = match &calendar.webhook_url {
            Some(url) => url.clone(),
            None => return,
        };

        let payload = Notification {
            event: kind.as_str(),
            calendar_id: calendar.id,
            event_id: event.id,
            timestamp: now,
            data: event,
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(event = %event.id, %err, "failed to serialize notification");
                return;
            }
        };
        let signature = calendar
            .webhook_secret
            .as_deref()
            .map(|secret| sign(secret, &body));

        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        // Deliveries ride the caller's runtime; with no runtime (sync
        // tests), notifications are dropped like any other failure.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(%url, "no async runtime, dropping notification");
            return;
        };
        let event_id = event.id;
        handle.spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(%url, status = %response.status(), event = %event_id, "webhook delivery rejected");
                }
                Ok(_) => {
                    tracing::debug!(%url, event = %event_id, "webhook delivered");
                }
                Err(err) => {
                    tracing::warn!(%url, %err, event = %event_id, "webhook delivery failed");
                }
            }
        });
    }
}

/// Keyed hash over the exact transmitted bytes, `sha256=<hex>`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length; unreachable in practice.
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature produced by [`sign`].
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    sign(secret, body) == signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_calendar, standalone_event};

    #[test]
    fn signature_matches_keyed_hash_of_exact_bytes() {
        let body = br#"{"event":"created","data":{}}"#;
        let signature = sign("topsecret", body);
        assert!(signature.starts_with("sha256="));
        assert!(verify("topsecret", body, &signature));
    }

    #[test]
    fn tampering_with_any_byte_invalidates_signature() {
        let body = b"payload-bytes";
        let signature = sign("topsecret", body);
        let mut tampered = body.to_vec();
        tampered[0] ^= 1;
        assert!(!verify("topsecret", &tampered, &signature));
        assert!(!verify("othersecret", body, &signature));
    }

    #[test]
    fn signature_is_deterministic() {
        let body = b"same-bytes";
        assert_eq!(sign("k", body), sign("k", body));
    }

    #[test]
    fn notify_without_webhook_is_a_no_op() {
        let calendar = sample_calendar();
        let event = standalone_event(&calendar, "Quiet");
        // No webhook_url configured and no runtime running; must not panic.
        Notifier::new().notify(&calendar, ChangeKind::Created, &event, Utc::now());
    }

    #[test]
    fn payload_is_deterministic_for_a_fixed_instant() {
        use chrono::TimeZone;

        let calendar = sample_calendar();
        let event = standalone_event(&calendar, "Sync");
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let build = || {
            serde_json::to_vec(&Notification {
                event: ChangeKind::Updated.as_str(),
                calendar_id: calendar.id,
                event_id: event.id,
                timestamp: now,
                data: &event,
            })
            .unwrap()
        };
        assert_eq!(sign("k", &build()), sign("k", &build()));
    }

    #[test]
    fn change_kind_tags() {
        assert_eq!(ChangeKind::Created.as_str(), "created");
        assert_eq!(ChangeKind::Updated.as_str(), "updated");
        assert_eq!(ChangeKind::Deleted.as_str(), "deleted");
        assert_eq!(ChangeKind::Responded.as_str(), "responded");
    }
}
