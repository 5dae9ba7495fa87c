//! Inbound reconciliation: mapping externally supplied messages (parsed
//! upstream from e.g. an email attachment) onto the event model, keyed by
//! the message's unique identifier.
//!
//! Unusable input is reported as `Ignored` with a reason, never as an
//! error: the transport answers success upstream regardless, so the
//! provider does not retry, and the reason survives in the logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AgentCalResult;
use crate::event::{Attendee, Event, EventSource, EventStatus};
use crate::store::EventStore;

/// Method field of the inbound message (iTIP-style).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InboundMethod {
    /// Create or update the identified event.
    Request,
    /// An attendee's response to an invite.
    Reply,
    /// Cancel the identified event.
    Cancel,
}

/// A parsed inbound message. Provider-specific decoding happens upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub method: InboundMethod,
    /// The externally supplied unique identifier.
    pub uid: Option<String>,
    pub calendar_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub all_day: bool,
    /// The responding attendee, for REPLY messages.
    pub attendee: Option<Attendee>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum InboundOutcome {
    Created { event_id: Uuid },
    Updated { event_id: Uuid },
    Cancelled { event_id: Uuid },
    Ignored { reason: String },
}

fn ignored(reason: &str) -> InboundOutcome {
    InboundOutcome::Ignored {
        reason: reason.to_string(),
    }
}

/// Reconcile one inbound message against the store. Works the same whether
/// the identified event is standalone or series-derived.
pub fn reconcile(
    store: &EventStore,
    msg: &InboundMessage,
    now: DateTime<Utc>,
) -> AgentCalResult<(InboundOutcome, Option<Event>)> {
    let uid = match msg.uid.as_deref().map(str::trim) {
        Some(uid) if !uid.is_empty() => uid,
        _ => return Ok((ignored("missing unique identifier"), None)),
    };

    let existing = store.find_by_external_uid(msg.calendar_id, uid)?;

    match (msg.method, existing) {
        (InboundMethod::Cancel, Some(mut event)) => {
            event.status = EventStatus::Cancelled;
            event.sequence += 1;
            event.updated_at = now;
            store.update_event(&event)?;
            Ok((
                InboundOutcome::Cancelled { event_id: event.id },
                Some(event),
            ))
        }
        (InboundMethod::Cancel, None) => {
            Ok((ignored("cancellation for unknown identifier"), None))
        }
        (InboundMethod::Reply, Some(mut event)) => {
            let reply = match &msg.attendee {
                Some(attendee) => attendee,
                None => return Ok((ignored("reply without attendee"), None)),
            };
            match event.attendees.iter_mut().find(|a| a.email == reply.email) {
                Some(attendee) => attendee.response_status = reply.response_status.clone(),
                None => event.attendees.push(reply.clone()),
            }
            event.sequence += 1;
            event.updated_at = now;
            store.update_event(&event)?;
            Ok((InboundOutcome::Updated { event_id: event.id }, Some(event)))
        }
        (InboundMethod::Reply, None) => Ok((ignored("reply for unknown identifier"), None)),
        (InboundMethod::Request, Some(mut event)) => {
            if let Some(title) = &msg.title {
                event.title = title.clone();
            }
            if let Some(description) = &msg.description {
                event.description = Some(description.clone());
            }
            if let Some(location) = &msg.location {
                event.location = Some(location.clone());
            }
            if let Some(start) = msg.start {
                event.start = start;
            }
            if let Some(end) = msg.end {
                event.end = end;
            }
            event.sequence += 1;
            event.updated_at = now;
            store.update_event(&event)?;
            Ok((InboundOutcome::Updated { event_id: event.id }, Some(event)))
        }
        (InboundMethod::Request, None) => {
            let (start, end) = match (msg.start, msg.end) {
                (Some(start), Some(end)) => (start, end),
                _ => return Ok((ignored("missing start or end time"), None)),
            };
            let event = Event {
                id: Uuid::new_v4(),
                calendar_id: msg.calendar_id,
                title: msg
                    .title
                    .clone()
                    .unwrap_or_else(|| "(No title)".to_string()),
                description: msg.description.clone(),
                location: msg.location.clone(),
                start,
                end,
                all_day: msg.all_day,
                status: EventStatus::Tentative,
                recurrence_rule: None,
                parent_id: None,
                occurrence_key: None,
                is_exception: false,
                series_cutoff: None,
                horizon_days: None,
                source: EventSource::Inbound,
                external_uid: Some(uid.to_string()),
                sequence: 0,
                metadata: serde_json::json!({}),
                attendees: msg.attendee.iter().cloned().collect(),
                created_at: now,
                updated_at: now,
            };
            store.insert_event(&event)?;
            Ok((InboundOutcome::Created { event_id: event.id }, Some(event)))
        }
    }
}
