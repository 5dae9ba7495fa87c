//! The event model.
//!
//! A single `Event` row backs three things: standalone events, recurring
//! series definitions ("parents"), and materialized occurrences
//! ("instances"). The storage shape keeps them in one table; `Event::kind`
//! exposes the distinction as a tagged view so callers never have to reason
//! about which nullable columns are set.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A calendar event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub calendar_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Date-only event; `end` is inclusive.
    pub all_day: bool,
    pub status: EventStatus,

    // Recurrence linkage. At most one of `recurrence_rule` / `parent_id`
    // is set; `occurrence_key` and `is_exception` only accompany `parent_id`.
    pub recurrence_rule: Option<String>,
    pub parent_id: Option<Uuid>,
    pub occurrence_key: Option<NaiveDate>,
    pub is_exception: bool,
    /// Set by a future-scope deletion: the scheduler stops materializing
    /// occurrences at or after this date.
    pub series_cutoff: Option<NaiveDate>,
    /// Rolling materialization window, fixed at series creation. Parents only.
    pub horizon_days: Option<i64>,

    // Provenance
    pub source: EventSource,
    pub external_uid: Option<String>,
    /// Revision counter for protocol compatibility with external clients.
    pub sequence: i64,

    pub metadata: serde_json::Value,
    pub attendees: Vec<Attendee>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An event attendee. Reply/invite tracking lives in `response_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub name: Option<String>,
    pub email: String,
    /// "accepted", "declined", "tentative", "needsAction"
    pub response_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
    /// Sentinel for series parents. Never appears in occurrence-facing
    /// listings or feeds.
    Series,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "confirmed",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Series => "series",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(EventStatus::Confirmed),
            "tentative" => Some(EventStatus::Tentative),
            "cancelled" => Some(EventStatus::Cancelled),
            "series" => Some(EventStatus::Series),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Api,
    Inbound,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Api => "api",
            EventSource::Inbound => "inbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api" => Some(EventSource::Api),
            "inbound" => Some(EventSource::Inbound),
            _ => None,
        }
    }
}

/// Tagged view over the recurrence-linkage columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind<'a> {
    Standalone,
    SeriesDefinition {
        rule: &'a str,
    },
    SeriesInstance {
        parent_id: Uuid,
        occurrence_key: NaiveDate,
        is_exception: bool,
    },
}

impl Event {
    /// Which of the three row shapes this is.
    pub fn kind(&self) -> EventKind<'_> {
        if let Some(rule) = &self.recurrence_rule {
            return EventKind::SeriesDefinition { rule };
        }
        if let (Some(parent_id), Some(occurrence_key)) = (self.parent_id, self.occurrence_key) {
            return EventKind::SeriesInstance {
                parent_id,
                occurrence_key,
                is_exception: self.is_exception,
            };
        }
        EventKind::Standalone
    }

    /// Planned = still follows the parent: not an exception, not cancelled.
    pub fn is_planned(&self) -> bool {
        !self.is_exception && self.status != EventStatus::Cancelled
    }
}

/// Partial update: only supplied fields change.
///
/// `propagated()` below is the full list of fields a parent edit pushes to
/// its planned instances. Temporal fields and the recurrence rule are
/// deliberately absent from it; they are handled by rematerialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: Option<bool>,
    pub status: Option<EventStatus>,
    pub metadata: Option<serde_json::Value>,
    pub attendees: Option<Vec<Attendee>>,
    /// New recurrence rule; meaningful only when patching a series parent.
    pub recurrence: Option<String>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.start.is_none()
            && self.end.is_none()
            && self.all_day.is_none()
            && self.status.is_none()
            && self.metadata.is_none()
            && self.attendees.is_none()
            && self.recurrence.is_none()
    }

    /// The subset of this patch that cascades from a parent to its planned
    /// instances.
    pub fn propagated(&self) -> EventPatch {
        EventPatch {
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            status: self.status.clone(),
            metadata: self.metadata.clone(),
            attendees: self.attendees.clone(),
            ..EventPatch::default()
        }
    }

    /// Apply the non-recurrence fields to an event in place.
    pub fn apply_to(&self, event: &mut Event) {
        if let Some(title) = &self.title {
            event.title = title.clone();
        }
        if let Some(description) = &self.description {
            event.description = Some(description.clone());
        }
        if let Some(location) = &self.location {
            event.location = Some(location.clone());
        }
        if let Some(start) = self.start {
            event.start = start;
        }
        if let Some(end) = self.end {
            event.end = end;
        }
        if let Some(all_day) = self.all_day {
            event.all_day = all_day;
        }
        if let Some(status) = self.status {
            event.status = status;
        }
        if let Some(metadata) = &self.metadata {
            event.metadata = metadata.clone();
        }
        if let Some(attendees) = &self.attendees {
            event.attendees = attendees.clone();
        }
    }
}
