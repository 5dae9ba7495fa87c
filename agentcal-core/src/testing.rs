//! Shared fixtures for the crate's tests.

use chrono::{NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::event::{Event, EventSource, EventStatus};

pub fn sample_calendar() -> Calendar {
    Calendar::new("agent-1", "work")
}

pub fn standalone_event(calendar: &Calendar, title: &str) -> Event {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
    Event {
        id: Uuid::new_v4(),
        calendar_id: calendar.id,
        title: title.to_string(),
        description: None,
        location: None,
        start,
        end: start + chrono::Duration::hours(1),
        all_day: false,
        status: EventStatus::Confirmed,
        recurrence_rule: None,
        parent_id: None,
        occurrence_key: None,
        is_exception: false,
        series_cutoff: None,
        horizon_days: None,
        source: EventSource::Api,
        external_uid: None,
        sequence: 0,
        metadata: serde_json::json!({}),
        attendees: Vec::new(),
        created_at: start,
        updated_at: start,
    }
}

/// A series parent anchored at 2025-03-01 09:00 UTC.
pub fn series_parent(calendar: &Calendar, rule: &str) -> Event {
    let mut parent = standalone_event(calendar, "Series");
    parent.recurrence_rule = Some(rule.to_string());
    parent.status = EventStatus::Series;
    parent.horizon_days = Some(calendar.horizon_days);
    parent
}

/// A materialized instance of `parent` at `key`, starting 09:00 UTC.
pub fn instance_of(parent: &Event, key: NaiveDate) -> Event {
    let start = key
        .and_hms_opt(9, 0, 0)
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .unwrap_or(parent.start);
    Event {
        id: Uuid::new_v4(),
        recurrence_rule: None,
        parent_id: Some(parent.id),
        occurrence_key: Some(key),
        status: EventStatus::Confirmed,
        horizon_days: None,
        start,
        end: start + (parent.end - parent.start),
        ..parent.clone()
    }
}
