//! `CalendarService`: the transport-facing facade over the engine.
//!
//! Routes (and anything else driving the core) talk to this type; it owns
//! the store, the notifier, and the clock, and fans out one change
//! notification per externally observable mutation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::calendar::{Calendar, DEFAULT_HORIZON_DAYS};
use crate::clock::Clock;
use crate::deletion::{delete_event, DeleteOutcome, DeleteScope};
use crate::error::{AgentCalError, AgentCalResult};
use crate::event::{Attendee, Event, EventKind, EventPatch, EventSource, EventStatus};
use crate::inbound::{reconcile, InboundMessage, InboundMethod, InboundOutcome};
use crate::materialize::materialize;
use crate::notify::{ChangeKind, Notifier};
use crate::propagate::apply_patch;
use crate::recurrence::RecurrenceRule;
use crate::store::EventStore;

#[derive(Debug, Clone, Deserialize)]
pub struct NewCalendar {
    pub owner: String,
    pub name: String,
    pub timezone: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub horizon_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    pub description: Option<String>,
    pub location: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    /// Recurrence rule string; presence makes this a series.
    pub recurrence: Option<String>,
}

/// Result of creating an event. `materialized` is zero for standalone
/// events and the initial instance count for a series.
#[derive(Debug)]
pub struct CreatedEvent {
    pub event: Event,
    pub materialized: usize,
}

pub struct CalendarService {
    store: Arc<EventStore>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
}

impl CalendarService {
    pub fn new(store: Arc<EventStore>, notifier: Arc<Notifier>, clock: Arc<dyn Clock>) -> Self {
        CalendarService {
            store,
            notifier,
            clock,
        }
    }

    // --- calendars ---

    pub fn create_calendar(&self, req: NewCalendar) -> AgentCalResult<Calendar> {
        let mut calendar = Calendar::new(&req.owner, &req.name);
        if let Some(timezone) = req.timezone {
            calendar.timezone = timezone;
        }
        calendar.tz()?; // reject bad timezones before any write
        calendar.webhook_url = req.webhook_url;
        calendar.webhook_secret = req.webhook_secret;
        calendar.horizon_days = req.horizon_days.unwrap_or(DEFAULT_HORIZON_DAYS);
        calendar.created_at = self.clock.now();
        self.store.insert_calendar(&calendar)?;
        Ok(calendar)
    }

    pub fn list_calendars(&self, owner: &str) -> AgentCalResult<Vec<Calendar>> {
        self.store.list_calendars(owner)
    }

    pub fn get_calendar(&self, id: Uuid) -> AgentCalResult<Calendar> {
        self.store
            .get_calendar(id)?
            .ok_or_else(|| AgentCalError::NotFound(format!("calendar {id}")))
    }

    pub fn delete_calendar(&self, id: Uuid) -> AgentCalResult<()> {
        if !self.store.delete_calendar(id)? {
            return Err(AgentCalError::NotFound(format!("calendar {id}")));
        }
        Ok(())
    }

    // --- events ---

    pub fn create_event(&self, calendar_id: Uuid, req: NewEvent) -> AgentCalResult<CreatedEvent> {
        let calendar = self.get_calendar(calendar_id)?;
        let now = self.clock.now();

        // Validate the rule before any mutation.
        let rule: Option<RecurrenceRule> = match &req.recurrence {
            Some(rule_str) => Some(rule_str.parse()?),
            None => None,
        };

        let mut event = Event {
            id: Uuid::new_v4(),
            calendar_id,
            title: req.title,
            description: req.description,
            location: req.location,
            start: req.start,
            end: req.end,
            all_day: req.all_day,
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
            metadata: req.metadata.unwrap_or_else(|| serde_json::json!({})),
            attendees: req.attendees,
            created_at: now,
            updated_at: now,
        };

        let Some(rule) = rule else {
            self.store.insert_event(&event)?;
            self.notifier
                .notify(&calendar, ChangeKind::Created, &event, now);
            return Ok(CreatedEvent {
                event,
                materialized: 0,
            });
        };

        event.status = EventStatus::Series;
        event.recurrence_rule = Some(rule.to_string());
        // The window is fixed at series creation time.
        event.horizon_days = Some(calendar.horizon_days);
        self.store.insert_event(&event)?;

        let horizon_end = now + Duration::days(calendar.horizon_days);
        let created = materialize(&self.store, &event, calendar.tz()?, horizon_end, now)?;
        for instance in &created {
            self.notifier
                .notify(&calendar, ChangeKind::Created, instance, now);
        }

        Ok(CreatedEvent {
            event,
            materialized: created.len(),
        })
    }

    pub fn list_events(
        &self,
        calendar_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AgentCalResult<Vec<Event>> {
        self.get_calendar(calendar_id)?;
        self.store.list_events(calendar_id, from, to)
    }

    pub fn get_event(&self, calendar_id: Uuid, event_id: Uuid) -> AgentCalResult<Event> {
        self.store
            .get_event(calendar_id, event_id)?
            .ok_or_else(|| AgentCalError::NotFound(format!("event {event_id}")))
    }

    pub fn patch_event(
        &self,
        calendar_id: Uuid,
        event_id: Uuid,
        patch: &EventPatch,
    ) -> AgentCalResult<Event> {
        let calendar = self.get_calendar(calendar_id)?;
        let now = self.clock.now();
        let window = calendar.horizon_days;
        let horizon_end = now + Duration::days(window);

        let outcome = apply_patch(
            &self.store,
            &calendar,
            event_id,
            patch,
            calendar.tz()?,
            horizon_end,
            now,
        )?;

        let event = outcome
            .event
            .ok_or_else(|| AgentCalError::NotFound(format!("event {event_id}")))?;

        if event.status != EventStatus::Series {
            self.notifier
                .notify(&calendar, ChangeKind::Updated, &event, now);
        }
        for sibling in &outcome.propagated {
            self.notifier
                .notify(&calendar, ChangeKind::Updated, sibling, now);
        }
        for instance in &outcome.created {
            self.notifier
                .notify(&calendar, ChangeKind::Created, instance, now);
        }
        for instance in &outcome.cancelled {
            self.notifier
                .notify(&calendar, ChangeKind::Deleted, instance, now);
        }

        Ok(event)
    }

    pub fn delete_event(
        &self,
        calendar_id: Uuid,
        event_id: Uuid,
        scope: DeleteScope,
    ) -> AgentCalResult<DeleteOutcome> {
        let calendar = self.get_calendar(calendar_id)?;
        let now = self.clock.now();
        let outcome = delete_event(&self.store, &calendar, event_id, scope, now)?;

        for event in outcome.cancelled.iter().chain(outcome.removed.iter()) {
            // The hidden series row itself is not an observable occurrence.
            if event.status != EventStatus::Series {
                self.notifier
                    .notify(&calendar, ChangeKind::Deleted, event, now);
            }
        }
        Ok(outcome)
    }

    /// RSVP to an event. A response is a direct edit: on an instance it
    /// marks the row as an exception like any other edit.
    pub fn respond(
        &self,
        calendar_id: Uuid,
        event_id: Uuid,
        email: &str,
        response_status: &str,
    ) -> AgentCalResult<Event> {
        let calendar = self.get_calendar(calendar_id)?;
        let mut event = self.get_event(calendar_id, event_id)?;

        // The hidden parent row is not an addressable occurrence; a response
        // recorded there would never show up in any listing.
        if matches!(event.kind(), EventKind::SeriesDefinition { .. }) {
            return Err(AgentCalError::NotFound(format!("event {event_id}")));
        }

        let attendee = event
            .attendees
            .iter_mut()
            .find(|a| a.email == email)
            .ok_or_else(|| AgentCalError::NotFound(format!("attendee {email}")))?;
        attendee.response_status = Some(response_status.to_string());

        if event.parent_id.is_some() {
            event.is_exception = true;
        }
        event.sequence += 1;
        let now = self.clock.now();
        event.updated_at = now;
        self.store.update_event(&event)?;

        self.notifier
            .notify(&calendar, ChangeKind::Responded, &event, now);
        Ok(event)
    }

    // --- inbound ---

    pub fn inbound(&self, msg: &InboundMessage) -> AgentCalResult<InboundOutcome> {
        let calendar = self.get_calendar(msg.calendar_id)?;
        let now = self.clock.now();
        let (outcome, event) = reconcile(&self.store, msg, now)?;

        if let Some(event) = &event {
            let kind = match (&outcome, msg.method) {
                (InboundOutcome::Created { .. }, _) => Some(ChangeKind::Created),
                (InboundOutcome::Updated { .. }, InboundMethod::Reply) => {
                    Some(ChangeKind::Responded)
                }
                (InboundOutcome::Updated { .. }, _) => Some(ChangeKind::Updated),
                (InboundOutcome::Cancelled { .. }, _) => Some(ChangeKind::Deleted),
                (InboundOutcome::Ignored { .. }, _) => None,
            };
            if let Some(kind) = kind {
                self.notifier.notify(&calendar, kind, event, now);
            }
        }
        if let InboundOutcome::Ignored { reason } = &outcome {
            tracing::info!(calendar = %msg.calendar_id, %reason, "inbound message ignored");
        }

        Ok(outcome)
    }
}
