//! The three deletion scopes for events and series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::{AgentCalError, AgentCalResult};
use crate::event::{Event, EventKind, EventStatus};
use crate::store::EventStore;

/// How far a deletion reaches across a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Cancel exactly the targeted instance.
    #[default]
    Single,
    /// Cancel the targeted instance and everything at or after its
    /// occurrence key, and stop materializing past that date.
    Future,
    /// Destroy the parent and every instance. Non-recoverable.
    All,
}

impl DeleteScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteScope::Single => "single",
            DeleteScope::Future => "future",
            DeleteScope::All => "all",
        }
    }
}

/// What a deletion did, for the caller to notify on.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub scope: DeleteScope,
    /// Rows cancelled in place (single/future scopes, standalone events).
    pub cancelled: Vec<Event>,
    /// Rows removed entirely (all scope: the parent and its instances).
    pub removed: Vec<Event>,
}

impl DeleteOutcome {
    pub fn affected(&self) -> usize {
        self.cancelled.len() + self.removed.len()
    }
}

/// Delete an event with the requested scope.
///
/// Standalone events are scope-free: any scope cancels just that event.
/// Targeting a series parent coerces the scope to `All`; single/future only
/// make sense against an instance.
pub fn delete_event(
    store: &EventStore,
    calendar: &Calendar,
    event_id: Uuid,
    scope: DeleteScope,
    now: DateTime<Utc>,
) -> AgentCalResult<DeleteOutcome> {
    let event = store
        .get_event(calendar.id, event_id)?
        .ok_or_else(|| AgentCalError::NotFound(format!("event {event_id}")))?;

    match event.kind() {
        // Standalone deletion is scope-free: report it as single.
        EventKind::Standalone => cancel_single(store, event, DeleteScope::Single, now),
        EventKind::SeriesDefinition { .. } => delete_series(store, event),
        EventKind::SeriesInstance {
            parent_id,
            occurrence_key,
            ..
        } => match scope {
            DeleteScope::Single => cancel_single(store, event, scope, now),
            DeleteScope::Future => cancel_future(store, calendar, parent_id, occurrence_key, now),
            DeleteScope::All => {
                let parent = store
                    .get_event(calendar.id, parent_id)?
                    .ok_or_else(|| AgentCalError::NotFound(format!("series {parent_id}")))?;
                delete_series(store, parent)
            }
        },
    }
}

fn cancel_single(
    store: &EventStore,
    mut event: Event,
    scope: DeleteScope,
    now: DateTime<Utc>,
) -> AgentCalResult<DeleteOutcome> {
    event.status = EventStatus::Cancelled;
    event.sequence += 1;
    event.updated_at = now;
    store.update_event(&event)?;
    Ok(DeleteOutcome {
        scope,
        cancelled: vec![event],
        removed: Vec::new(),
    })
}

/// Cancel every planned or exception instance at or after the cutoff, and
/// record the cutoff on the parent so the scheduler never re-creates them.
/// One transaction: a reader never sees the cutoff without the
/// cancellations or vice versa.
fn cancel_future(
    store: &EventStore,
    calendar: &Calendar,
    parent_id: Uuid,
    cutoff: chrono::NaiveDate,
    now: DateTime<Utc>,
) -> AgentCalResult<DeleteOutcome> {
    let mut parent = store
        .get_event(calendar.id, parent_id)?
        .ok_or_else(|| AgentCalError::NotFound(format!("series {parent_id}")))?;

    let cancelled: Vec<Event> = store
        .instances_for_parent(parent_id)?
        .into_iter()
        .filter(|instance| {
            instance.status != EventStatus::Cancelled
                && instance.occurrence_key.is_some_and(|key| key >= cutoff)
        })
        .map(|mut instance| {
            instance.status = EventStatus::Cancelled;
            instance.sequence += 1;
            instance.updated_at = now;
            instance
        })
        .collect();

    parent.series_cutoff = Some(match parent.series_cutoff {
        Some(existing) if existing < cutoff => existing,
        _ => cutoff,
    });
    parent.updated_at = now;

    store.apply_series_change(&parent, &cancelled, &[])?;

    Ok(DeleteOutcome {
        scope: DeleteScope::Future,
        cancelled,
        removed: Vec::new(),
    })
}

fn delete_series(store: &EventStore, parent: Event) -> AgentCalResult<DeleteOutcome> {
    let mut removed = store.instances_for_parent(parent.id)?;
    store.delete_event_row(parent.id)?;
    removed.push(parent);
    Ok(DeleteOutcome {
        scope: DeleteScope::All,
        cancelled: Vec::new(),
        removed,
    })
}
