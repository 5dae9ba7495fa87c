//! Exception and mutation propagation for recurring series.
//!
//! Per-instance state machine: `Planned -> Exception` (one-way, on any
//! direct edit), `Planned | Exception -> Cancelled` (terminal, via the
//! deletion orchestrator). A parent edit cascades to planned siblings only;
//! an exception's divergence is intentional and survives parent edits.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::{AgentCalError, AgentCalResult};
use crate::event::{Event, EventKind, EventPatch, EventStatus};
use crate::materialize::instance_from_occurrence;
use crate::recurrence::{occurrences, RecurrenceRule};
use crate::store::EventStore;

/// Everything a patch touched, for the caller to notify on.
#[derive(Debug, Default)]
pub struct PatchOutcome {
    /// The directly patched row.
    pub event: Option<Event>,
    /// Planned siblings that received cascaded fields.
    pub propagated: Vec<Event>,
    /// Instances introduced by a rule change.
    pub created: Vec<Event>,
    /// Planned instances cancelled because the new rule dropped their key.
    pub cancelled: Vec<Event>,
}

/// Apply a partial update to an event, cascading series effects.
///
/// `horizon_end` bounds rematerialization after a rule change; it is the
/// same horizon the scheduler maintains for this parent.
pub fn apply_patch(
    store: &EventStore,
    calendar: &Calendar,
    event_id: Uuid,
    patch: &EventPatch,
    tz: Tz,
    horizon_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AgentCalResult<PatchOutcome> {
    let event = store
        .get_event(calendar.id, event_id)?
        .ok_or_else(|| AgentCalError::NotFound(format!("event {event_id}")))?;

    match event.kind() {
        EventKind::SeriesDefinition { .. } => {
            patch_parent(store, event, patch, tz, horizon_end, now)
        }
        EventKind::SeriesInstance { .. } => patch_instance(store, event, patch, now),
        EventKind::Standalone => {
            patch_standalone(store, calendar, event, patch, tz, horizon_end, now)
        }
    }
}

/// Direct edit to an instance: that row only, and it becomes an exception.
fn patch_instance(
    store: &EventStore,
    mut event: Event,
    patch: &EventPatch,
    now: DateTime<Utc>,
) -> AgentCalResult<PatchOutcome> {
    patch.apply_to(&mut event);
    if event.status == EventStatus::Series {
        // The sentinel is not a settable status.
        event.status = EventStatus::Confirmed;
    }
    event.is_exception = true;
    event.sequence += 1;
    event.updated_at = now;
    store.update_event(&event)?;
    Ok(PatchOutcome {
        event: Some(event),
        ..PatchOutcome::default()
    })
}

fn patch_standalone(
    store: &EventStore,
    calendar: &Calendar,
    mut event: Event,
    patch: &EventPatch,
    tz: Tz,
    horizon_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AgentCalResult<PatchOutcome> {
    patch.apply_to(&mut event);
    if event.status == EventStatus::Series {
        event.status = EventStatus::Confirmed;
    }
    event.sequence += 1;
    event.updated_at = now;

    // Supplying a recurrence rule converts the event into a series
    // definition; its occurrences get materialized immediately and the
    // calendar's window is fixed on it, as at ordinary series creation.
    if let Some(rule_str) = &patch.recurrence {
        let rule: RecurrenceRule = rule_str.parse()?;
        event.recurrence_rule = Some(rule.to_string());
        event.status = EventStatus::Series;
        event.horizon_days = Some(calendar.horizon_days);
        let inserts: Vec<Event> = occurrences(&rule, event.start, event.end, tz, horizon_end)
            .map(|occ| instance_from_occurrence(&event, &occ, now))
            .collect();
        store.apply_series_change(&event, &[], &inserts)?;
        return Ok(PatchOutcome {
            event: Some(event),
            created: inserts,
            ..PatchOutcome::default()
        });
    }

    store.update_event(&event)?;
    Ok(PatchOutcome {
        event: Some(event),
        ..PatchOutcome::default()
    })
}

/// Parent edit: cascade non-recurrence fields to planned siblings; a rule
/// change additionally rematerializes the occurrence set. All row changes
/// land in one transaction.
fn patch_parent(
    store: &EventStore,
    mut parent: Event,
    patch: &EventPatch,
    tz: Tz,
    horizon_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AgentCalResult<PatchOutcome> {
    // Validate a rule change before mutating anything.
    let new_rule: Option<RecurrenceRule> = match &patch.recurrence {
        Some(rule_str) => Some(rule_str.parse()?),
        None => None,
    };

    patch.apply_to(&mut parent);
    parent.status = EventStatus::Series;
    if let Some(rule) = &new_rule {
        parent.recurrence_rule = Some(rule.to_string());
    }
    parent.sequence += 1;
    parent.updated_at = now;

    let siblings = store.instances_for_parent(parent.id)?;
    let cascade = patch.propagated();

    let mut propagated = Vec::new();
    let mut cancelled = Vec::new();
    let mut created = Vec::new();

    // Keys the new rule still produces, for deciding which planned
    // instances survive the change.
    let new_keys: Option<HashSet<_>> = new_rule.as_ref().map(|rule| {
        occurrences(rule, parent.start, parent.end, tz, horizon_end)
            .filter(|occ| match parent.series_cutoff {
                Some(cutoff) => occ.key < cutoff,
                None => true,
            })
            .map(|occ| occ.key)
            .collect()
    });

    for sibling in &siblings {
        if !sibling.is_planned() {
            continue;
        }
        let mut updated = sibling.clone();
        let mut touched = false;

        if !cascade.is_empty() {
            cascade.apply_to(&mut updated);
            touched = true;
        }

        let dropped = match (&new_keys, sibling.occurrence_key) {
            (Some(keys), Some(key)) => !keys.contains(&key),
            _ => false,
        };
        if dropped {
            updated.status = EventStatus::Cancelled;
            touched = true;
        }

        if touched {
            updated.sequence += 1;
            updated.updated_at = now;
            if dropped {
                cancelled.push(updated);
            } else {
                propagated.push(updated);
            }
        }
    }

    if let (Some(rule), Some(keys)) = (&new_rule, &new_keys) {
        let existing: HashSet<_> = siblings
            .iter()
            .filter_map(|sibling| sibling.occurrence_key)
            .collect();
        for occ in occurrences(rule, parent.start, parent.end, tz, horizon_end) {
            if !keys.contains(&occ.key) || existing.contains(&occ.key) {
                continue;
            }
            created.push(instance_from_occurrence(&parent, &occ, now));
        }
    }

    let updates: Vec<Event> = propagated.iter().chain(cancelled.iter()).cloned().collect();
    store.apply_series_change(&parent, &updates, &created)?;

    tracing::debug!(
        parent = %parent.id,
        propagated = propagated.len(),
        cancelled = cancelled.len(),
        created = created.len(),
        "applied series patch"
    );

    Ok(PatchOutcome {
        event: Some(parent),
        propagated,
        created,
        cancelled,
    })
}
