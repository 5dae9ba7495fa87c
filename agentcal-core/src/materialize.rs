//! Materialization: turning a series parent's rule into instance rows.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::error::AgentCalResult;
use crate::event::{Event, EventStatus};
use crate::recurrence::{occurrences, Occurrence, RecurrenceRule};
use crate::store::EventStore;

/// Materialize `parent` up to `horizon_end`: compute the occurrence set,
/// reconcile against existing instances, insert only what is missing.
///
/// Idempotent: repeated or concurrent calls for the same parent and horizon
/// never create duplicates (unique `(parent_id, occurrence_date)` key, with
/// conflicting inserts treated as already materialized). Cancelled instances
/// keep their key occupied, so a single-scope deletion is not undone by the
/// next pass. Returns the newly created instances.
pub fn materialize(
    store: &EventStore,
    parent: &Event,
    tz: Tz,
    horizon_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AgentCalResult<Vec<Event>> {
    let rule_str = match &parent.recurrence_rule {
        Some(rule) => rule,
        None => return Ok(Vec::new()),
    };
    let rule: RecurrenceRule = rule_str.parse()?;

    let existing = store.occurrence_keys(parent.id)?;
    let mut created = Vec::new();

    for occ in occurrences(&rule, parent.start, parent.end, tz, horizon_end) {
        if let Some(cutoff) = parent.series_cutoff {
            if occ.key >= cutoff {
                continue;
            }
        }
        if existing.contains(&occ.key) {
            continue;
        }
        let instance = instance_from_occurrence(parent, &occ, now);
        if store.insert_instance_if_absent(&instance)? {
            created.push(instance);
        }
    }

    Ok(created)
}

/// Build an instance row from a generated occurrence. All non-temporal
/// fields are inherited from the parent at materialization time.
pub(crate) fn instance_from_occurrence(
    parent: &Event,
    occ: &Occurrence,
    now: DateTime<Utc>,
) -> Event {
    Event {
        id: Uuid::new_v4(),
        calendar_id: parent.calendar_id,
        title: parent.title.clone(),
        description: parent.description.clone(),
        location: parent.location.clone(),
        start: occ.start,
        end: occ.end,
        all_day: parent.all_day,
        status: EventStatus::Confirmed,
        recurrence_rule: None,
        parent_id: Some(parent.id),
        occurrence_key: Some(occ.key),
        is_exception: false,
        series_cutoff: None,
        horizon_days: None,
        source: parent.source,
        external_uid: None,
        sequence: 0,
        metadata: parent.metadata.clone(),
        attendees: parent.attendees.clone(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_calendar, series_parent};
    use chrono::{NaiveDate, TimeZone};

    fn horizon(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn daily_count_five_materializes_five_instances() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();
        let parent = series_parent(&calendar, "FREQ=DAILY;COUNT=5");
        store.insert_event(&parent).unwrap();

        let now = parent.start;
        let created =
            materialize(&store, &parent, chrono_tz::UTC, horizon(2025, 6, 1), now).unwrap();
        assert_eq!(created.len(), 5);

        let instances = store.instances_for_parent(parent.id).unwrap();
        assert_eq!(instances.len(), 5);
        for (i, instance) in instances.iter().enumerate() {
            let expected = NaiveDate::from_ymd_opt(2025, 3, 1 + i as u32).unwrap();
            assert_eq!(instance.occurrence_key, Some(expected));
            assert_eq!(instance.status, EventStatus::Confirmed);
            assert!(!instance.is_exception);
            assert_eq!(instance.title, parent.title);
        }
    }

    #[test]
    fn materializing_twice_is_idempotent() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();
        let parent = series_parent(&calendar, "FREQ=DAILY;COUNT=5");
        store.insert_event(&parent).unwrap();

        let now = parent.start;
        let first =
            materialize(&store, &parent, chrono_tz::UTC, horizon(2025, 6, 1), now).unwrap();
        let second =
            materialize(&store, &parent, chrono_tz::UTC, horizon(2025, 6, 1), now).unwrap();
        assert_eq!(first.len(), 5);
        assert!(second.is_empty());
        assert_eq!(store.instances_for_parent(parent.id).unwrap().len(), 5);
    }

    #[test]
    fn extending_horizon_adds_only_the_new_tail() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();
        let parent = series_parent(&calendar, "FREQ=DAILY");
        store.insert_event(&parent).unwrap();

        let now = parent.start;
        let first =
            materialize(&store, &parent, chrono_tz::UTC, horizon(2025, 3, 5), now).unwrap();
        let second =
            materialize(&store, &parent, chrono_tz::UTC, horizon(2025, 3, 10), now).unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 5);
    }

    #[test]
    fn cutoff_blocks_occurrences_at_or_after_date() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();
        let mut parent = series_parent(&calendar, "FREQ=DAILY");
        parent.series_cutoff = NaiveDate::from_ymd_opt(2025, 3, 4);
        store.insert_event(&parent).unwrap();

        let created = materialize(
            &store,
            &parent,
            chrono_tz::UTC,
            horizon(2025, 3, 10),
            parent.start,
        )
        .unwrap();
        assert_eq!(created.len(), 3);
        assert!(created
            .iter()
            .all(|i| i.occurrence_key.unwrap() < NaiveDate::from_ymd_opt(2025, 3, 4).unwrap()));
    }

    #[test]
    fn cancelled_instance_is_not_recreated() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();
        let parent = series_parent(&calendar, "FREQ=DAILY;COUNT=3");
        store.insert_event(&parent).unwrap();

        let now = parent.start;
        materialize(&store, &parent, chrono_tz::UTC, horizon(2025, 6, 1), now).unwrap();

        let mut instances = store.instances_for_parent(parent.id).unwrap();
        instances[1].status = EventStatus::Cancelled;
        store.update_event(&instances[1]).unwrap();

        let created =
            materialize(&store, &parent, chrono_tz::UTC, horizon(2025, 6, 1), now).unwrap();
        assert!(created.is_empty());
    }

    #[test]
    fn invalid_rule_fails_before_any_insert() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();
        let parent = series_parent(&calendar, "FREQ=HOURLY");
        store.insert_event(&parent).unwrap();

        let result = materialize(
            &store,
            &parent,
            chrono_tz::UTC,
            horizon(2025, 6, 1),
            parent.start,
        );
        assert!(result.is_err());
        assert!(store.instances_for_parent(parent.id).unwrap().is_empty());
    }
}
