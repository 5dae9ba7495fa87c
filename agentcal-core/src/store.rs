//! SQLite-backed persistence for calendars and events.
//!
//! The store is the only component that touches SQL. Two invariants live
//! here as constraints rather than application logic:
//!
//! - `(parent_id, occurrence_date)` is unique, so concurrent materialization
//!   attempts degrade to insert-or-ignore;
//! - `(calendar_id, external_uid)` is unique among non-cancelled rows, which
//!   is what inbound reconciliation keys on.
//!
//! Series-level mutations (propagation, rule changes, future-cancel) are
//! single transactions: a reader never observes a half-migrated series.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::AgentCalResult;
use crate::event::{Attendee, Event, EventSource, EventStatus};

/// SQLite store for the event model.
pub struct EventStore {
    conn: Mutex<Connection>,
}

const EVENT_COLUMNS: &str = "id, calendar_id, title, description, location, start_at, end_at, \
     all_day, status, recurrence_rule, parent_id, occurrence_date, is_exception, \
     series_cutoff, horizon_days, source, external_uid, sequence, metadata, attendees, \
     created_at, updated_at";

impl EventStore {
    /// Open (and migrate) the store at `path`.
    pub fn open(path: &Path) -> AgentCalResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store. Used by tests.
    pub fn open_in_memory() -> AgentCalResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AgentCalResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = EventStore {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn migrate(&self) -> AgentCalResult<()> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS calendars (
                id              TEXT PRIMARY KEY,
                owner           TEXT NOT NULL,
                name            TEXT NOT NULL,
                timezone        TEXT NOT NULL DEFAULT 'UTC',
                webhook_url     TEXT,
                webhook_secret  TEXT,
                horizon_days    INTEGER NOT NULL DEFAULT 90,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id              TEXT PRIMARY KEY,
                calendar_id     TEXT NOT NULL REFERENCES calendars(id) ON DELETE CASCADE,
                title           TEXT NOT NULL,
                description     TEXT,
                location        TEXT,
                start_at        TEXT NOT NULL,
                end_at          TEXT NOT NULL,
                all_day         INTEGER NOT NULL DEFAULT 0,
                status          TEXT NOT NULL DEFAULT 'confirmed',
                recurrence_rule TEXT,
                parent_id       TEXT REFERENCES events(id) ON DELETE CASCADE,
                occurrence_date TEXT,
                is_exception    INTEGER NOT NULL DEFAULT 0,
                series_cutoff   TEXT,
                horizon_days    INTEGER,
                source          TEXT NOT NULL DEFAULT 'api',
                external_uid    TEXT,
                sequence        INTEGER NOT NULL DEFAULT 0,
                metadata        TEXT NOT NULL DEFAULT '{}',
                attendees       TEXT NOT NULL DEFAULT '[]',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                CHECK (recurrence_rule IS NULL OR parent_id IS NULL)
            );

            -- At most one instance per calendar date per series.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_events_parent_occurrence
                ON events(parent_id, occurrence_date)
                WHERE parent_id IS NOT NULL;

            -- Inbound dedup key: unique among non-cancelled events.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_events_external_uid
                ON events(calendar_id, external_uid)
                WHERE external_uid IS NOT NULL AND status != 'cancelled';

            CREATE INDEX IF NOT EXISTS idx_events_calendar_start
                ON events(calendar_id, start_at);",
        )?;
        Ok(())
    }

    // --- calendars ---

    pub fn insert_calendar(&self, calendar: &Calendar) -> AgentCalResult<()> {
        self.conn().execute(
            "INSERT INTO calendars (id, owner, name, timezone, webhook_url, webhook_secret, horizon_days, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                calendar.id.to_string(),
                calendar.owner,
                calendar.name,
                calendar.timezone,
                calendar.webhook_url,
                calendar.webhook_secret,
                calendar.horizon_days,
                calendar.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_calendar(&self, id: Uuid) -> AgentCalResult<Option<Calendar>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, owner, name, timezone, webhook_url, webhook_secret, horizon_days, created_at
             FROM calendars WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id.to_string()], row_to_calendar)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_calendars(&self, owner: &str) -> AgentCalResult<Vec<Calendar>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, owner, name, timezone, webhook_url, webhook_secret, horizon_days, created_at
             FROM calendars WHERE owner = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![owner], row_to_calendar)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Delete a calendar. Cascades to every event in it.
    pub fn delete_calendar(&self, id: Uuid) -> AgentCalResult<bool> {
        let changed = self.conn().execute(
            "DELETE FROM calendars WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    // --- events ---

    pub fn insert_event(&self, event: &Event) -> AgentCalResult<()> {
        insert_event_on(&self.conn(), event, false)?;
        Ok(())
    }

    /// Insert a materialized instance, treating a `(parent_id, occurrence_date)`
    /// conflict as "already materialized". Returns whether a row was created.
    pub fn insert_instance_if_absent(&self, event: &Event) -> AgentCalResult<bool> {
        Ok(insert_event_on(&self.conn(), event, true)? > 0)
    }

    pub fn get_event(&self, calendar_id: Uuid, id: Uuid) -> AgentCalResult<Option<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1 AND calendar_id = ?2"
        ))?;
        let mut rows = stmt.query_map(
            params![id.to_string(), calendar_id.to_string()],
            row_to_event,
        )?;
        Ok(rows.next().transpose()?)
    }

    pub fn update_event(&self, event: &Event) -> AgentCalResult<()> {
        update_event_on(&self.conn(), event)?;
        Ok(())
    }

    /// Occurrence-facing listing: standalone events and instances, never
    /// series parents, never cancelled rows.
    pub fn list_events(
        &self,
        calendar_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AgentCalResult<Vec<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE calendar_id = ?1
               AND status NOT IN ('series', 'cancelled')
               AND start_at >= ?2 AND start_at <= ?3
             ORDER BY start_at"
        ))?;
        let from = from.map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "0000".into());
        let to = to.map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "9999".into());
        let rows = stmt.query_map(params![calendar_id.to_string(), from, to], row_to_event)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every series parent across all calendars. Driven by the scheduler.
    pub fn list_series_parents(&self) -> AgentCalResult<Vec<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE recurrence_rule IS NOT NULL"
        ))?;
        let rows = stmt.query_map([], row_to_event)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn instances_for_parent(&self, parent_id: Uuid) -> AgentCalResult<Vec<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE parent_id = ?1 ORDER BY occurrence_date"
        ))?;
        let rows = stmt.query_map(params![parent_id.to_string()], row_to_event)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Occurrence keys already present for a parent, regardless of status.
    /// Cancelled instances count: their key must not be re-materialized.
    pub fn occurrence_keys(&self, parent_id: Uuid) -> AgentCalResult<HashSet<NaiveDate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT occurrence_date FROM events
             WHERE parent_id = ?1 AND occurrence_date IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![parent_id.to_string()], |row| {
            let raw: String = row.get(0)?;
            parse_date(&raw, 0)
        })?;
        rows.collect::<Result<HashSet<_>, _>>().map_err(Into::into)
    }

    /// Non-cancelled event carrying an inbound unique identifier.
    pub fn find_by_external_uid(
        &self,
        calendar_id: Uuid,
        uid: &str,
    ) -> AgentCalResult<Option<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE calendar_id = ?1 AND external_uid = ?2 AND status != 'cancelled'"
        ))?;
        let mut rows = stmt.query_map(params![calendar_id.to_string(), uid], row_to_event)?;
        Ok(rows.next().transpose()?)
    }

    /// Hard-delete a row. Deleting a parent cascades to all its instances.
    pub fn delete_event_row(&self, id: Uuid) -> AgentCalResult<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM events WHERE id = ?1", params![id.to_string()])?;
        Ok(changed > 0)
    }

    // --- transactional series mutations ---

    /// Apply a series-level mutation in one transaction: the updated parent
    /// row, sibling updates (propagation or rule-change cancellations), and
    /// inserts for occurrence keys a new rule introduced.
    pub fn apply_series_change(
        &self,
        parent: &Event,
        updates: &[Event],
        inserts: &[Event],
    ) -> AgentCalResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        update_event_on(&tx, parent)?;
        for event in updates {
            update_event_on(&tx, event)?;
        }
        for event in inserts {
            insert_event_on(&tx, event, true)?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn insert_event_on(conn: &Connection, event: &Event, or_ignore: bool) -> rusqlite::Result<usize> {
    let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
    conn.execute(
        &format!(
            "{verb} INTO events ({EVENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
        ),
        params![
            event.id.to_string(),
            event.calendar_id.to_string(),
            event.title,
            event.description,
            event.location,
            event.start.to_rfc3339(),
            event.end.to_rfc3339(),
            event.all_day,
            event.status.as_str(),
            event.recurrence_rule,
            event.parent_id.map(|id| id.to_string()),
            event.occurrence_key.map(|d| d.to_string()),
            event.is_exception,
            event.series_cutoff.map(|d| d.to_string()),
            event.horizon_days,
            event.source.as_str(),
            event.external_uid,
            event.sequence,
            serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".into()),
            serde_json::to_string(&event.attendees).unwrap_or_else(|_| "[]".into()),
            event.created_at.to_rfc3339(),
            event.updated_at.to_rfc3339(),
        ],
    )
}

fn update_event_on(conn: &Connection, event: &Event) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE events SET
            title = ?2, description = ?3, location = ?4, start_at = ?5, end_at = ?6,
            all_day = ?7, status = ?8, recurrence_rule = ?9, is_exception = ?10,
            series_cutoff = ?11, horizon_days = ?12, source = ?13, external_uid = ?14,
            sequence = ?15, metadata = ?16, attendees = ?17, updated_at = ?18
         WHERE id = ?1",
        params![
            event.id.to_string(),
            event.title,
            event.description,
            event.location,
            event.start.to_rfc3339(),
            event.end.to_rfc3339(),
            event.all_day,
            event.status.as_str(),
            event.recurrence_rule,
            event.is_exception,
            event.series_cutoff.map(|d| d.to_string()),
            event.horizon_days,
            event.source.as_str(),
            event.external_uid,
            event.sequence,
            serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".into()),
            serde_json::to_string(&event.attendees).unwrap_or_else(|_| "[]".into()),
            event.updated_at.to_rfc3339(),
        ],
    )
}

fn conversion_err(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_uuid(raw: &str, idx: usize) -> rusqlite::Result<Uuid> {
    raw.parse().map_err(|e| conversion_err(idx, e))
}

fn parse_datetime(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_date(raw: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    raw.parse().map_err(|e| conversion_err(idx, e))
}

fn row_to_calendar(row: &Row<'_>) -> rusqlite::Result<Calendar> {
    Ok(Calendar {
        id: parse_uuid(&row.get::<_, String>(0)?, 0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        timezone: row.get(3)?,
        webhook_url: row.get(4)?,
        webhook_secret: row.get(5)?,
        horizon_days: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?, 7)?,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let status_raw: String = row.get(8)?;
    let source_raw: String = row.get(15)?;
    let metadata_raw: String = row.get(18)?;
    let attendees_raw: String = row.get(19)?;

    Ok(Event {
        id: parse_uuid(&row.get::<_, String>(0)?, 0)?,
        calendar_id: parse_uuid(&row.get::<_, String>(1)?, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        start: parse_datetime(&row.get::<_, String>(5)?, 5)?,
        end: parse_datetime(&row.get::<_, String>(6)?, 6)?,
        all_day: row.get(7)?,
        status: EventStatus::parse(&status_raw)
            .ok_or_else(|| conversion_err(8, StoreFieldError(format!("status '{status_raw}'"))))?,
        recurrence_rule: row.get(9)?,
        parent_id: row
            .get::<_, Option<String>>(10)?
            .map(|raw| parse_uuid(&raw, 10))
            .transpose()?,
        occurrence_key: row
            .get::<_, Option<String>>(11)?
            .map(|raw| parse_date(&raw, 11))
            .transpose()?,
        is_exception: row.get(12)?,
        series_cutoff: row
            .get::<_, Option<String>>(13)?
            .map(|raw| parse_date(&raw, 13))
            .transpose()?,
        horizon_days: row.get(14)?,
        source: EventSource::parse(&source_raw)
            .ok_or_else(|| conversion_err(15, StoreFieldError(format!("source '{source_raw}'"))))?,
        external_uid: row.get(16)?,
        sequence: row.get(17)?,
        metadata: serde_json::from_str(&metadata_raw).map_err(|e| conversion_err(18, e))?,
        attendees: serde_json::from_str::<Vec<Attendee>>(&attendees_raw)
            .map_err(|e| conversion_err(19, e))?,
        created_at: parse_datetime(&row.get::<_, String>(20)?, 20)?,
        updated_at: parse_datetime(&row.get::<_, String>(21)?, 21)?,
    })
}

#[derive(Debug)]
struct StoreFieldError(String);

impl std::fmt::Display for StoreFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unrecognized {}", self.0)
    }
}

impl std::error::Error for StoreFieldError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{instance_of, sample_calendar, standalone_event};

    #[test]
    fn calendar_round_trip() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();

        let loaded = store.get_calendar(calendar.id).unwrap().unwrap();
        assert_eq!(loaded.name, calendar.name);
        assert_eq!(loaded.horizon_days, calendar.horizon_days);
        assert_eq!(store.list_calendars(&calendar.owner).unwrap().len(), 1);
    }

    #[test]
    fn event_round_trip() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();

        let event = standalone_event(&calendar, "Sync");
        store.insert_event(&event).unwrap();

        let loaded = store.get_event(calendar.id, event.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Sync");
        assert_eq!(loaded.status, EventStatus::Confirmed);
        assert_eq!(loaded.kind(), crate::event::EventKind::Standalone);
    }

    #[test]
    fn duplicate_occurrence_key_is_ignored() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();

        let mut parent = standalone_event(&calendar, "Daily");
        parent.recurrence_rule = Some("FREQ=DAILY".to_string());
        parent.status = EventStatus::Series;
        store.insert_event(&parent).unwrap();

        let key = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let first = instance_of(&parent, key);
        let second = instance_of(&parent, key);

        assert!(store.insert_instance_if_absent(&first).unwrap());
        assert!(!store.insert_instance_if_absent(&second).unwrap());
        assert_eq!(store.instances_for_parent(parent.id).unwrap().len(), 1);
    }

    #[test]
    fn deleting_parent_cascades_to_instances() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();

        let mut parent = standalone_event(&calendar, "Daily");
        parent.recurrence_rule = Some("FREQ=DAILY".to_string());
        parent.status = EventStatus::Series;
        store.insert_event(&parent).unwrap();

        for day in 1..=3 {
            let key = NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
            store
                .insert_instance_if_absent(&instance_of(&parent, key))
                .unwrap();
        }

        assert!(store.delete_event_row(parent.id).unwrap());
        assert!(store.instances_for_parent(parent.id).unwrap().is_empty());
    }

    #[test]
    fn listings_exclude_parents_and_cancelled() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();

        let mut parent = standalone_event(&calendar, "Daily");
        parent.recurrence_rule = Some("FREQ=DAILY".to_string());
        parent.status = EventStatus::Series;
        store.insert_event(&parent).unwrap();

        let key = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let visible = instance_of(&parent, key);
        store.insert_instance_if_absent(&visible).unwrap();

        let mut cancelled = standalone_event(&calendar, "Gone");
        cancelled.status = EventStatus::Cancelled;
        store.insert_event(&cancelled).unwrap();

        let listed = store.list_events(calendar.id, None, None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, visible.id);
    }

    #[test]
    fn external_uid_lookup_skips_cancelled() {
        let store = EventStore::open_in_memory().unwrap();
        let calendar = sample_calendar();
        store.insert_calendar(&calendar).unwrap();

        let mut event = standalone_event(&calendar, "Invite");
        event.external_uid = Some("uid-1".to_string());
        store.insert_event(&event).unwrap();

        assert!(store
            .find_by_external_uid(calendar.id, "uid-1")
            .unwrap()
            .is_some());

        event.status = EventStatus::Cancelled;
        store.update_event(&event).unwrap();
        assert!(store
            .find_by_external_uid(calendar.id, "uid-1")
            .unwrap()
            .is_none());
    }
}
