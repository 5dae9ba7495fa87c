//! The horizon scheduler: the one autonomous actor in the system.
//!
//! A single periodic task that keeps every series' rolling forward window
//! of instances populated. Failures for one series are logged and never
//! abort the pass; the task itself never terminates on error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::task::JoinHandle;

use crate::calendar::DEFAULT_HORIZON_DAYS;
use crate::clock::Clock;
use crate::materialize::materialize;
use crate::notify::{ChangeKind, Notifier};
use crate::store::EventStore;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct HorizonScheduler {
    store: Arc<EventStore>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl HorizonScheduler {
    pub fn new(
        store: Arc<EventStore>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        HorizonScheduler {
            store,
            notifier,
            clock,
            interval,
            handle: None,
        }
    }

    /// Spawn the periodic task: one pass eagerly now, then one per interval,
    /// indefinitely.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        let clock = Arc::clone(&self.clock);
        let interval = self.interval;

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                // First tick completes immediately: the eager startup pass.
                ticker.tick().await;
                run_pass(&store, &notifier, clock.as_ref());
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// One materialization pass over every series parent. Exposed for tests
    /// and for running a pass synchronously at startup.
    pub fn run_once(&self) {
        run_pass(&self.store, &self.notifier, self.clock.as_ref());
    }
}

impl Drop for HorizonScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pass(store: &EventStore, notifier: &Notifier, clock: &dyn Clock) {
    let parents = match store.list_series_parents() {
        Ok(parents) => parents,
        Err(err) => {
            tracing::warn!(%err, "horizon pass could not list series, retrying next tick");
            return;
        }
    };
    let now = clock.now();

    for parent in parents {
        let calendar = match store.get_calendar(parent.calendar_id) {
            Ok(Some(calendar)) => calendar,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(parent = %parent.id, %err, "skipping series: calendar lookup failed");
                continue;
            }
        };
        let tz = match calendar.tz() {
            Ok(tz) => tz,
            Err(err) => {
                tracing::warn!(parent = %parent.id, %err, "skipping series: bad timezone");
                continue;
            }
        };
        let window = parent.horizon_days.unwrap_or(DEFAULT_HORIZON_DAYS);
        let horizon_end = now + ChronoDuration::days(window);

        match materialize(store, &parent, tz, horizon_end, now) {
            Ok(created) => {
                if !created.is_empty() {
                    tracing::info!(parent = %parent.id, count = created.len(), "extended series horizon");
                }
                for instance in &created {
                    notifier.notify(&calendar, ChangeKind::Created, instance, now);
                }
            }
            Err(err) => {
                tracing::warn!(parent = %parent.id, %err, "materialization failed, retrying next tick");
            }
        }
    }
}
