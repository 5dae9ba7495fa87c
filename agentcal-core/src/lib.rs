//! Core engine for the agentcal ecosystem.
//!
//! This crate holds everything except the transport layer:
//! - the event model (`event`, `calendar`) and its SQLite store (`store`)
//! - recurrence expansion and materialization (`recurrence`, `materialize`)
//! - series mutation semantics (`propagate`, `deletion`)
//! - the horizon scheduler (`scheduler`), webhook notifier (`notify`) and
//!   inbound reconciler (`inbound`)
//! - the `CalendarService` facade the HTTP server drives (`service`)

pub mod calendar;
pub mod clock;
pub mod deletion;
pub mod error;
pub mod event;
pub mod inbound;
pub mod materialize;
pub mod notify;
pub mod propagate;
pub mod recurrence;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use calendar::Calendar;
pub use clock::{Clock, FixedClock, SystemClock};
pub use deletion::{DeleteOutcome, DeleteScope};
pub use error::{AgentCalError, AgentCalResult};
pub use event::{Attendee, Event, EventKind, EventPatch, EventSource, EventStatus};
pub use inbound::{InboundMessage, InboundMethod, InboundOutcome};
pub use notify::{ChangeKind, Notifier};
pub use recurrence::RecurrenceRule;
pub use scheduler::HorizonScheduler;
pub use service::{CalendarService, CreatedEvent, NewCalendar, NewEvent};
pub use store::EventStore;
