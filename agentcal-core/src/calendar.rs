//! Calendar entity.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentCalError, AgentCalResult};

pub const DEFAULT_HORIZON_DAYS: i64 = 90;

/// A calendar owned by one agent. Owns its events: deleting a calendar
/// cascades to every event in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub id: Uuid,
    /// Resolved by the auth layer upstream; trusted as-is here.
    pub owner: String,
    pub name: String,
    /// IANA timezone name, e.g. "Europe/Stockholm".
    pub timezone: String,
    /// Where change notifications get POSTed (None disables notifications).
    pub webhook_url: Option<String>,
    /// Shared secret for signing notification payloads.
    pub webhook_secret: Option<String>,
    /// Forward materialization window for series created in this calendar.
    pub horizon_days: i64,
    pub created_at: DateTime<Utc>,
}

impl Calendar {
    pub fn new(owner: &str, name: &str) -> Self {
        Calendar {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            name: name.to_string(),
            timezone: "UTC".to_string(),
            webhook_url: None,
            webhook_secret: None,
            horizon_days: DEFAULT_HORIZON_DAYS,
            created_at: Utc::now(),
        }
    }

    /// Parse the calendar's timezone.
    pub fn tz(&self) -> AgentCalResult<Tz> {
        self.timezone
            .parse()
            .map_err(|_| AgentCalError::InvalidTimezone(self.timezone.clone()))
    }
}
