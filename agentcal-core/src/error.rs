//! Error types for the agentcal ecosystem.

use thiserror::Error;

/// Errors that can occur in agentcal operations.
#[derive(Error, Debug)]
pub enum AgentCalError {
    #[error("invalid recurrence rule at '{token}': {reason}")]
    InvalidRecurrenceRule { token: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl AgentCalError {
    pub fn invalid_rule(token: impl Into<String>, reason: impl Into<String>) -> Self {
        AgentCalError::InvalidRecurrenceRule {
            token: token.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for agentcal operations.
pub type AgentCalResult<T> = Result<T, AgentCalError>;
