pub mod calendars;
pub mod inbound;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use agentcal_core::AgentCalError;

/// Standard API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Convert core errors to HTTP responses, distinguishing "your input was
/// invalid" from "something failed on our side".
pub struct AppError(AgentCalError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AgentCalError::InvalidRecurrenceRule { .. } | AgentCalError::InvalidTimezone(_) => {
                StatusCode::BAD_REQUEST
            }
            AgentCalError::NotFound(_) => StatusCode::NOT_FOUND,
            // Transient infrastructure failure: retryable.
            AgentCalError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AgentCalError> for AppError {
    fn from(err: AgentCalError) -> Self {
        AppError(err)
    }
}
