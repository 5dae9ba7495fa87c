//! Inbound message endpoint
//!
//! Parsed scheduling messages (invitations, replies, cancellations) from
//! mail pipelines land here. The endpoint always answers 200: a message
//! the store cannot act on is reported as ignored rather than rejected,
//! so upstream pipelines never retry-loop on content they cannot fix.

use axum::{extract::State, routing::post, Json, Router};

use agentcal_core::{InboundMessage, InboundOutcome};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/inbound", post(receive))
}

/// POST /inbound - Reconcile one parsed scheduling message
async fn receive(
    State(state): State<AppState>,
    Json(msg): Json<InboundMessage>,
) -> Json<InboundOutcome> {
    match state.service().inbound(&msg) {
        Ok(outcome) => Json(outcome),
        Err(err) => {
            tracing::warn!(calendar = %msg.calendar_id, error = %err, "inbound message failed");
            Json(InboundOutcome::Ignored {
                reason: err.to_string(),
            })
        }
    }
}
