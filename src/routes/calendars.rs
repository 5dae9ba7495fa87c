//! Calendar and event endpoints

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentcal_core::{
    Calendar, DeleteScope, Event, EventPatch, NewCalendar, NewEvent,
};

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/calendars", post(create_calendar).get(list_calendars))
        .route(
            "/calendars/{id}",
            get(get_calendar).delete(delete_calendar),
        )
        .route(
            "/calendars/{id}/events",
            post(create_event).get(list_events),
        )
        .route(
            "/calendars/{id}/events/{event_id}",
            get(get_event).patch(patch_event).delete(delete_event),
        )
        .route(
            "/calendars/{id}/events/{event_id}/respond",
            post(respond),
        )
}

/// POST /calendars - Create a calendar
async fn create_calendar(
    State(state): State<AppState>,
    Json(req): Json<NewCalendar>,
) -> Result<Json<Calendar>, AppError> {
    Ok(Json(state.service().create_calendar(req)?))
}

#[derive(Deserialize)]
struct OwnerQuery {
    owner: String,
}

/// GET /calendars?owner= - List calendars for an owner
async fn list_calendars(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Calendar>>, AppError> {
    Ok(Json(state.service().list_calendars(&query.owner)?))
}

/// GET /calendars/:id
async fn get_calendar(
    State(state): State<AppState>,
    Path(calendar_id): Path<Uuid>,
) -> Result<Json<Calendar>, AppError> {
    Ok(Json(state.service().get_calendar(calendar_id)?))
}

/// DELETE /calendars/:id - Delete a calendar and every event in it
async fn delete_calendar(
    State(state): State<AppState>,
    Path(calendar_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.service().delete_calendar(calendar_id)?;
    Ok(Json(serde_json::json!({ "deleted": calendar_id })))
}

/// Response for event creation. `materialized` is the initial instance
/// count when the request carried a recurrence rule.
#[derive(Serialize)]
struct CreateEventResponse {
    event: Event,
    materialized: usize,
}

/// POST /calendars/:id/events - Create an event or a recurring series
async fn create_event(
    State(state): State<AppState>,
    Path(calendar_id): Path<Uuid>,
    Json(req): Json<NewEvent>,
) -> Result<Json<CreateEventResponse>, AppError> {
    let created = state.service().create_event(calendar_id, req)?;
    Ok(Json(CreateEventResponse {
        event: created.event,
        materialized: created.materialized,
    }))
}

#[derive(Deserialize)]
struct ListEventsQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

/// GET /calendars/:id/events - List occurrences (instances + standalone)
async fn list_events(
    State(state): State<AppState>,
    Path(calendar_id): Path<Uuid>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(state.service().list_events(
        calendar_id,
        query.from,
        query.to,
    )?))
}

/// GET /calendars/:id/events/:event_id
async fn get_event(
    State(state): State<AppState>,
    Path((calendar_id, event_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.service().get_event(calendar_id, event_id)?))
}

/// PATCH /calendars/:id/events/:event_id - Partial update
async fn patch_event(
    State(state): State<AppState>,
    Path((calendar_id, event_id)): Path<(Uuid, Uuid)>,
    Json(patch): Json<EventPatch>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.service().patch_event(
        calendar_id,
        event_id,
        &patch,
    )?))
}

#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    scope: DeleteScope,
}

#[derive(Serialize)]
struct DeleteResponse {
    scope: &'static str,
    affected: usize,
}

/// DELETE /calendars/:id/events/:event_id?scope=single|future|all
async fn delete_event(
    State(state): State<AppState>,
    Path((calendar_id, event_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeleteResponse>, AppError> {
    let outcome = state
        .service()
        .delete_event(calendar_id, event_id, query.scope)?;
    Ok(Json(DeleteResponse {
        scope: outcome.scope.as_str(),
        affected: outcome.affected(),
    }))
}

#[derive(Deserialize)]
struct RespondRequest {
    email: String,
    response_status: String,
}

/// POST /calendars/:id/events/:event_id/respond - RSVP
async fn respond(
    State(state): State<AppState>,
    Path((calendar_id, event_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.service().respond(
        calendar_id,
        event_id,
        &req.email,
        &req.response_status,
    )?))
}
