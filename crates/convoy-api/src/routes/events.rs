use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use convoy_core::auth::AuthenticatedUser;
use convoy_core::error::Error;
use convoy_core::types::{Event, PaginationData};

use crate::error::{ApiError, ApiResult, ServerResponse};
use crate::middleware::auth::require_group_access;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(create_event).get(get_events))
        .route("/events/{eventID}", get(get_event))
        .with_state(state)
}

#[derive(Debug, Deserialize, Validate)]
struct CreateEventRequest {
    #[validate(length(min = 1, message = "please provide an app id"))]
    app_id: String,
    #[validate(length(min = 1, message = "please provide an event type"))]
    event_type: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "groupID")]
    group_id: String,
    #[serde(rename = "appId")]
    app_id: Option<String>,
    #[serde(rename = "startDate")]
    start_date: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
    page: Option<u64>,
    per_page: Option<u64>,
    sort: Option<i32>,
}

#[derive(Debug, Serialize)]
struct PagedEvents {
    content: Vec<Event>,
    pagination: PaginationData,
}

async fn create_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateEventRequest>,
) -> ApiResult<(StatusCode, Json<ServerResponse<Event>>)> {
    payload.validate().map_err(ApiError::from)?;

    let app = state
        .repos
        .applications
        .find_application_by_id(&payload.app_id)
        .await?;
    let group = state.groups.find_group_by_id(&app.group_id).await?;
    require_group_access(&user, &group.uid)?;

    let event = state
        .ingest
        .create_event(&group, &app, &payload.event_type, payload.data)
        .await?;
    Ok((
        StatusCode::CREATED,
        ServerResponse::ok("App event created successfully", event),
    ))
}

fn parse_date(value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| ApiError(Error::Invalid("please specify a valid date".to_string()))),
    }
}

async fn get_events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<ServerResponse<PagedEvents>>> {
    require_group_access(&user, &query.group_id)?;

    let range = match (
        parse_date(query.start_date.as_deref())?,
        parse_date(query.end_date.as_deref())?,
    ) {
        (Some(start), Some(end)) => Some((start, end)),
        (Some(start), None) => Some((start, Utc::now())),
        (None, _) => None,
    };

    let pageable = super::pageable(query.page, query.per_page, query.sort);
    let (content, pagination) = state
        .repos
        .events
        .load_events_paged(&query.group_id, query.app_id.as_deref(), range, pageable)
        .await?;
    Ok(ServerResponse::ok(
        "App events fetched successfully",
        PagedEvents {
            content,
            pagination,
        },
    ))
}

async fn get_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<ServerResponse<Event>>> {
    let event = state.repos.events.find_event_by_id(&event_id).await?;
    require_group_access(&user, &event.group_id)?;
    Ok(ServerResponse::ok("App event fetched successfully", event))
}
