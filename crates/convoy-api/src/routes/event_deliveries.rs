use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use convoy_core::auth::AuthenticatedUser;
use convoy_core::repository::EventDeliveryFilter;
use convoy_core::types::{EventDelivery, EventDeliveryStatus, PaginationData};

use crate::error::{ApiResult, ServerResponse};
use crate::middleware::auth::require_group_access;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/eventdeliveries", get(get_event_deliveries))
        .route("/eventdeliveries/{id}", get(get_event_delivery))
        .route("/eventdeliveries/{id}/resend", put(resend_event_delivery))
        .route("/eventdeliveries/batchretry", post(batch_retry))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DeliveriesQuery {
    #[serde(rename = "groupID")]
    group_id: String,
    #[serde(rename = "appId")]
    app_id: Option<String>,
    #[serde(rename = "eventId")]
    event_id: Option<String>,
    status: Option<String>,
    page: Option<u64>,
    per_page: Option<u64>,
    sort: Option<i32>,
}

#[derive(Debug, Serialize)]
struct PagedDeliveries {
    content: Vec<EventDelivery>,
    pagination: PaginationData,
}

#[derive(Debug, Deserialize)]
struct BatchRetryRequest {
    ids: Vec<String>,
}

fn parse_statuses(raw: Option<&str>) -> Option<Vec<EventDeliveryStatus>> {
    let raw = raw?;
    let statuses: Vec<EventDeliveryStatus> = raw
        .split(',')
        .filter_map(|s| serde_json::from_value(serde_json::Value::String(s.trim().to_string())).ok())
        .collect();
    if statuses.is_empty() {
        None
    } else {
        Some(statuses)
    }
}

async fn get_event_deliveries(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<DeliveriesQuery>,
) -> ApiResult<Json<ServerResponse<PagedDeliveries>>> {
    require_group_access(&user, &query.group_id)?;

    let filter = EventDeliveryFilter {
        group_id: Some(query.group_id.clone()),
        app_id: query.app_id.clone(),
        event_id: query.event_id.clone(),
        status: parse_statuses(query.status.as_deref()),
    };
    let pageable = super::pageable(query.page, query.per_page, query.sort);
    let (content, pagination) = state
        .deliveries
        .get_event_deliveries(&filter, pageable)
        .await?;
    Ok(ServerResponse::ok(
        "Event deliveries fetched successfully",
        PagedDeliveries {
            content,
            pagination,
        },
    ))
}

async fn get_event_delivery(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServerResponse<EventDelivery>>> {
    let delivery = state.deliveries.find_event_delivery(&id).await?;
    require_group_access(&user, &delivery.group_id)?;
    Ok(ServerResponse::ok(
        "Event delivery fetched successfully",
        delivery,
    ))
}

async fn resend_event_delivery(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServerResponse<EventDelivery>>> {
    let delivery = state.deliveries.find_event_delivery(&id).await?;
    require_group_access(&user, &delivery.group_id)?;

    let resent = state.deliveries.resend_event_delivery(&id).await?;
    Ok(ServerResponse::ok(
        "App event processed for retry successfully",
        resent,
    ))
}

async fn batch_retry(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<BatchRetryRequest>,
) -> ApiResult<Json<ServerResponse<()>>> {
    // Only deliveries in groups the caller can access are replayed.
    let deliveries = state
        .repos
        .deliveries
        .find_event_deliveries_by_ids(&payload.ids)
        .await?;
    let allowed: Vec<String> = deliveries
        .into_iter()
        .filter(|d| user.role.has_group(&d.group_id))
        .map(|d| d.uid)
        .collect();

    let (resent, failed) = state.deliveries.batch_resend(&allowed).await?;
    Ok(ServerResponse::message(&format!(
        "{} successful, {} failed",
        resent, failed
    )))
}
