use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use convoy_core::auth::AuthenticatedUser;
use convoy_core::types::{self, Application, DocumentStatus, PaginationData};

use crate::error::{ApiError, ApiResult, ServerResponse};
use crate::middleware::auth::require_group_access;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/applications", post(create_application).get(get_applications))
        .route(
            "/applications/{appID}",
            get(get_application)
                .put(update_application)
                .delete(delete_application),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize, Validate)]
struct CreateApplicationRequest {
    #[validate(length(min = 1, message = "please provide a valid group id"))]
    group_id: String,
    #[validate(length(min = 1, message = "please provide your appName"))]
    name: String,
    support_email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateApplicationRequest {
    name: Option<String>,
    support_email: Option<String>,
    is_disabled: Option<bool>,
}

#[derive(Debug, Serialize)]
struct PagedApplications {
    content: Vec<Application>,
    pagination: PaginationData,
}

async fn create_application(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateApplicationRequest>,
) -> ApiResult<(StatusCode, Json<ServerResponse<Application>>)> {
    payload.validate().map_err(ApiError::from)?;
    require_group_access(&user, &payload.group_id)?;

    // The owning group must exist before an app can be attached to it.
    let group = state.groups.find_group_by_id(&payload.group_id).await?;

    let now = Utc::now();
    let app = Application {
        uid: types::uid(),
        group_id: group.uid,
        title: payload.name,
        support_email: payload.support_email.unwrap_or_default(),
        is_disabled: false,
        endpoints: Vec::new(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
        document_status: DocumentStatus::Active,
    };
    state.repos.applications.create_application(&app).await?;

    Ok((
        StatusCode::CREATED,
        ServerResponse::ok("App created successfully", app),
    ))
}

#[derive(Debug, Deserialize)]
struct GroupScopedQuery {
    #[serde(rename = "groupID")]
    group_id: String,
    page: Option<u64>,
    per_page: Option<u64>,
    sort: Option<i32>,
}

async fn get_applications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<GroupScopedQuery>,
) -> ApiResult<Json<ServerResponse<PagedApplications>>> {
    require_group_access(&user, &query.group_id)?;

    let pageable = super::pageable(query.page, query.per_page, query.sort);
    let (content, pagination) = state
        .repos
        .applications
        .load_applications_paged(Some(&query.group_id), pageable)
        .await?;
    Ok(ServerResponse::ok(
        "Apps fetched successfully",
        PagedApplications {
            content,
            pagination,
        },
    ))
}

async fn get_application(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<ServerResponse<Application>>> {
    let app = state
        .repos
        .applications
        .find_application_by_id(&app_id)
        .await?;
    require_group_access(&user, &app.group_id)?;
    Ok(ServerResponse::ok("App fetched successfully", app))
}

async fn update_application(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(app_id): Path<String>,
    Json(payload): Json<UpdateApplicationRequest>,
) -> ApiResult<Json<ServerResponse<Application>>> {
    let mut app = state
        .repos
        .applications
        .find_application_by_id(&app_id)
        .await?;
    require_group_access(&user, &app.group_id)?;

    if let Some(name) = payload.name {
        if name.trim().is_empty() {
            return Err(ApiError(convoy_core::error::Error::Invalid(
                "name:please provide your appName".to_string(),
            )));
        }
        app.title = name;
    }
    if let Some(support_email) = payload.support_email {
        app.support_email = support_email;
    }
    if let Some(is_disabled) = payload.is_disabled {
        app.is_disabled = is_disabled;
    }
    app.updated_at = Utc::now();

    state.repos.applications.update_application(&app).await?;
    Ok(ServerResponse::ok("App updated successfully", app))
}

async fn delete_application(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<ServerResponse<()>>> {
    let app = state
        .repos
        .applications
        .find_application_by_id(&app_id)
        .await?;
    require_group_access(&user, &app.group_id)?;

    state.repos.applications.delete_application(&app.uid).await?;
    Ok(ServerResponse::message("App deleted successfully"))
}
