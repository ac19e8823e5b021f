use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use nanoid::nanoid;
use serde::Deserialize;

use convoy_core::auth::AuthenticatedUser;
use convoy_core::error::Error;
use convoy_core::types::{self, Application, Endpoint, EndpointStatus};

use crate::error::{ApiError, ApiResult, ServerResponse};
use crate::middleware::auth::require_group_access;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/applications/{appID}/endpoints",
            post(create_endpoint).get(get_endpoints),
        )
        .route(
            "/applications/{appID}/endpoints/{endpointID}",
            get(get_endpoint).put(update_endpoint).delete(delete_endpoint),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct EndpointRequest {
    url: String,
    description: Option<String>,
    secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateEndpointRequest {
    url: String,
    description: Option<String>,
    secret: Option<String>,
    status: Option<EndpointStatus>,
}

fn validate_url(url: &str) -> Result<(), ApiError> {
    let url = url.trim();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(ApiError(Error::Invalid(
            "url:please provide a valid url".to_string(),
        )));
    }
    Ok(())
}

async fn load_owned_app(
    state: &AppState,
    user: &AuthenticatedUser,
    app_id: &str,
) -> ApiResult<Application> {
    let app = state
        .repos
        .applications
        .find_application_by_id(app_id)
        .await?;
    require_group_access(user, &app.group_id)?;
    Ok(app)
}

async fn create_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(app_id): Path<String>,
    Json(payload): Json<EndpointRequest>,
) -> ApiResult<(StatusCode, Json<ServerResponse<Endpoint>>)> {
    validate_url(&payload.url)?;
    let mut app = load_owned_app(&state, &user, &app_id).await?;

    let now = Utc::now();
    let endpoint = Endpoint {
        uid: types::uid(),
        target_url: payload.url,
        description: payload.description.unwrap_or_default(),
        secret: payload
            .secret
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| nanoid!(24)),
        status: EndpointStatus::Active,
        created_at: now,
        updated_at: now,
    };
    app.endpoints.push(endpoint.clone());
    app.updated_at = now;
    state.repos.applications.update_application(&app).await?;

    Ok((
        StatusCode::CREATED,
        ServerResponse::ok("App endpoint created successfully", endpoint),
    ))
}

async fn get_endpoints(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<ServerResponse<Vec<Endpoint>>>> {
    let app = load_owned_app(&state, &user, &app_id).await?;
    Ok(ServerResponse::ok(
        "App endpoints fetched successfully",
        app.endpoints,
    ))
}

async fn get_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((app_id, endpoint_id)): Path<(String, String)>,
) -> ApiResult<Json<ServerResponse<Endpoint>>> {
    let app = load_owned_app(&state, &user, &app_id).await?;
    let endpoint = app
        .endpoint(&endpoint_id)
        .cloned()
        .ok_or_else(|| Error::NotFound("endpoint not found".to_string()))?;
    Ok(ServerResponse::ok(
        "App endpoint fetched successfully",
        endpoint,
    ))
}

async fn update_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((app_id, endpoint_id)): Path<(String, String)>,
    Json(payload): Json<UpdateEndpointRequest>,
) -> ApiResult<Json<ServerResponse<Endpoint>>> {
    validate_url(&payload.url)?;
    let mut app = load_owned_app(&state, &user, &app_id).await?;

    let now = Utc::now();
    let endpoint = app
        .endpoints
        .iter_mut()
        .find(|e| e.uid == endpoint_id)
        .ok_or_else(|| Error::NotFound("endpoint not found".to_string()))?;

    endpoint.target_url = payload.url;
    if let Some(description) = payload.description {
        endpoint.description = description;
    }
    if let Some(secret) = payload.secret.filter(|s| !s.is_empty()) {
        endpoint.secret = secret;
    }
    // Manual re-enable (inactive -> active) comes through here.
    if let Some(status) = payload.status {
        endpoint.status = status;
    }
    endpoint.updated_at = now;
    let updated = endpoint.clone();

    app.updated_at = now;
    state.repos.applications.update_application(&app).await?;
    Ok(ServerResponse::ok(
        "App endpoint updated successfully",
        updated,
    ))
}

async fn delete_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((app_id, endpoint_id)): Path<(String, String)>,
) -> ApiResult<Json<ServerResponse<()>>> {
    let mut app = load_owned_app(&state, &user, &app_id).await?;

    let before = app.endpoints.len();
    app.endpoints.retain(|e| e.uid != endpoint_id);
    if app.endpoints.len() == before {
        return Err(ApiError(Error::NotFound("endpoint not found".to_string())));
    }
    app.updated_at = Utc::now();
    state.repos.applications.update_application(&app).await?;
    Ok(ServerResponse::message("App endpoint deleted successfully"))
}
