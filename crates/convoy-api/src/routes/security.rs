use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convoy_core::auth::{AuthenticatedUser, KeyType, Role};
use convoy_core::services::security::ApiKeyInput;
use convoy_core::types::{ApiKey, PaginationData};

use crate::error::{ApiResult, ServerResponse};
use crate::middleware::auth::{require_group_access, require_super_user};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/security/keys", post(create_api_key).get(get_api_keys))
        .route(
            "/security/keys/{keyID}",
            get(get_api_key).put(update_api_key).delete(revoke_api_key),
        )
        .route(
            "/security/applications/{appID}/keys",
            post(create_app_portal_api_key),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateApiKeyRequest {
    name: String,
    #[serde(rename = "type", default = "default_key_type")]
    key_type: KeyType,
    role: Role,
    expires_at: Option<DateTime<Utc>>,
}

fn default_key_type() -> KeyType {
    KeyType::Api
}

#[derive(Debug, Deserialize)]
struct UpdateApiKeyRequest {
    role: Role,
}

/// Public view of a stored key: the salted hash and salt never leave the
/// repository layer.
#[derive(Debug, Serialize)]
struct ApiKeyView {
    uid: String,
    mask_id: String,
    name: String,
    #[serde(rename = "type")]
    key_type: KeyType,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyView {
    fn from(key: ApiKey) -> Self {
        Self {
            uid: key.uid,
            mask_id: key.mask_id,
            name: key.name,
            key_type: key.key_type,
            role: key.role,
            expires_at: key.expires_at,
            revoked_at: key.revoked_at,
            created_at: key.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreatedKeyResponse {
    api_key: ApiKeyView,
    /// One-time plaintext; shown only in this response.
    key: String,
}

#[derive(Debug, Serialize)]
struct PortalKeyResponse {
    api_key: ApiKeyView,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct PagedKeys {
    content: Vec<ApiKeyView>,
    pagination: PaginationData,
}

#[derive(Debug, Deserialize)]
struct PortalKeyQuery {
    #[serde(rename = "baseUrl")]
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeysQuery {
    page: Option<u64>,
    per_page: Option<u64>,
    sort: Option<i32>,
}

async fn create_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<ServerResponse<CreatedKeyResponse>>)> {
    require_super_user(&user)?;

    let created = state
        .security
        .create_api_key(ApiKeyInput {
            name: payload.name,
            key_type: payload.key_type,
            role: payload.role,
            expires_at: payload.expires_at,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        ServerResponse::ok(
            "API Key created successfully",
            CreatedKeyResponse {
                api_key: created.api_key.into(),
                key: created.key,
            },
        ),
    ))
}

async fn create_app_portal_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(app_id): Path<String>,
    Query(query): Query<PortalKeyQuery>,
) -> ApiResult<(StatusCode, Json<ServerResponse<PortalKeyResponse>>)> {
    let app = state
        .repos
        .applications
        .find_application_by_id(&app_id)
        .await?;
    require_group_access(&user, &app.group_id)?;
    let group = state.groups.find_group_by_id(&app.group_id).await?;

    let (created, url) = state
        .security
        .create_app_portal_api_key(&group, &app, query.base_url.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        ServerResponse::ok(
            "API Key created successfully",
            PortalKeyResponse {
                api_key: created.api_key.into(),
                key: created.key,
                url,
            },
        ),
    ))
}

async fn get_api_keys(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<KeysQuery>,
) -> ApiResult<Json<ServerResponse<PagedKeys>>> {
    require_super_user(&user)?;

    let pageable = super::pageable(query.page, query.per_page, query.sort);
    let (keys, pagination) = state.security.get_api_keys(pageable).await?;
    Ok(ServerResponse::ok(
        "api keys fetched successfully",
        PagedKeys {
            content: keys.into_iter().map(ApiKeyView::from).collect(),
            pagination,
        },
    ))
}

async fn get_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key_id): Path<String>,
) -> ApiResult<Json<ServerResponse<ApiKeyView>>> {
    require_super_user(&user)?;

    let key = state.security.get_api_key_by_id(&key_id).await?;
    Ok(ServerResponse::ok(
        "api key fetched successfully",
        key.into(),
    ))
}

async fn update_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key_id): Path<String>,
    Json(payload): Json<UpdateApiKeyRequest>,
) -> ApiResult<Json<ServerResponse<ApiKeyView>>> {
    require_super_user(&user)?;

    let key = state.security.update_api_key(&key_id, payload.role).await?;
    Ok(ServerResponse::ok(
        "api key updated successfully",
        key.into(),
    ))
}

async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key_id): Path<String>,
) -> ApiResult<Json<ServerResponse<()>>> {
    require_super_user(&user)?;

    state.security.revoke_api_key(&key_id).await?;
    Ok(ServerResponse::message("api key revoked successfully"))
}
