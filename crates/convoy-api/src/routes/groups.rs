use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use convoy_core::auth::AuthenticatedUser;
use convoy_core::services::group::GroupInput;
use convoy_core::types::{Group, GroupConfig, GroupFilter};

use crate::error::{ApiResult, ServerResponse};
use crate::middleware::auth::{require_group_access, require_super_user};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/groups", post(create_group).get(get_groups))
        .route(
            "/groups/{groupID}",
            get(get_group).put(update_group).delete(delete_group),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct GroupRequest {
    name: String,
    logo_url: Option<String>,
    rate_limit: Option<u32>,
    rate_limit_duration: Option<String>,
    config: Option<GroupConfig>,
}

#[derive(Debug, Deserialize)]
struct GroupsQuery {
    name: Option<String>,
}

impl GroupRequest {
    fn into_input(self, state: &AppState) -> GroupInput {
        GroupInput {
            name: self.name,
            logo_url: self.logo_url,
            rate_limit: self.rate_limit,
            rate_limit_duration: self.rate_limit_duration,
            config: self
                .config
                .unwrap_or_else(|| state.config.default_group_config()),
        }
    }
}

async fn create_group(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<GroupRequest>,
) -> ApiResult<(StatusCode, Json<ServerResponse<Group>>)> {
    require_super_user(&user)?;

    let group = state
        .groups
        .create_group(payload.into_input(&state))
        .await?;
    Ok((
        StatusCode::CREATED,
        ServerResponse::ok("Group created successfully", group),
    ))
}

async fn get_groups(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<GroupsQuery>,
) -> ApiResult<Json<ServerResponse<Vec<Group>>>> {
    let filter = GroupFilter {
        names: query.name.into_iter().collect(),
    };
    let mut groups = state.groups.get_groups(filter).await?;
    // Scoped roles only see their own groups.
    if !user.role.is_super_user() {
        groups.retain(|g| user.role.has_group(&g.uid));
    }
    Ok(ServerResponse::ok("Groups fetched successfully", groups))
}

async fn get_group(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<ServerResponse<Group>>> {
    require_group_access(&user, &group_id)?;

    let mut group = state.groups.find_group_by_id(&group_id).await?;
    state.groups.fill_statistics(&mut group).await?;
    Ok(ServerResponse::ok("Group fetched successfully", group))
}

async fn update_group(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<String>,
    Json(payload): Json<GroupRequest>,
) -> ApiResult<(StatusCode, Json<ServerResponse<Group>>)> {
    require_group_access(&user, &group_id)?;

    let existing = state.groups.find_group_by_id(&group_id).await?;
    let updated = state
        .groups
        .update_group(existing, payload.into_input(&state))
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        ServerResponse::ok("Group updated successfully", updated),
    ))
}

async fn delete_group(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<ServerResponse<()>>> {
    require_super_user(&user)?;

    // 404 for an unknown group before the cascade starts.
    state.groups.find_group_by_id(&group_id).await?;
    state.groups.delete_group(&group_id).await?;
    Ok(ServerResponse::message("Group deleted successfully"))
}
