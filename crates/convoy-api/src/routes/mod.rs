pub mod applications;
pub mod endpoints;
pub mod event_deliveries;
pub mod events;
pub mod groups;
pub mod health;
pub mod security;

use axum::Router;

use convoy_core::types::Pageable;

use crate::state::AppState;

/// Authenticated routes, mounted under `/api/v1`.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(groups::router(state.clone()))
        .merge(applications::router(state.clone()))
        .merge(endpoints::router(state.clone()))
        .merge(events::router(state.clone()))
        .merge(event_deliveries::router(state.clone()))
        .merge(security::router(state))
}

pub(crate) fn pageable(page: Option<u64>, per_page: Option<u64>, sort: Option<i32>) -> Pageable {
    Pageable {
        page: page.unwrap_or(1),
        per_page: per_page.unwrap_or(20),
        sort: sort.unwrap_or(-1),
    }
    .normalize()
}
