//! HTTP API for the Convoy webhook delivery gateway.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{middleware::from_fn, middleware::from_fn_with_state, Router};

use crate::middleware::auth::authenticate;
use crate::middleware::request_id::request_id;
use crate::state::AppState;

/// The complete application router: an unauthenticated health probe plus
/// the authenticated `/api/v1` surface.
pub fn app_router(state: AppState) -> Router {
    let api = routes::api_router(state.clone())
        .layer(from_fn_with_state(state, authenticate))
        .layer(from_fn(request_id));

    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", api)
        .layer(axum::extract::DefaultBodyLimit::max(1_048_576))
}
