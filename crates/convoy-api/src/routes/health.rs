use axum::{routing::get, Json, Router};

use crate::error::ServerResponse;

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<ServerResponse<()>> {
    ServerResponse::message("up")
}
