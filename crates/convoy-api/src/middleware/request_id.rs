//! Per-request ids for support and log correlation.
//!
//! Every request runs inside a tracing span carrying its id. Error
//! envelopes are re-rendered with the id so callers can quote it back,
//! and the id is echoed in the `X-Request-Id` response header.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use nanoid::nanoid;
use tracing::Instrument;

use crate::error::ErrorEnvelope;

pub async fn request_id(req: Request<Body>, next: Next) -> Response {
    let request_id = format!("req_{}", nanoid!(16));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut response = next.run(req).instrument(span).await;

    if let Some(envelope) = response.extensions().get::<ErrorEnvelope>().cloned() {
        response = envelope.into_stamped_response(&request_id);
    }
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}
