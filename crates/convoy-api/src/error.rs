//! Error-to-HTTP mapping and the uniform response envelope.
//!
//! Every response, success or failure, is `{status, message, data}`;
//! failures carry `status: false` and `data: null`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;

use convoy_core::error::Error;

#[derive(Debug, Serialize)]
pub struct ServerResponse<T: Serialize> {
    pub status: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ServerResponse<T> {
    pub fn ok(message: &str, data: T) -> Json<Self> {
        Json(Self {
            status: true,
            message: message.to_string(),
            data: Some(data),
        })
    }
}

impl ServerResponse<()> {
    pub fn message(message: &str) -> Json<Self> {
        Json(Self {
            status: true,
            message: message.to_string(),
            data: None,
        })
    }
}

#[derive(Debug)]
pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        // Render the first failure as "field:detail", matching the
        // service-level validation messages.
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by_key(|(field, _)| field.to_string());
        let message = fields
            .first()
            .and_then(|(field, errs)| {
                errs.first().map(|e| {
                    let detail = e
                        .message
                        .clone()
                        .unwrap_or_else(|| e.code.clone());
                    format!("{}:{}", field, detail)
                })
            })
            .unwrap_or_else(|| "validation failed".to_string());
        ApiError(Error::Invalid(message))
    }
}

/// Attached to every error response so the request-id middleware can
/// re-render the envelope with the id of the request that failed.
#[derive(Debug, Clone)]
pub struct ErrorEnvelope {
    pub status: StatusCode,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn into_stamped_response(self, request_id: &str) -> Response {
        (
            self.status,
            Json(json!({
                "status": false,
                "message": self.message,
                "data": null,
                "request_id": request_id,
            })),
        )
            .into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Invalid(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Transient(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = self.0.message().to_string();
        let mut response = (
            status,
            Json(json!({
                "status": false,
                "message": message.clone(),
                "data": null,
            })),
        )
            .into_response();
        response
            .extensions_mut()
            .insert(ErrorEnvelope { status, message });
        response
    }
}
