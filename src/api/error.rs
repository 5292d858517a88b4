//! HTTP rendering of operation errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::{ApiErrorKind, Error};

/// Error returned from handlers
///
/// Rendered as `{"detail": "<message>"}` with a status derived from the
/// error category.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// HTTP status for an operation error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Orchestrator { source, .. } => match source.kind {
            ApiErrorKind::NotFound => StatusCode::NOT_FOUND,
            ApiErrorKind::Conflict => StatusCode::CONFLICT,
            ApiErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorKind::Invalid => StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ApiErrorKind::Other => source
                .code
                .and_then(|c| StatusCode::from_u16(c).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = serde_json::json!({ "detail": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
