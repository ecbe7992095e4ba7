//! Error-to-HTTP response conversion.
//!
//! Wraps [`partcast_media::Error`] so route handlers can return
//! `Result<T, AppError>` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub struct AppError(partcast_media::Error);

impl From<partcast_media::Error> for AppError {
    fn from(e: partcast_media::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use partcast_media::Error;

        let (status, code) = match &self.0 {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            Error::InvalidStream(_) => (StatusCode::BAD_REQUEST, "invalid_stream"),
            Error::MissingInitBoxes => (StatusCode::INTERNAL_SERVER_ERROR, "missing_init_boxes"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "server error in handler");
        }

        let body = json!({
            "error": self.0.to_string(),
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}
