use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub const FORMAT_UNAVAILABLE: &str = "Requested format not available";

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned by every handler. Only `message` reaches the client, so
/// callers log provider diagnostics before building one.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// The selector did not resolve to any format of the fresh metadata.
    pub fn format_unavailable() -> Self {
        Self::bad_request(FORMAT_UNAVAILABLE)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });

        (self.status, body).into_response()
    }
}
