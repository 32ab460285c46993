//! Mapping from engine errors to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::error::Error;

const TASK_NOT_FOUND: &str =
    "the task could not be found, it is either being dispatched or has already been dispatched";

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::TaskNotFound(_) => StatusCode::NOT_FOUND,
            Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::Forbidden => "FORBIDDEN",
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            Error::TaskNotFound(_) => "TASK_NOT_FOUND",
            Error::ShuttingDown => "SHUTTING_DOWN",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Error::TaskNotFound(_) => TASK_NOT_FOUND.to_string(),
            e if status.is_server_error() && !matches!(e, Error::ShuttingDown) => {
                error!(error = %e, "request failed");
                "internal server error".to_string()
            }
            e => e.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.kind(),
            }
        }));
        (status, body).into_response()
    }
}
