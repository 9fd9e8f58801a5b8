use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use medrag_core::error::RagError;

/// A graph error rendered as `{"error": {"kind", "node", "message"}}`.
#[derive(Debug)]
pub struct ApiError(pub RagError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<&'a str>,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_capability_failure() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), node = ?self.0.node(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.0.kind(),
                node: self.0.node(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
