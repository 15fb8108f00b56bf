pub(crate) mod chat;
pub(crate) mod cors;
pub mod health;

use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::error::category_from_upstream_status;
use crate::protocol::error_shapes::openai_error_payload;

/// OpenAI-style error body with an explicit status.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    let payload = openai_error_payload(category_from_upstream_status(status.as_u16()), message);
    (status, axum::Json(payload)).into_response()
}
