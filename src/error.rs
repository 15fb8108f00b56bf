use crate::protocol::error_shapes::openai_error_payload;

/// Error type shared by the request path, transport and translation layers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol translation error: {0}")]
    Translation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServiceUnavailable,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        503 => ErrorCategory::ServiceUnavailable,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::Config(_)
            | GatewayError::Transport(_)
            | GatewayError::Translation(_)
            | GatewayError::Internal(_) => ErrorCategory::ServerError,
            GatewayError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// Message surfaced to the client. Upstream errors carry the sanitized
    /// upstream text only, without the status prefix.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::ServiceUnavailable => http::StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::ServerError | ErrorCategory::Unknown => {
            http::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Format an error as an OpenAI error object, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = match err {
        GatewayError::Upstream { status, .. } => {
            http::StatusCode::from_u16(*status).unwrap_or(http_status_for_category(cat))
        }
        _ => http_status_for_category(cat),
    };
    (status, openai_error_payload(cat, &err.client_message()))
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

/// Convert a `GatewayError` into an axum response.
#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}
