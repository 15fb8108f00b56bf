use axum::response::{IntoResponse, Response};
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use http::{HeaderValue, StatusCode};

const ALLOW_METHODS: &str = "GET, POST, OPTIONS, PUT, DELETE";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-API-Key, X-Ds2-Target-Account";

/// Attach the permissive CORS headers browser clients expect.
pub(crate) fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    response
}

pub(crate) fn preflight_response() -> Response {
    with_cors(StatusCode::NO_CONTENT.into_response())
}
