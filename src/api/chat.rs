//! `POST /v1/chat/completions`.
//!
//! Streaming requests go through the preparation endpoint, then the vendor
//! completion stream is translated on the fly. Everything else is forwarded
//! to the delegate endpoint unchanged.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::api::{cors, error_response};
use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use crate::protocol::error_shapes::sanitize_upstream_error;
use crate::protocol::openai_chat::{value_is_true, ChatRequestView};
use crate::state::AppState;
use crate::stream::{translate_stream, TranslationContext, TranslatorOptions};
use crate::util::{fallback_completion_id, unix_now_secs};

const INVALID_PREPARE_REPLY: &str = "invalid prepare response";

pub(crate) async fn handler(state: Arc<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = state.next_request_id();
    let response = match handle(&state, &headers, body, request_id).await {
        Ok(response) => response,
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "chat completion failed");
            err.into_response()
        }
    };
    cors::with_cors(response)
}

async fn handle(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
    request_id: uuid::Uuid,
) -> Result<Response, GatewayError> {
    let view = ChatRequestView::parse(&body)?;
    if !view.stream {
        debug!(request_id = %request_id, "delegating non-streaming request");
        return delegate(state, headers, body).await;
    }

    let upstream = &state.config.upstream;
    let prepare_headers = forwarded_headers(upstream, headers, &upstream.prepare_headers);
    let reply = state.transport.prepare(&prepare_headers, body).await?;
    let status = reply.status();
    let content_type = reply.headers().get(CONTENT_TYPE).cloned();
    let reply_body = reply
        .bytes()
        .await
        .map_err(|e| GatewayError::Transport(format!("Failed to read prepare response: {e}")))?;
    if !status.is_success() {
        debug!(request_id = %request_id, status = status.as_u16(), "relaying prepare failure");
        return Ok(relay_prepare_failure(status, content_type, reply_body));
    }

    let prepared = PreparedStream::from_reply(&reply_body, view.model.as_deref())?;
    let completion_headers = completion_headers(upstream, &prepared)?;
    let payload = serde_json::to_vec(&prepared.payload)
        .map_err(|e| GatewayError::Internal(format!("Failed to encode completion payload: {e}")))?;
    let completion = state
        .transport
        .completion(&completion_headers, Bytes::from(payload))
        .await?;
    if !completion.status().is_success() {
        let detail = completion.text().await.unwrap_or_default();
        let detail = detail.trim();
        let message = if detail.is_empty() {
            "Failed to get completion.".to_string()
        } else {
            format!("Failed to get completion: {}", sanitize_upstream_error(detail.as_bytes()))
        };
        return Err(GatewayError::Upstream {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message,
        });
    }

    let features = &state.config.features;
    let tool_names = (features.enable_tool_sieve && view.declares_tools()).then(|| view.tool_names());
    info!(
        request_id = %request_id,
        model = %prepared.model,
        session_id = %prepared.session_id,
        thinking = prepared.thinking_enabled,
        search = prepared.search_enabled,
        tools = tool_names.as_ref().map_or(0, Vec::len),
        "streaming chat completion"
    );
    let ctx = TranslationContext::new(TranslatorOptions {
        session_id: prepared.session_id,
        model: prepared.model,
        created: unix_now_secs(),
        thinking_enabled: prepared.thinking_enabled,
        filter_citations: features.filter_citations && prepared.search_enabled,
        final_prompt: prepared.final_prompt,
        tool_names,
        rejected_call_policy: features.rejected_call_policy,
    });
    let idle_timeout = Duration::from_secs(upstream.stream_idle_timeout_secs);
    let body = Body::from_stream(translate_stream(completion.bytes_stream(), ctx, idle_timeout));
    Ok(sse_ok_response(body))
}

// ---------------------------------------------------------------------------
// Preparation reply
// ---------------------------------------------------------------------------

/// Everything the completion call and the translator need for one stream.
#[derive(Debug)]
struct PreparedStream {
    model: String,
    session_id: String,
    token: String,
    proof: String,
    payload: Map<String, Value>,
    final_prompt: String,
    thinking_enabled: bool,
    search_enabled: bool,
}

impl PreparedStream {
    fn from_reply(body: &[u8], request_model: Option<&str>) -> Result<Self, GatewayError> {
        let reply = serde_json::from_slice::<Value>(body).unwrap_or(Value::Null);
        let field = |names: &[&str]| -> String {
            names
                .iter()
                .map(|name| loose_string(reply.get(*name).unwrap_or(&Value::Null)))
                .find(|value| !value.is_empty())
                .unwrap_or_default()
        };
        let flag = |name: &str| reply.get(name).is_some_and(value_is_true);

        let mut model = field(&["model"]);
        if model.is_empty() {
            model = request_model.unwrap_or_default().trim().to_string();
        }
        let mut session_id = field(&["session_id"]);
        if session_id.is_empty() {
            session_id = fallback_completion_id();
        }
        let token = field(&["token", "deepseek_token"]);
        let proof = field(&["proof", "pow_header"]);
        let payload = reply.get("payload").and_then(Value::as_object).cloned();

        let Some(payload) = payload.filter(|_| !model.is_empty() && !token.is_empty() && !proof.is_empty()) else {
            return Err(invalid_prepare_reply());
        };
        Ok(Self {
            model,
            session_id,
            token,
            proof,
            payload,
            final_prompt: field(&["final_prompt"]),
            thinking_enabled: flag("thinking_enabled"),
            search_enabled: flag("search_enabled"),
        })
    }
}

fn invalid_prepare_reply() -> GatewayError {
    GatewayError::Upstream {
        status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        message: INVALID_PREPARE_REPLY.to_string(),
    }
}

/// Trimmed string form of a loosely typed field; arrays use their first item.
fn loose_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items.first().map(loose_string).unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn relay_prepare_failure(status: StatusCode, content_type: Option<HeaderValue>, body: Bytes) -> Response {
    if body.iter().all(u8::is_ascii_whitespace) {
        return error_response(status, "prepare failed");
    }
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        content_type.unwrap_or_else(|| HeaderValue::from_static("application/json")),
    );
    response
}

// ---------------------------------------------------------------------------
// Outbound headers
// ---------------------------------------------------------------------------

/// Client headers named in `forward_headers`, then the static `extra` set.
fn forwarded_headers(
    upstream: &UpstreamConfig,
    client: &HeaderMap,
    extra: &std::collections::BTreeMap<String, String>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in &upstream.forward_headers {
        let Ok(name) = HeaderName::from_bytes(name.trim().as_bytes()) else {
            continue;
        };
        if let Some(value) = client.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    for (name, value) in extra {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
    let content_type = client
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    headers.entry(CONTENT_TYPE).or_insert(content_type);
    headers
}

fn completion_headers(upstream: &UpstreamConfig, prepared: &PreparedStream) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &upstream.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
    headers
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));

    let bearer = HeaderValue::from_str(&format!("Bearer {}", prepared.token)).map_err(|_| invalid_prepare_reply())?;
    let proof_name = HeaderName::from_bytes(upstream.proof_header.trim().as_bytes())
        .map_err(|_| GatewayError::Config(format!("invalid proof header name '{}'", upstream.proof_header)))?;
    let proof = HeaderValue::from_str(&prepared.proof).map_err(|_| invalid_prepare_reply())?;
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(proof_name, proof);
    Ok(headers)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

async fn delegate(state: &AppState, headers: &HeaderMap, body: Bytes) -> Result<Response, GatewayError> {
    let upstream = &state.config.upstream;
    let outbound = forwarded_headers(upstream, headers, &std::collections::BTreeMap::new());
    let reply = state.transport.delegate(&outbound, body).await?;

    let status = reply.status();
    let mut relayed = HeaderMap::new();
    for (name, value) in reply.headers() {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION {
            continue;
        }
        relayed.append(name.clone(), value.clone());
    }
    let mut response = Response::new(Body::from_stream(reply.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = relayed;
    Ok(response)
}
