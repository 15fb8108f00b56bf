use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use streamsieve::config::parse_config;
use streamsieve::routing::dispatch::dispatch_request;
use streamsieve::state::AppState;

const TOKEN: &str = "tok-1";
const PROOF: &str = "proof-1";

async fn spawn_upstream(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn build_state(base: &str) -> Arc<AppState> {
    let yaml = format!(
        r#"
server:
  timeout: 10
upstream:
  prepare_url: "{base}/prepare"
  completion_url: "{base}/completion"
  delegate_url: "{base}/delegate"
  stream_idle_timeout_secs: 5
  forward_headers: [authorization]
features:
  log_level: "DISABLED"
"#
    );
    let config = parse_config(&yaml).expect("valid config");
    Arc::new(AppState::new(config).expect("state"))
}

fn prepare_reply() -> Value {
    json!({
        "model": "deepseek-chat",
        "session_id": "chatcmpl-mock",
        "token": TOKEN,
        "proof": PROOF,
        "payload": {"prompt": "hi", "chat_session_id": "s-1"},
        "final_prompt": "hello there",
        "thinking_enabled": false,
        "search_enabled": false,
    })
}

fn sse_lines(events: &[Value]) -> String {
    let mut out = String::new();
    for event in events {
        out.push_str("data: ");
        out.push_str(&event.to_string());
        out.push('\n');
    }
    out.push_str("data: [DONE]\n");
    out
}

fn completion_route(body: String) -> axum::routing::MethodRouter {
    post(move |headers: HeaderMap, payload: Json<Value>| {
        let body = body.clone();
        async move {
            let authorized = headers.get("authorization").is_some_and(|v| v == "Bearer tok-1")
                && headers.get("x-ds-pow-response").is_some_and(|v| v == PROOF)
                && payload.0["chat_session_id"] == "s-1";
            if !authorized {
                return (StatusCode::UNAUTHORIZED, "bad completion call").into_response();
            }
            ([("content-type", "text/event-stream")], body).into_response()
        }
    })
}

fn gateway_app(prepare: Value, completion_body: String) -> Router {
    Router::new()
        .route(
            "/prepare",
            post(move |headers: HeaderMap| {
                let prepare = prepare.clone();
                async move {
                    if headers.get("authorization").is_none() {
                        return (StatusCode::UNAUTHORIZED, "missing client auth").into_response();
                    }
                    Json(prepare).into_response()
                }
            }),
        )
        .route("/completion", completion_route(completion_body))
}

fn chat_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", "Bearer client-key")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request")
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

fn chunks(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .filter(|payload| *payload != "[DONE]")
        .map(|payload| serde_json::from_str(payload).expect("chunk json"))
        .collect()
}

fn joined_delta(chunks: &[Value], field: &str) -> String {
    chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"][field].as_str())
        .collect()
}

#[tokio::test]
async fn streams_translated_chunks() {
    let completion = sse_lines(&[
        json!({"v": "Hel"}),
        json!({"p": "response/content", "v": "lo"}),
        json!({"p": "response/status", "v": "FINISHED"}),
    ]);
    let (base, server) = spawn_upstream(gateway_app(prepare_reply(), completion)).await;
    let state = build_state(&base);

    let request = chat_request(&json!({"model": "deepseek-chat", "stream": true, "messages": []}));
    let response = dispatch_request(state, request).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()["cache-control"], "no-cache, no-transform");
    assert_eq!(response.headers()["x-accel-buffering"], "no");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let body = body_text(response).await;
    assert!(body.ends_with("data: [DONE]\n\n"));
    assert_eq!(body.matches("data: [DONE]").count(), 1);
    let chunks = chunks(&body);
    assert_eq!(chunks[0]["id"], "chatcmpl-mock");
    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["model"], "deepseek-chat");
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(joined_delta(&chunks, "content"), "Hello");
    let last = chunks.last().expect("terminal chunk");
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert!(last["usage"]["total_tokens"].as_u64().is_some_and(|n| n > 0));

    server.abort();
}

#[tokio::test]
async fn reasoning_is_streamed_separately() {
    let mut prepare = prepare_reply();
    prepare["thinking_enabled"] = json!(true);
    let completion = sse_lines(&[
        json!({"p": "response/thinking_content", "v": "let me think"}),
        json!({"p": "response/content", "v": "answer"}),
    ]);
    let (base, server) = spawn_upstream(gateway_app(prepare, completion)).await;

    let request = chat_request(&json!({"model": "deepseek-reasoner", "stream": true}));
    let response = dispatch_request(build_state(&base), request).await.expect("dispatch");
    let chunks = chunks(&body_text(response).await);
    assert_eq!(joined_delta(&chunks, "reasoning_content"), "let me think");
    assert_eq!(joined_delta(&chunks, "content"), "answer");
    let last = chunks.last().expect("terminal chunk");
    assert!(last["usage"]["completion_tokens_details"]["reasoning_tokens"]
        .as_u64()
        .is_some_and(|n| n > 0));

    server.abort();
}

#[tokio::test]
async fn tool_call_payload_becomes_tool_calls() {
    let payload = r#"{"tool_calls":[{"name":"get_weather","input":{"city":"Paris"}}]}"#;
    let completion = sse_lines(&[
        json!({"v": &payload[..12]}),
        json!({"v": &payload[12..40]}),
        json!({"v": &payload[40..]}),
    ]);
    let (base, server) = spawn_upstream(gateway_app(prepare_reply(), completion)).await;

    let request = chat_request(&json!({
        "model": "deepseek-chat",
        "stream": true,
        "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {}}}],
    }));
    let response = dispatch_request(build_state(&base), request).await.expect("dispatch");
    let chunks = chunks(&body_text(response).await);

    assert_eq!(joined_delta(&chunks, "content"), "");
    let call = chunks
        .iter()
        .find_map(|c| c["choices"][0]["delta"]["tool_calls"].get(0).cloned())
        .expect("tool call delta");
    assert_eq!(call["type"], "function");
    assert_eq!(call["function"]["name"], "get_weather");
    assert_eq!(call["function"]["arguments"], r#"{"city":"Paris"}"#);
    let last = chunks.last().expect("terminal chunk");
    assert_eq!(last["choices"][0]["finish_reason"], "stop");

    server.abort();
}

#[tokio::test]
async fn prepare_failure_is_relayed() {
    let app = Router::new().route(
        "/prepare",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                [("content-type", "application/json")],
                r#"{"error":{"message":"invalid key"}}"#,
            )
        }),
    );
    let (base, server) = spawn_upstream(app).await;

    let request = chat_request(&json!({"stream": true}));
    let response = dispatch_request(build_state(&base), request).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["error"]["message"], "invalid key");

    server.abort();
}

#[tokio::test]
async fn incomplete_prepare_reply_is_500() {
    let mut prepare = prepare_reply();
    prepare.as_object_mut().expect("object").remove("proof");
    let (base, server) = spawn_upstream(gateway_app(prepare, String::new())).await;

    let request = chat_request(&json!({"stream": true}));
    let response = dispatch_request(build_state(&base), request).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["error"]["message"], "invalid prepare response");

    server.abort();
}

#[tokio::test]
async fn completion_failure_is_500() {
    let app = Router::new()
        .route("/prepare", post(|| async { Json(prepare_reply()) }))
        .route(
            "/completion",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "engine down") }),
        );
    let (base, server) = spawn_upstream(app).await;

    let request = chat_request(&json!({"stream": true}));
    let response = dispatch_request(build_state(&base), request).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["error"]["message"], "Failed to get completion: engine down");

    server.abort();
}

#[tokio::test]
async fn non_streaming_request_is_delegated() {
    let app = Router::new().route(
        "/delegate",
        post(|headers: HeaderMap, body: Bytes| async move {
            let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            (
                StatusCode::ACCEPTED,
                [("x-upstream", "delegate")],
                Json(json!({"echo_model": request["model"], "auth": auth})),
            )
        }),
    );
    let (base, server) = spawn_upstream(app).await;

    let request = chat_request(&json!({"model": "deepseek-chat", "stream": false}));
    let response = dispatch_request(build_state(&base), request).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["x-upstream"], "delegate");
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["echo_model"], "deepseek-chat");
    assert_eq!(body["auth"], "Bearer client-key");

    server.abort();
}

#[tokio::test]
async fn invalid_json_is_400() {
    let state = build_state("http://127.0.0.1:9");
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .body(Body::from("{not json"))
        .expect("build request");
    let response = dispatch_request(state, request).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn preflight_and_wrong_method() {
    let state = build_state("http://127.0.0.1:9");
    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/v1/chat/completions")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), preflight).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let get = Request::builder()
        .method("GET")
        .uri("/v1/chat/completions")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(Arc::clone(&state), get).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let health = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .expect("build request");
    let response = dispatch_request(state, health).await.expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
    assert_eq!(body["status"], "streamsieve is running");
}
