use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary.
pub fn health_handler(state: &AppState) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "streamsieve is running",
        "config": {
            "base_path": state.base_path(),
            "stream_idle_timeout_secs": config.upstream.stream_idle_timeout_secs,
            "features": {
                "log_level": config.features.log_level,
                "enable_tool_sieve": config.features.enable_tool_sieve,
                "filter_citations": config.features.filter_citations,
                "rejected_call_policy": config.features.rejected_call_policy,
            }
        }
    }))
}
