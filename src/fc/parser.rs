//! JSON tool-call extraction from free-form model text.
//!
//! Models that have no native tool-call channel write calls as inline JSON,
//! usually `{"tool_calls":[{"name":..,"input":{..}}]}`, but the exact shape
//! drifts. The parser accepts the common variants and never reports a decode
//! problem as an error: a candidate either yields calls or it does not.

use std::borrow::Cow;
use std::sync::LazyLock;

use memchr::memmem;
use regex_lite::Regex;
use serde_json::{Map, Value};

use super::filter::filter_tool_calls;
use crate::json_scan::scan_object;

pub(crate) const TOOL_CALLS_MARKER: &str = "tool_calls";
pub(crate) const CODE_FENCE: &str = "```";

static FENCED_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").ok());
static FENCED_BLOCK_BODY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").ok());
static TOOL_CALLS_ARRAY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{\s*["']tool_calls["']\s*:\s*\[(.*?)\]\s*\}"#).ok()
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One tool invocation recovered from model text.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub input: Map<String, Value>,
}

/// Detailed result of a parse attempt, including why nothing was returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub calls: Vec<ToolCall>,
    /// The text mentioned the marker or decoded into call-shaped JSON.
    pub saw_tool_call_syntax: bool,
    /// Calls were decoded but every one of them named an undeclared tool.
    pub rejected_by_policy: bool,
    pub rejected_names: Vec<String>,
}

impl ParseOutcome {
    fn apply_filter(&mut self, parsed: Vec<ToolCall>, allowed: &[String]) {
        let filtered = filter_tool_calls(parsed, allowed);
        self.rejected_by_policy =
            !filtered.rejected_names.is_empty() && filtered.accepted.is_empty();
        self.calls = filtered.accepted;
        self.rejected_names = filtered.rejected_names;
    }
}

// ---------------------------------------------------------------------------
// Text helpers shared with the sieve
// ---------------------------------------------------------------------------

/// ASCII case-insensitive search for the `tool_calls` marker at or after `from`.
///
/// Returns a byte index into `text`.
#[inline]
#[must_use]
pub(crate) fn find_marker(text: &str, from: usize) -> Option<usize> {
    if from >= text.len() {
        return None;
    }
    let haystack = &text.as_bytes()[from..];
    if let Some(pos) = memmem::find(haystack, TOOL_CALLS_MARKER.as_bytes()) {
        if !haystack[..pos].iter().any(u8::is_ascii_uppercase) {
            return Some(from + pos);
        }
    }
    let lowered = haystack.to_ascii_lowercase();
    memmem::find(&lowered, TOOL_CALLS_MARKER.as_bytes()).map(|pos| from + pos)
}

#[inline]
#[must_use]
pub(crate) fn contains_marker(text: &str) -> bool {
    find_marker(text, 0).is_some()
}

/// `true` when `text` leaves a ``` fence open.
#[inline]
#[must_use]
pub(crate) fn inside_code_fence(text: &str) -> bool {
    memmem::find_iter(text.as_bytes(), CODE_FENCE.as_bytes()).count() % 2 == 1
}

/// Text that quotes a fence is presented as an example rather than a call.
#[inline]
#[must_use]
pub(crate) fn looks_like_tool_example_context(text: &str) -> bool {
    memmem::find(text.as_bytes(), CODE_FENCE.as_bytes()).is_some()
}

#[must_use]
pub fn strip_fenced_code_blocks(text: &str) -> Cow<'_, str> {
    match FENCED_BLOCK.as_ref() {
        Some(re) => re.replace_all(text, " "),
        None => Cow::Borrowed(text),
    }
}

// ---------------------------------------------------------------------------
// Tool names
// ---------------------------------------------------------------------------

/// Collect declared tool names from an OpenAI `tools` array.
///
/// Object entries without a usable name still count, under the name
/// `"unknown"`, so a request declaring tools always enables detection.
#[must_use]
pub fn extract_tool_names(tools: &Value) -> Vec<String> {
    let Some(tools) = tools.as_array() else {
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(Value::as_object)
        .map(|tool| {
            let spec = tool
                .get("function")
                .and_then(Value::as_object)
                .unwrap_or(tool);
            let name = spec.get("name").and_then(Value::as_str).map_or("", str::trim);
            if name.is_empty() {
                "unknown".to_string()
            } else {
                name.to_string()
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

/// Decode one candidate fragment into zero or more calls.
#[must_use]
pub fn parse_tool_calls_payload(candidate: &str) -> Vec<ToolCall> {
    let Ok(decoded) = serde_json::from_str::<Value>(candidate) else {
        return Vec::new();
    };
    match decoded {
        Value::Array(items) => parse_call_list(items),
        Value::Object(mut obj) => match obj.remove("tool_calls") {
            Some(list) if is_truthy(&list) => match list {
                Value::Array(items) => parse_call_list(items),
                _ => Vec::new(),
            },
            _ => parse_call_item(obj).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn parse_call_list(items: Vec<Value>) -> Vec<ToolCall> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(obj) => parse_call_item(obj),
            _ => None,
        })
        .collect()
}

const INPUT_KEYS: [&str; 4] = ["arguments", "args", "parameters", "params"];

fn parse_call_item(mut obj: Map<String, Value>) -> Option<ToolCall> {
    let mut name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let mut input = obj.remove("input");

    if let Some(Value::Object(mut function)) = obj.remove("function") {
        if name.is_empty() {
            name = function
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
        }
        if input.is_none() {
            input = function.remove("arguments");
        }
    }
    if input.is_none() {
        input = INPUT_KEYS.iter().find_map(|key| obj.remove(*key));
    }

    if name.is_empty() {
        return None;
    }
    Some(ToolCall {
        name,
        input: parse_call_input(input),
    })
}

fn parse_call_input(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        Some(Value::String(raw)) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Map::new();
            }
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => {
                    let mut wrapped = Map::new();
                    wrapped.insert("_raw".to_string(), Value::String(raw.to_string()));
                    wrapped
                }
            }
        }
        _ => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Candidate extraction
// ---------------------------------------------------------------------------

/// Ordered, de-duplicated substrings of `text` worth decoding as a payload.
///
/// Strategies, in order: the whole trimmed text, fenced block bodies,
/// brace-balanced objects enclosing the marker, the first-`{`-to-last-`}`
/// span, and a reconstruction of a bare `{"tool_calls":[...]}` match.
#[must_use]
pub fn build_tool_call_candidates(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    let mut candidates: Vec<String> = Vec::with_capacity(4);
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !candidates.iter().any(|c| c == candidate) {
            candidates.push(candidate.to_string());
        }
    };

    push(trimmed);

    if let Some(re) = FENCED_BLOCK_BODY.as_ref() {
        for caps in re.captures_iter(trimmed) {
            if let Some(body) = caps.get(1) {
                push(body.as_str());
            }
        }
    }

    for object in extract_tool_call_objects(trimmed) {
        push(object);
    }

    if let (Some(first), Some(last)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if last > first {
            push(&trimmed[first..=last]);
        }
    }

    if let Some(caps) = TOOL_CALLS_ARRAY.as_ref().and_then(|re| re.captures(trimmed)) {
        if let Some(inner) = caps.get(1).filter(|m| !m.as_str().is_empty()) {
            push(&format!(r#"{{"tool_calls":[{}]}}"#, inner.as_str()));
        }
    }

    candidates
}

/// Every complete object that encloses a marker occurrence, scanning outward
/// from the nearest `{` before each marker.
fn extract_tool_call_objects(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut offset = 0;
    while let Some(idx) = find_marker(text, offset) {
        let mut next_offset = idx + TOOL_CALLS_MARKER.len();
        let mut search_end = idx;
        while let Some(start) = text[..search_end].rfind('{') {
            let scan = scan_object(text, start);
            if scan.complete && scan.end > idx {
                out.push(text[start..scan.end].trim());
                next_offset = next_offset.max(scan.end);
                break;
            }
            search_end = start;
        }
        offset = next_offset;
    }
    out
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Parse calls anywhere in `text`. Fenced blocks are ignored.
#[must_use]
pub fn parse_tool_calls_detailed(text: &str, allowed: &[String]) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    if text.trim().is_empty() {
        return outcome;
    }
    let sanitized = strip_fenced_code_blocks(text);
    if sanitized.trim().is_empty() {
        return outcome;
    }
    outcome.saw_tool_call_syntax = contains_marker(&sanitized);

    let parsed = build_tool_call_candidates(&sanitized)
        .iter()
        .map(|candidate| parse_tool_calls_payload(candidate))
        .find(|calls| !calls.is_empty());
    let Some(parsed) = parsed else {
        return outcome;
    };
    outcome.saw_tool_call_syntax = true;
    outcome.apply_filter(parsed, allowed);
    outcome
}

/// Parse `text` only when the whole of it is a JSON payload.
#[must_use]
pub fn parse_standalone_tool_calls_detailed(text: &str, allowed: &[String]) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let trimmed = text.trim();
    if trimmed.is_empty() || looks_like_tool_example_context(trimmed) {
        return outcome;
    }
    outcome.saw_tool_call_syntax = contains_marker(trimmed);
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return outcome;
    }

    let parsed = parse_tool_calls_payload(trimmed);
    if parsed.is_empty() {
        return outcome;
    }
    outcome.saw_tool_call_syntax = true;
    outcome.apply_filter(parsed, allowed);
    outcome
}

#[must_use]
pub fn parse_tool_calls(text: &str, allowed: &[String]) -> Vec<ToolCall> {
    parse_tool_calls_detailed(text, allowed).calls
}

#[must_use]
pub fn parse_standalone_tool_calls(text: &str, allowed: &[String]) -> Vec<ToolCall> {
    parse_standalone_tool_calls_detailed(text, allowed).calls
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
