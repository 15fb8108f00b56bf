//! Upstream vendor event decoding.
//!
//! Each `data:` line of the upstream stream is a small JSON patch of the form
//! `{"p": <path>, "o": <op>, "v": <value>}`. The schema has been revised many
//! times, so decoding is a set of shape probes rather than one typed model.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use smallvec::SmallVec;

const SKIP_PATH_PATTERNS: [&str; 8] = [
    "quasi_status",
    "elapsed_secs",
    "token_usage",
    "pending_fragment",
    "conversation_mode",
    "fragments/-1/status",
    "fragments/-2/status",
    "fragments/-3/status",
];

const FINISHED: &str = "FINISHED";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Whether a piece of text belongs to the reasoning trace or the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Thinking,
    Final,
}

impl PartKind {
    /// Mode a response starts in.
    #[must_use]
    pub fn initial(thinking_enabled: bool) -> Self {
        if thinking_enabled {
            PartKind::Thinking
        } else {
            PartKind::Final
        }
    }

    fn from_fragment_type(fragment_type: &str) -> Option<Self> {
        if fragment_type.eq_ignore_ascii_case("THINK")
            || fragment_type.eq_ignore_ascii_case("THINKING")
        {
            Some(PartKind::Thinking)
        } else if fragment_type.eq_ignore_ascii_case("RESPONSE") {
            Some(PartKind::Final)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPart {
    pub text: String,
    pub kind: PartKind,
}

impl ContentPart {
    fn new(text: &str, kind: PartKind) -> Self {
        Self {
            text: text.to_string(),
            kind,
        }
    }
}

pub type ContentParts = SmallVec<[ContentPart; 2]>;

/// One decoded upstream event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorEvent {
    #[serde(default, rename = "p", deserialize_with = "lenient_string")]
    pub path: String,
    #[serde(default, rename = "o", deserialize_with = "lenient_string")]
    pub op: String,
    #[serde(default, rename = "v")]
    pub value: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: String,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorParse {
    pub parts: ContentParts,
    pub finished: bool,
    pub next_kind: PartKind,
}

impl VendorParse {
    fn nothing(kind: PartKind) -> Self {
        Self {
            parts: ContentParts::new(),
            finished: false,
            next_kind: kind,
        }
    }

    fn finished(kind: PartKind) -> Self {
        Self {
            parts: ContentParts::new(),
            finished: true,
            next_kind: kind,
        }
    }
}

/// Classification of one raw upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Not a data line, empty, or undecodable.
    Skip,
    /// The `[DONE]` terminator.
    Done,
    Error { content_filter: bool, message: String },
    Content(VendorParse),
}

// ---------------------------------------------------------------------------
// Line level
// ---------------------------------------------------------------------------

/// Decode one upstream line.
#[must_use]
pub fn parse_vendor_line(line: &str, thinking_enabled: bool, current: PartKind) -> LineOutcome {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return LineOutcome::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return LineOutcome::Skip;
    }
    if data == "[DONE]" {
        return LineOutcome::Done;
    }
    let event = match serde_json::from_str::<VendorEvent>(data) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(error = %err, "skipping undecodable upstream line");
            return LineOutcome::Skip;
        }
    };
    if let Some(error) = event.error.as_ref().filter(|e| is_set(e)) {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return LineOutcome::Error {
            content_filter: false,
            message,
        };
    }
    if event.code == "content_filter" {
        return LineOutcome::Error {
            content_filter: true,
            message: "content filtered by upstream".to_string(),
        };
    }
    LineOutcome::Content(parse_vendor_event(&event, thinking_enabled, current))
}

/// An `error` field only counts when it carries something: `false`, `0`, `""`
/// and `null` are ignored.
fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Citation markers injected by search-enabled upstream responses.
#[inline]
#[must_use]
pub fn is_citation(text: &str) -> bool {
    text.trim_start().starts_with("[citation:")
}

// ---------------------------------------------------------------------------
// Event level
// ---------------------------------------------------------------------------

fn should_skip_path(path: &str) -> bool {
    path == "response/search_status" || SKIP_PATH_PATTERNS.iter().any(|p| path.contains(p))
}

#[inline]
fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> &'a str {
    map.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Map one event onto content parts, a finish signal and the next mode.
#[must_use]
pub fn parse_vendor_event(
    event: &VendorEvent,
    thinking_enabled: bool,
    current: PartKind,
) -> VendorParse {
    let Some(value) = event.value.as_ref() else {
        return VendorParse::nothing(current);
    };
    let path = event.path.as_str();
    if should_skip_path(path) {
        return VendorParse::nothing(current);
    }
    if path == "response/status" && value.as_str() == Some(FINISHED) {
        return VendorParse::finished(current);
    }

    let mut next_kind = current;
    let mut parts = ContentParts::new();

    // Fragment APPEND directly on the fragments path.
    if path == "response/fragments" && event.op.eq_ignore_ascii_case("APPEND") {
        if let Some(fragments) = value.as_array() {
            for fragment in fragments.iter().filter_map(Value::as_object) {
                let content = str_field(fragment, "content");
                let kind = PartKind::from_fragment_type(str_field(fragment, "type"));
                if let Some(kind) = kind {
                    next_kind = kind;
                }
                if !content.is_empty() {
                    parts.push(ContentPart::new(content, kind.unwrap_or(PartKind::Final)));
                }
            }
        }
    }

    // Batched patches on "response" only switch the mode.
    if path == "response" {
        if let Some(items) = value.as_array() {
            for item in items.iter().filter_map(Value::as_object) {
                if str_field(item, "p") != "fragments" || str_field(item, "o") != "APPEND" {
                    continue;
                }
                let Some(fragments) = item.get("v").and_then(Value::as_array) else {
                    continue;
                };
                for fragment in fragments.iter().filter_map(Value::as_object) {
                    if let Some(kind) = PartKind::from_fragment_type(str_field(fragment, "type")) {
                        next_kind = kind;
                    }
                }
            }
        }
    }

    let part_kind = if path == "response/thinking_content" {
        PartKind::Thinking
    } else if path == "response/content" {
        PartKind::Final
    } else if path.contains("response/fragments") && path.contains("/content") {
        next_kind
    } else if path.is_empty() && thinking_enabled {
        next_kind
    } else {
        PartKind::Final
    };

    match value {
        Value::String(text) => {
            if text == FINISHED && (path.is_empty() || path == "status") {
                return VendorParse::finished(next_kind);
            }
            if !text.is_empty() {
                parts.push(ContentPart::new(text, part_kind));
            }
        }
        Value::Array(items) => {
            if extract_content_recursive(items, part_kind, &mut parts) {
                return VendorParse::finished(next_kind);
            }
        }
        Value::Object(obj) => {
            let response = obj
                .get("response")
                .and_then(Value::as_object)
                .unwrap_or(obj);
            if let Some(fragments) = response.get("fragments").and_then(Value::as_array) {
                for fragment in fragments.iter().filter_map(Value::as_object) {
                    let content = str_field(fragment, "content");
                    match PartKind::from_fragment_type(str_field(fragment, "type")) {
                        Some(kind) => {
                            next_kind = kind;
                            if !content.is_empty() {
                                parts.push(ContentPart::new(content, kind));
                            }
                        }
                        None if !content.is_empty() => {
                            parts.push(ContentPart::new(content, part_kind));
                        }
                        None => {}
                    }
                }
            }
        }
        _ => {}
    }

    VendorParse {
        parts,
        finished: false,
        next_kind,
    }
}

/// Walk an array of nested patches. Returns `true` when one of them carries
/// the finished status, in which case collected parts are discarded.
fn extract_content_recursive(items: &[Value], default_kind: PartKind, out: &mut ContentParts) -> bool {
    let mut collected = ContentParts::new();
    for item in items.iter().filter_map(Value::as_object) {
        let Some(item_value) = item.get("v") else {
            continue;
        };
        let item_path = str_field(item, "p");
        if item_path == "status" && item_value.as_str() == Some(FINISHED) {
            return true;
        }
        if should_skip_path(item_path) {
            continue;
        }

        let content = str_field(item, "content");
        if !content.is_empty() {
            let kind = PartKind::from_fragment_type(str_field(item, "type")).unwrap_or(default_kind);
            collected.push(ContentPart::new(content, kind));
            continue;
        }

        let kind = if item_path.contains("thinking") {
            PartKind::Thinking
        } else if item_path.contains("content") || item_path == "response" || item_path == "fragments"
        {
            PartKind::Final
        } else {
            default_kind
        };

        match item_value {
            Value::String(text) if !text.is_empty() && text != FINISHED => {
                collected.push(ContentPart::new(text, kind));
            }
            Value::Array(inner) => {
                for entry in inner {
                    match entry {
                        Value::Object(obj) => {
                            let text = str_field(obj, "content");
                            if text.is_empty() {
                                continue;
                            }
                            let entry_kind =
                                PartKind::from_fragment_type(str_field(obj, "type")).unwrap_or(kind);
                            collected.push(ContentPart::new(text, entry_kind));
                        }
                        Value::String(text) if !text.is_empty() => {
                            collected.push(ContentPart::new(text, kind));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    out.extend(collected);
    false
}
