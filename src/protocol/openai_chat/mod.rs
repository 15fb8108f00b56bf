pub mod stream;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::GatewayError;
use crate::fc::extract_tool_names;

/// The parts of an inbound chat completion request the gateway inspects.
///
/// Everything else in the body is relayed untouched to the preparation step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequestView {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub stream: bool,
    #[serde(default)]
    pub tools: Value,
}

impl ChatRequestView {
    /// Decode the request body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when the body is not a JSON object.
    pub fn parse(body: &[u8]) -> Result<Self, GatewayError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let invalid = || GatewayError::InvalidRequest("invalid json".into());
        let value = serde_json::from_slice::<Value>(body).map_err(|_| invalid())?;
        if !value.is_object() {
            return Err(invalid());
        }
        serde_json::from_value(value).map_err(|_| invalid())
    }

    #[must_use]
    pub fn declares_tools(&self) -> bool {
        self.tools.as_array().is_some_and(|tools| !tools.is_empty())
    }

    /// Names that tool calls in the response may use.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        extract_tool_names(&self.tools)
    }
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Truthiness used for flags that clients send as bools, strings or numbers.
#[must_use]
pub fn value_is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_is_true(&Value::deserialize(deserializer)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inspected_fields() {
        let view = ChatRequestView::parse(
            br#"{"model":" m1 ","stream":true,"messages":[],"tools":[{"type":"function","function":{"name":"search"}}]}"#,
        )
        .expect("parse");
        assert_eq!(view.model.as_deref(), Some("m1"));
        assert!(view.stream);
        assert!(view.declares_tools());
        assert_eq!(view.tool_names(), vec!["search"]);
    }

    #[test]
    fn lenient_field_types() {
        let view = ChatRequestView::parse(br#"{"model":5,"stream":"true","tools":{}}"#).expect("parse");
        assert!(view.model.is_none());
        assert!(view.stream);
        assert!(!view.declares_tools());
    }

    #[test]
    fn empty_body_is_default_and_garbage_is_rejected() {
        let view = ChatRequestView::parse(b"  ").expect("parse");
        assert!(!view.stream);
        assert!(matches!(
            ChatRequestView::parse(b"{nope"),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(ChatRequestView::parse(b"[1]").is_err());
    }

    #[test]
    fn non_object_json_is_rejected() {
        for body in [&br#"["m", true, []]"#[..], &b"\"stream\""[..], &b"42"[..], &b"null"[..]] {
            assert!(matches!(
                ChatRequestView::parse(body),
                Err(GatewayError::InvalidRequest(_))
            ));
        }
    }
}
