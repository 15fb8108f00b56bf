use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Token usage reported on the terminal chunk of a streamed completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub completion_tokens_details: CompletionTokensDetails,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompletionTokensDetails {
    pub reasoning_tokens: u64,
}

impl Usage {
    /// Tokens of the final answer, excluding reasoning.
    #[must_use]
    pub fn output_tokens(&self) -> u64 {
        self.completion_tokens - self.completion_tokens_details.reasoning_tokens
    }
}

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`chars / 4`, at least 1 for non-empty text)
/// rather than a model tokenizer.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as u64 / 4).max(1)
}

/// Build usage from the prompt sent upstream and the text streamed back.
#[must_use]
pub fn build_usage(prompt: &str, thinking: &str, output: &str) -> Usage {
    let prompt_tokens = estimate_tokens(prompt);
    let reasoning_tokens = estimate_tokens(thinking);
    let output_tokens = estimate_tokens(output);
    let completion_tokens = reasoning_tokens + output_tokens;
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        completion_tokens_details: CompletionTokensDetails { reasoning_tokens },
    }
}

/// Log token usage for a completed stream at INFO level.
pub fn log_stream_usage(model: &str, usage: &Usage, finish_reason: &str, duration: Duration) {
    info!(
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        reasoning_tokens = usage.completion_tokens_details.reasoning_tokens,
        total_tokens = usage.total_tokens,
        finish_reason = finish_reason,
        duration_seconds = duration.as_secs_f64(),
        "stream completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short_text_is_at_least_one() {
        assert_eq!(estimate_tokens("hi"), 1);
    }

    #[test]
    fn test_estimate_tokens_counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("你好你好你好你好"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 2);
    }

    #[test]
    fn test_build_usage_sums() {
        let usage = build_usage("abcdefgh", "abcd", "abcdefghijkl");
        assert_eq!(usage.prompt_tokens, 2);
        assert_eq!(usage.completion_tokens_details.reasoning_tokens, 1);
        assert_eq!(usage.output_tokens(), 3);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 6);
    }

    #[test]
    fn test_build_usage_empty_is_zero() {
        assert_eq!(build_usage("", "", ""), Usage::default());
    }

    #[test]
    fn test_usage_serializes_nested_details() {
        let json = serde_json::to_value(build_usage("", "abcd", "")).expect("serialize");
        assert_eq!(json["completion_tokens_details"]["reasoning_tokens"], 1);
        assert_eq!(json["completion_tokens"], 1);
    }
}
