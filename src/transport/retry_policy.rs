use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;
use http::{HeaderMap, StatusCode};

pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF_BASE_MS: u64 = 100;
const RETRY_BACKOFF_MAX_MS: u64 = 1_000;
const RETRY_AFTER_MAX_SECS: u64 = 30;
const RETRY_FAST_SECOND_MS: u64 = 10;

/// Transport failures where the connection died under us; retried almost
/// immediately.
const CONNECTION_LOST: [&str; 5] = [
    "connection reset",
    "connection aborted",
    "broken pipe",
    "unexpected eof",
    "stream closed",
];

/// Transport failures worth a backed-off retry.
const TRANSIENT: [&str; 3] = ["timed out", "timeout", "connection refused"];

#[inline]
pub(crate) fn should_retry_upstream_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 503 | 529)
}

#[inline]
pub(crate) fn should_retry_transport_message(message: &str) -> bool {
    is_connection_lost(message) || contains_any(message, &TRANSIENT)
}

pub(crate) fn retry_transport_delay(message: &str, attempt: u32) -> Duration {
    if !is_connection_lost(message) {
        return retry_backoff_delay(attempt);
    }
    if attempt == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(RETRY_FAST_SECOND_MS)
    }
}

#[inline]
fn is_connection_lost(message: &str) -> bool {
    contains_any(message, &CONNECTION_LOST)
}

fn contains_any(message: &str, needles: &[&str]) -> bool {
    let haystack = message.to_ascii_lowercase();
    needles.iter().any(|needle| haystack.contains(needle))
}

pub(crate) fn retry_backoff_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.min(10);
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(multiplier)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}

/// Delay before retrying a response with a retriable status: `Retry-After`
/// when present, exponential backoff otherwise.
pub(crate) fn retry_delay(headers: &HeaderMap, attempt: u32) -> Duration {
    parse_retry_after_delay(headers).unwrap_or_else(|| retry_backoff_delay(attempt))
}

/// Parse `Retry-After` as delta-seconds or an HTTP date, capped at 30s.
pub(crate) fn parse_retry_after_delay(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    let cap = Duration::from_secs(RETRY_AFTER_MAX_SECS);
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(cap));
    }
    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn retry_after(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_should_retry_upstream_status() {
        assert!(should_retry_upstream_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_upstream_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(should_retry_upstream_status(StatusCode::from_u16(529).unwrap()));
        assert!(!should_retry_upstream_status(StatusCode::BAD_REQUEST));
        assert!(!should_retry_upstream_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_parse_retry_after_seconds_is_capped() {
        assert_eq!(parse_retry_after_delay(&retry_after("5")), Some(Duration::from_secs(5)));
        assert_eq!(
            parse_retry_after_delay(&retry_after("3600")),
            Some(Duration::from_secs(RETRY_AFTER_MAX_SECS))
        );
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let target = SystemTime::now() + Duration::from_secs(2);
        let delay = parse_retry_after_delay(&retry_after(&httpdate::fmt_http_date(target))).unwrap();
        assert!(delay <= Duration::from_secs(2));
    }

    #[test]
    fn test_parse_retry_after_invalid_falls_back_to_backoff() {
        let headers = retry_after("not-a-delay");
        assert!(parse_retry_after_delay(&headers).is_none());
        assert_eq!(retry_delay(&headers, 1), Duration::from_millis(200));
    }

    #[test]
    fn test_transport_message_classification() {
        assert!(should_retry_transport_message("Connection reset by peer"));
        assert!(should_retry_transport_message("operation timed out"));
        assert!(!should_retry_transport_message("invalid certificate"));
    }

    #[test]
    fn test_retry_transport_delay() {
        assert_eq!(retry_transport_delay("broken pipe", 0), Duration::ZERO);
        assert_eq!(
            retry_transport_delay("unexpected EOF while reading", 1),
            Duration::from_millis(RETRY_FAST_SECOND_MS)
        );
        assert_eq!(retry_transport_delay("timed out", 0), retry_backoff_delay(0));
        assert_eq!(retry_backoff_delay(20), Duration::from_millis(RETRY_BACKOFF_MAX_MS));
    }
}
