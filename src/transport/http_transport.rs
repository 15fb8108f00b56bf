use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::GatewayError;

use super::retry_policy::{
    retry_delay, retry_transport_delay, should_retry_transport_message,
    should_retry_upstream_status, RETRY_MAX_ATTEMPTS,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    use_env_proxy: bool,
) -> Result<reqwest::Client, GatewayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

fn parse_endpoint(field: &str, raw: &str) -> Result<url::Url, GatewayError> {
    url::Url::parse(raw.trim())
        .map_err(|err| GatewayError::Config(format!("upstream.{field} is not a valid URL: {err}")))
}

/// How long a call may take before the gateway gives up on it.
#[derive(Debug, Clone, Copy)]
enum Deadline {
    /// Whole exchange including the response body.
    Whole,
    /// Until response headers arrive; the body is read as a stream.
    Headers,
}

/// HTTP client for the three upstream endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    prepare_url: url::Url,
    completion_url: url::Url,
    delegate_url: url::Url,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Build the pooled client and parse the configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for an unparseable endpoint URL and
    /// [`GatewayError::Transport`] when the client cannot be built.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, GatewayError> {
        let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            server.http_use_env_proxy,
        )?;
        Ok(Self {
            client,
            prepare_url: parse_endpoint("prepare_url", &upstream.prepare_url)?,
            completion_url: parse_endpoint("completion_url", &upstream.completion_url)?,
            delegate_url: parse_endpoint("delegate_url", &upstream.delegate_url)?,
            request_timeout: Duration::from_secs(server.timeout.max(1)),
        })
    }

    /// POST the client request to the preparation endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the request fails after retries.
    pub async fn prepare(&self, headers: &HeaderMap, body: Bytes) -> Result<reqwest::Response, GatewayError> {
        self.post(&self.prepare_url, headers, body, Deadline::Whole).await
    }

    /// POST the vendor payload to the completion endpoint. The caller reads
    /// the returned body as a stream.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when no response headers arrive
    /// within the request timeout or the request fails after retries.
    pub async fn completion(&self, headers: &HeaderMap, body: Bytes) -> Result<reqwest::Response, GatewayError> {
        self.post(&self.completion_url, headers, body, Deadline::Headers).await
    }

    /// Forward a non-streaming request unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the request fails after retries.
    pub async fn delegate(&self, headers: &HeaderMap, body: Bytes) -> Result<reqwest::Response, GatewayError> {
        self.post(&self.delegate_url, headers, body, Deadline::Whole).await
    }

    async fn post(
        &self,
        url: &url::Url,
        headers: &HeaderMap,
        body: Bytes,
        deadline: Deadline,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut attempt = 0;
        loop {
            let mut request = reqwest::Request::new(http::Method::POST, url.clone());
            *request.headers_mut() = headers.clone();
            *request.body_mut() = Some(reqwest::Body::from(body.clone()));
            if matches!(deadline, Deadline::Whole) {
                *request.timeout_mut() = Some(self.request_timeout);
            }

            let result = match tokio::time::timeout(self.request_timeout, self.client.execute(request)).await {
                Ok(result) => result.map_err(|err| err.to_string()),
                Err(_) => Err(format!(
                    "timed out after {}s waiting for {}",
                    self.request_timeout.as_secs(),
                    url.path()
                )),
            };

            match result {
                Ok(response) => {
                    if attempt < RETRY_MAX_ATTEMPTS && should_retry_upstream_status(response.status()) {
                        let delay = retry_delay(response.headers(), attempt);
                        tracing::debug!(
                            status = response.status().as_u16(),
                            path = url.path(),
                            retry_attempt = attempt + 1,
                            delay_ms = delay.as_millis(),
                            "retrying upstream request after retriable status"
                        );
                        drop(response);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(message) => {
                    if attempt >= RETRY_MAX_ATTEMPTS || !should_retry_transport_message(&message) {
                        return Err(GatewayError::Transport(message));
                    }

                    let delay = retry_transport_delay(&message, attempt);
                    tracing::debug!(
                        path = url.path(),
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %message,
                        "retrying upstream request after transport error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
