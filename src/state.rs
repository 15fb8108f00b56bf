mod request_id;

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::routing::dispatch::normalize_base_path;
use crate::transport::HttpTransport;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    base_path: String,
    request_ids: RequestIdGenerator,
}

impl AppState {
    /// Build state from a validated config.
    ///
    /// # Errors
    ///
    /// Returns an error when the upstream transport cannot be built.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(&config.server, &config.upstream)?;
        Ok(Self {
            base_path: normalize_base_path(&config.server.base_path),
            config,
            transport,
            request_ids: RequestIdGenerator::new(),
        })
    }

    /// Normalized mount prefix, empty when served at the root.
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Fresh id for one inbound request's log records.
    #[must_use]
    pub fn next_request_id(&self) -> uuid::Uuid {
        self.request_ids.next()
    }
}
