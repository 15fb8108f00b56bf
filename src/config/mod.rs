pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fc::RejectedCallPolicy;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Upstream request timeout in seconds, excluding streamed body reads.
    pub timeout: u64,
    pub http_pool_max_idle_per_host: usize,
    pub http_pool_idle_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_max_blocking_threads: Option<usize>,
    pub base_path: String,
    pub http_use_env_proxy: bool,
}

const DEFAULT_MAX_BLOCKING_THREADS: usize = 8;

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize)]
struct ServerConfigWire {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    runtime_worker_threads: Option<usize>,
    #[serde(default)]
    runtime_max_blocking_threads: Option<usize>,
    #[serde(default)]
    base_path: String,
    #[serde(default)]
    http_use_env_proxy: bool,
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ServerConfigWire::deserialize(deserializer)?;
        Ok(Self {
            port: wire.port,
            host: wire.host,
            timeout: wire.timeout,
            http_pool_max_idle_per_host: wire.http_pool_max_idle_per_host,
            http_pool_idle_timeout_secs: wire.http_pool_idle_timeout_secs,
            runtime_worker_threads: wire.runtime_worker_threads,
            runtime_max_blocking_threads: wire
                .runtime_max_blocking_threads
                .or(Some(DEFAULT_MAX_BLOCKING_THREADS)),
            base_path: wire.base_path,
            http_use_env_proxy: wire.http_use_env_proxy,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: Some(DEFAULT_MAX_BLOCKING_THREADS),
            base_path: String::new(),
            http_use_env_proxy: false,
        }
    }
}

/// Endpoints of the upstream conversational engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Resolves a client request into a session, credentials and payload.
    pub prepare_url: String,
    /// Vendor completion endpoint that returns the event stream.
    pub completion_url: String,
    /// Receives non-streaming requests verbatim.
    pub delegate_url: String,
    #[serde(default = "default_proof_header")]
    pub proof_header: String,
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    /// Static headers sent on every completion call.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Client request headers relayed to the prepare and delegate endpoints.
    #[serde(default = "default_forward_headers")]
    pub forward_headers: Vec<String>,
    /// Static headers sent on every prepare call.
    #[serde(default)]
    pub prepare_headers: BTreeMap<String, String>,
}

fn default_proof_header() -> String {
    "x-ds-pow-response".to_string()
}
fn default_stream_idle_timeout_secs() -> u64 {
    30
}
fn default_forward_headers() -> Vec<String> {
    vec!["authorization".to_string()]
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub enable_tool_sieve: bool,
    #[serde(default = "default_true")]
    pub filter_citations: bool,
    #[serde(default)]
    pub rejected_call_policy: RejectedCallPolicy,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_tool_sieve: true,
            filter_citations: true,
            rejected_call_policy: RejectedCallPolicy::default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
