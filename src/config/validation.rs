use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if let Some(max_blocking_threads) = server.runtime_max_blocking_threads {
        if max_blocking_threads == 0 {
            return Err(validation_err(
                "server.runtime_max_blocking_threads must be greater than 0 when set",
            ));
        }
    }
    let base_path = server.base_path.trim();
    if !base_path.is_empty() && !base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/'"));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    validate_endpoint_url("prepare_url", &upstream.prepare_url)?;
    validate_endpoint_url("completion_url", &upstream.completion_url)?;
    validate_endpoint_url("delegate_url", &upstream.delegate_url)?;

    if upstream.proof_header.trim().is_empty() {
        return Err(validation_err("upstream.proof_header cannot be empty"));
    }
    if http::HeaderName::from_bytes(upstream.proof_header.trim().as_bytes()).is_err() {
        return Err(validation_err(format!(
            "upstream.proof_header '{}' is not a valid header name",
            upstream.proof_header
        )));
    }
    if upstream.stream_idle_timeout_secs == 0 {
        return Err(validation_err(
            "upstream.stream_idle_timeout_secs must be greater than 0",
        ));
    }

    let static_headers = upstream
        .headers
        .iter()
        .map(|(name, value)| ("headers", name, value))
        .chain(
            upstream
                .prepare_headers
                .iter()
                .map(|(name, value)| ("prepare_headers", name, value)),
        );
    for (field, name, value) in static_headers {
        if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(validation_err(format!(
                "upstream.{field}: '{name}' is not a valid header name"
            )));
        }
        if http::HeaderValue::from_str(value).is_err() {
            return Err(validation_err(format!(
                "upstream.{field}: value of '{name}' is not a valid header value"
            )));
        }
    }
    for name in &upstream.forward_headers {
        if http::HeaderName::from_bytes(name.trim().as_bytes()).is_err() {
            return Err(validation_err(format!(
                "upstream.forward_headers: '{name}' is not a valid header name"
            )));
        }
    }
    Ok(())
}

fn validate_endpoint_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(validation_err(format!(
            "upstream.{field_name} cannot be empty"
        )));
    }
    let parsed = url::Url::parse(value).map_err(|err| {
        validation_err(format!(
            "upstream.{field_name} is not a valid URL: {err}"
        ))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "upstream.{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
