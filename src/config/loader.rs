//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value `{value}` for {name}")]
    Env { name: String, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides, and validate configuration.
///
/// A missing `path` starts from defaults.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply the recognised environment variables on top of `config`.
pub fn apply_env_overrides<I>(config: &mut ProxyConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in vars {
        match name.as_str() {
            "BIND_ADDRESS" => config.listener.bind_address = value,
            "BASE_PATH" => config.proxy.base_path = value,
            "UPSTREAM_ORIGIN" => config.proxy.upstream_origin = value,
            "HOMEPAGE" => config.proxy.homepage = value,
            "OUTPUT_BANNER" => {
                config.proxy.output_banner = (!value.is_empty()).then_some(value)
            }
            "REDIRECT_FASTPATH" => config.proxy.redirect_fastpath = parse_bool(&name, &value)?,
            "MAX_REDIRECT_HOPS" => config.proxy.max_redirect_hops = parse_num(&name, &value)?,
            "CACHE_ENABLE" => config.cache.enabled = parse_bool(&name, &value)?,
            "CACHE_REDIRECT" => config.cache.redirect_ttl_secs = parse_ttl(&name, &value)?,
            "CACHE_CLIENT_REDIRECT" => {
                config.cache.client_redirect_ttl_secs = parse_ttl(&name, &value)?
            }
            "CACHE_CONN_MIN" => config.cache.pool.min = parse_num(&name, &value)?,
            "CACHE_CONN_MAX" => config.cache.pool.max = parse_num(&name, &value)?,
            "WORKER_ENABLE" => config.worker.enabled = parse_bool(&name, &value)?,
            "WORKER_MIN" => config.worker.pool.min = parse_num(&name, &value)?,
            "WORKER_MAX" => config.worker.pool.max = parse_num(&name, &value)?,
            _ => {}
        }
    }
    Ok(())
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::Env {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(name, value))
}

/// Empty clears the TTL.
fn parse_ttl(name: &str, value: &str) -> Result<Option<u64>, ConfigError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    parse_num(name, value).map(Some)
}
