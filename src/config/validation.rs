//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate URLs, addresses and pool bounds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{PoolConfig, ProxyConfig};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream_origin `{0}` must be an absolute http(s) URL")]
    UpstreamOrigin(String),

    #[error("homepage `{0}` must be an absolute URL")]
    Homepage(String),

    #[error("bind address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("{pool} pool: {reason}")]
    PoolBounds { pool: &'static str, reason: &'static str },

    #[error("max_redirect_hops must be at least 1")]
    RedirectHops,
}

/// Check a loaded configuration, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.proxy.upstream_origin) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
        _ => errors.push(ValidationError::UpstreamOrigin(
            config.proxy.upstream_origin.clone(),
        )),
    }

    if Url::parse(&config.proxy.homepage).is_err() {
        errors.push(ValidationError::Homepage(config.proxy.homepage.clone()));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    check_pool("cache", &config.cache.pool, &mut errors);
    check_pool("build", &config.worker.pool, &mut errors);

    if config.proxy.max_redirect_hops == 0 {
        errors.push(ValidationError::RedirectHops);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_pool(pool: &'static str, config: &PoolConfig, errors: &mut Vec<ValidationError>) {
    if config.max == 0 {
        errors.push(ValidationError::PoolBounds {
            pool,
            reason: "max must be at least 1",
        });
    }
    if config.min > config.max {
        errors.push(ValidationError::PoolBounds {
            pool,
            reason: "min must not exceed max",
        });
    }
}
