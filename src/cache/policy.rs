//! Cacheability and TTL policy.

use std::time::Duration;

use axum::http::StatusCode;

use crate::cache::entry::{max_age, CacheEntry};
use crate::config::CacheConfig;

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// 2xx, 403, 404 and redirects may be cached.
pub fn is_cache_eligible(status: StatusCode) -> bool {
    status.is_success()
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::NOT_FOUND
        || is_redirect(status)
}

/// TTL decisions derived from the cache configuration.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub enabled: bool,
    pub default_ttl: Duration,
    pub redirect_ttl: Option<Duration>,
    pub client_redirect_ttl: Option<Duration>,
    pub map_ttl: Duration,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            redirect_ttl: config.redirect_ttl_secs.map(Duration::from_secs),
            client_redirect_ttl: config.client_redirect_ttl_secs.map(Duration::from_secs),
            map_ttl: Duration::from_secs(config.map_ttl_secs),
        }
    }

    /// Whether a response with `status` gets written to the cache.
    pub fn should_store(&self, status: StatusCode) -> bool {
        self.enabled
            && is_cache_eligible(status)
            && (!is_redirect(status) || self.redirect_ttl.is_some())
    }

    /// Prepare `entry` for storage and return its TTL; `None` means do not store.
    ///
    /// A redirect without `cache-control` gets one built from the redirect TTL,
    /// flagged so it never reaches a client.
    pub fn prepare(&self, entry: &mut CacheEntry) -> Option<Duration> {
        if is_redirect(entry.status()) && entry.header("cache-control").is_none() {
            if let Some(ttl) = self.redirect_ttl {
                entry.set_header("cache-control", format!("public, max-age={}", ttl.as_secs()));
                entry.synthesized_cache_control = true;
            }
        }

        let ttl = entry
            .header("cache-control")
            .and_then(max_age)
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);
        (!ttl.is_zero()).then_some(ttl)
    }

    /// `cache-control` value for generated source maps.
    pub fn map_cache_control(&self) -> String {
        format!("public, max-age={}, immutable", self.map_ttl.as_secs())
    }
}
