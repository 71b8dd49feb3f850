//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Upstream, mount point and fast-path settings.
    pub proxy: UpstreamConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Build worker settings.
    pub worker: WorkerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum inbound request body forwarded upstream, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Upstream and mount point configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Path prefix the proxy is mounted under.
    pub base_path: String,

    /// Origin of the ES module CDN (may carry a path prefix).
    pub upstream_origin: String,

    /// Where requests for the bare mount point are redirected.
    pub homepage: String,

    /// Trusted header carrying the public origin set by a fronting proxy.
    pub real_origin_header: String,

    /// Resolve redirects through the cache before answering.
    pub redirect_fastpath: bool,

    /// Upper bound on redirect hops chased by the fast path.
    pub max_redirect_hops: u32,

    /// Banner prepended to transformed output.
    pub output_banner: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_path: "/".to_string(),
            upstream_origin: "https://esm.sh".to_string(),
            homepage: "https://esm.sh".to_string(),
            real_origin_header: "x-real-origin".to_string(),
            redirect_fastpath: true,
            max_redirect_hops: 8,
            output_banner: None,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,

    /// TTL in seconds for responses without `Cache-Control: max-age`.
    pub default_ttl_secs: u64,

    /// TTL in seconds for persisted redirects. Redirects are not cached when unset.
    pub redirect_ttl_secs: Option<u64>,

    /// `max-age` sent to clients on redirects, overriding upstream's value.
    pub client_redirect_ttl_secs: Option<u64>,

    /// TTL in seconds for generated source map artifacts.
    pub map_ttl_secs: u64,

    /// Store connection pool.
    pub pool: PoolConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 600,
            redirect_ttl_secs: Some(600),
            client_redirect_ttl_secs: None,
            map_ttl_secs: 31_536_000,
            pool: PoolConfig {
                min: 1,
                max: 16,
                ..PoolConfig::default()
            },
        }
    }
}

/// Build worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Run transforms on dedicated worker threads.
    pub enabled: bool,

    /// External transform command (program followed by arguments).
    /// When unset, output is passed through with only the banner applied.
    pub command: Option<Vec<String>>,

    /// Worker pool.
    pub pool: PoolConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            pool: PoolConfig::default(),
        }
    }
}

/// Bounds and eviction policy for a resource pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Resources kept alive even when idle.
    pub min: usize,

    /// Maximum live resources; acquirers wait beyond this.
    pub max: usize,

    /// Idle time in seconds after which surplus resources are destroyed.
    pub idle_timeout_secs: u64,

    /// Interval in seconds between eviction passes.
    pub evict_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 4,
            idle_timeout_secs: 300,
            evict_interval_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Interval in seconds between pool gauge samples.
    pub pool_sample_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            pool_sample_interval_secs: 15,
        }
    }
}
