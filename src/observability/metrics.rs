//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_cache_lookups_total` / `proxy_cache_writes_total` (counter)
//! - `proxy_upstream_requests_total` (counter): upstream fetches by status
//! - `proxy_transform_total` / `proxy_transform_duration_seconds`
//! - `proxy_pool_{size,available,borrowed,pending}` (gauge): sampled per pool
//!
//! # Design Decisions
//! - Pool gauges are polled on a timer; reading counters never mutates a pool
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast;

use crate::pool::PoolStatus;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(result: &'static str) {
    metrics::counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_write(result: &'static str) {
    metrics::counter!("proxy_cache_writes_total", "result" => result).increment(1);
}

pub fn record_upstream(status: u16) {
    metrics::counter!("proxy_upstream_requests_total", "status" => status.to_string())
        .increment(1);
}

pub fn record_transform(result: &'static str, start: Instant) {
    metrics::counter!("proxy_transform_total", "result" => result).increment(1);
    metrics::histogram!("proxy_transform_duration_seconds", "result" => result)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_pool(pool: &'static str, status: &PoolStatus) {
    metrics::gauge!("proxy_pool_size", "pool" => pool).set(status.size as f64);
    metrics::gauge!("proxy_pool_available", "pool" => pool).set(status.available as f64);
    metrics::gauge!("proxy_pool_borrowed", "pool" => pool).set(status.borrowed as f64);
    metrics::gauge!("proxy_pool_pending", "pool" => pool).set(status.pending as f64);
}

/// Poll `sample` every `interval` and export the counters until shutdown.
pub async fn run_pool_sampler<F>(
    interval: Duration,
    sample: F,
    mut shutdown: broadcast::Receiver<()>,
) where
    F: Fn() -> Vec<(&'static str, PoolStatus)> + Send,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (pool, status) in sample() {
                    record_pool(pool, &status);
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
