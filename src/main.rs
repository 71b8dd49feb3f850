//! esm-proxy
//!
//! Reverse proxy for an ES module CDN: rewrites module URLs to the proxy,
//! converts modules through a pooled transform engine and caches results.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ http::server ──▶ http::pipeline ──▶ origin (resolve, rewrite)
//!                                   │
//!                                   ├──▶ cache (pooled store connections)
//!                                   ├──▶ http::upstream ──▶ CDN
//!                                   ├──▶ build (pooled transform workers)
//!                                   └──▶ http::fast_path (redirects via cache)
//!
//!   Cross-cutting: config, observability, lifecycle
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use esm_proxy::cache::MemoryStore;
use esm_proxy::config::load_config;
use esm_proxy::lifecycle::{signals, startup, Shutdown};
use esm_proxy::observability::{logging, metrics};
use esm_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "esm-proxy", version, about = "Reverse proxy for an ES module CDN")]
struct Args {
    /// TOML configuration file; defaults plus environment when omitted.
    #[arg(short, long, env = "ESM_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "esm-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        base_path = %config.proxy.base_path,
        upstream = %config.proxy.upstream_origin,
        cache_enabled = config.cache.enabled,
        workers_enabled = config.worker.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let transform = startup::transform_from_config(&config.worker);
    let listener = startup::bind(&config.listener).await?;
    let server = HttpServer::new(config, Arc::new(MemoryStore::new()), transform)?;

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown.clone());

    server.run(listener, shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
