//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the mount point
//! - Wire up middleware (tracing, request ID)
//! - Turn inbound requests into pipeline runs with a cancellation token
//! - Serve the purge and status endpoints
//! - Start pool maintenance and shut everything down in order

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{Form, FromRequest, Multipart, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::build::{BuildService, Transform};
use crate::cache::{Cache, CacheStore};
use crate::config::{PoolConfig, ProxyConfig};
use crate::error::StartupError;
use crate::http::pipeline::{Pipeline, ProxyRequest};
use crate::observability::metrics;
use crate::pool::{run_reaper, PoolStatus};

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub max_body_bytes: usize,
}

/// Body of `GET {base}/_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub name: String,
    pub version: String,
    pub cache_enabled: bool,
    pub cache_pool: PoolStatus,
    /// Absent when transforms run on the blocking pool.
    pub build_pool: Option<PoolStatus>,
}

#[derive(Debug, Deserialize)]
struct PurgeForm {
    url: String,
}

#[derive(Debug, Serialize)]
struct PurgeReport {
    url: String,
    removed: usize,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    pipeline: Arc<Pipeline>,
}

impl HttpServer {
    /// Assemble cache, build service and pipeline around the given backends.
    pub fn new(
        config: ProxyConfig,
        store: Arc<dyn CacheStore>,
        transform: Arc<dyn Transform>,
    ) -> Result<Self, StartupError> {
        let cache = Arc::new(Cache::new(store, &config.cache));
        let builds = Arc::new(BuildService::new(transform, &config.worker));
        let pipeline = Arc::new(Pipeline::new(&config.proxy, cache, builds)?);

        let state = AppState {
            pipeline: pipeline.clone(),
            max_body_bytes: config.listener.max_body_bytes,
        };
        let router = Self::build_router(pipeline.resolver().base_path(), state);

        Ok(Self {
            router,
            config,
            pipeline,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(base_path: &str, state: AppState) -> Router {
        let routes = if base_path == "/" {
            Router::new()
                .route("/_purge", post(purge).fallback(proxy))
                .route("/_status", get(status).fallback(proxy))
                .fallback(proxy)
        } else {
            Router::new()
                .route(base_path, any(proxy))
                .route(&format!("{base_path}/"), any(proxy))
                .route(&format!("{base_path}/_purge"), post(purge).fallback(proxy))
                .route(&format!("{base_path}/_status"), get(status).fallback(proxy))
                .route(&format!("{base_path}/{{*path}}"), any(proxy))
                .fallback(not_found)
        };

        routes.with_state(state).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(X_REQUEST_ID)),
        )
    }

    /// The router, for serving or driving directly in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve until `shutdown` fires, then flush cache writes, drain both
    /// pools and close the store.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, base_path = %self.pipeline.resolver().base_path(), "HTTP server starting");

        self.start_background(&shutdown);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        self.pipeline.flush_writes().await;
        self.pipeline.builds().shutdown();
        self.pipeline.cache().shutdown().await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Warm pools and spawn the reapers and the gauge sampler. The cache
    /// reaper also sweeps expired entries out of the store.
    fn start_background(&self, shutdown: &broadcast::Receiver<()>) {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.cache().pool().warm().await {
                tracing::warn!(error = %e, "Failed to warm cache pool");
            }
            if let Err(e) = pipeline.builds().warm().await {
                tracing::warn!(error = %e, "Failed to warm build pool");
            }
        });

        let cache = self.pipeline.cache().clone();
        spawn_reaper("cache", &self.config.cache.pool, shutdown, move |idle| {
            cache.sweep_expired();
            cache.pool().evict(idle)
        });

        if self.config.worker.enabled {
            let builds = self.pipeline.builds().clone();
            spawn_reaper("build", &self.config.worker.pool, shutdown, move |idle| {
                builds.evict(idle)
            });
        }

        if self.config.observability.metrics_enabled {
            let pipeline = self.pipeline.clone();
            let interval = Duration::from_secs(self.config.observability.pool_sample_interval_secs.max(1));
            tokio::spawn(metrics::run_pool_sampler(
                interval,
                move || {
                    let mut pools = vec![("cache", pipeline.cache().pool_status())];
                    if let Some(build) = pipeline.builds().pool_status() {
                        pools.push(("build", build));
                    }
                    pools
                },
                shutdown.resubscribe(),
            ));
        }
    }
}

fn spawn_reaper<F>(
    name: &'static str,
    config: &PoolConfig,
    shutdown: &broadcast::Receiver<()>,
    evict: F,
) where
    F: Fn(Duration) -> usize + Send + 'static,
{
    tokio::spawn(run_reaper(
        name,
        Duration::from_secs(config.evict_interval_secs.max(1)),
        Duration::from_secs(config.idle_timeout_secs),
        evict,
        shutdown.resubscribe(),
    ));
}

/// Main proxy handler.
async fn proxy(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();

    let Some(url) = request_url(&parts) else {
        metrics::record_request(method.as_str(), 400, start);
        return (StatusCode::BAD_REQUEST, "Invalid request URL").into_response();
    };

    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Failed to read request body");
            metrics::record_request(method.as_str(), 413, start);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    // Cancels the pipeline when the client goes away and this future is dropped.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let request = ProxyRequest {
        method: method.clone(),
        url,
        headers: parts.headers,
        body,
    };
    let response = match state.pipeline.handle(request, &cancel).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::warn!(error = %e, status = e.status().as_u16(), "Request failed");
            e.into_response()
        }
    };
    guard.disarm();

    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

/// `POST {base}/_purge` with field `url`, form-encoded or multipart.
async fn purge(State(state): State<AppState>, request: Request<Body>) -> Response {
    let Some(target) = purge_target(request, &state).await else {
        return (StatusCode::BAD_REQUEST, "Missing form field: url").into_response();
    };
    let Ok(url) = Url::parse(target.trim()) else {
        return (StatusCode::BAD_REQUEST, "Invalid url").into_response();
    };

    match state.pipeline.cache().purge(&url).await {
        Ok(removed) => Json(PurgeReport {
            url: url.into(),
            removed,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(url = %url, error = %e, "Purge failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Purge failed").into_response()
        }
    }
}

/// The `url` field of a purge body, or `None` if it is missing or unreadable.
async fn purge_target(request: Request<Body>, state: &AppState) -> Option<String> {
    let multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"));

    if !multipart {
        let Form(form) = Form::<PurgeForm>::from_request(request, state).await.ok()?;
        return Some(form.url);
    }

    let mut fields = Multipart::from_request(request, state).await.ok()?;
    while let Ok(Some(field)) = fields.next_field().await {
        if field.name() == Some("url") {
            return field.text().await.ok();
        }
    }
    None
}

/// `GET {base}/_status`.
async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    let cache = state.pipeline.cache();
    Json(StatusReport {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_enabled: cache.policy().enabled,
        cache_pool: cache.pool_status(),
        build_pool: state.pipeline.builds().pool_status(),
    })
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Absolute URL of an inbound request, from its URI or `Host` header.
fn request_url(parts: &Parts) -> Option<Url> {
    let host = match parts.uri.authority() {
        Some(authority) => authority.as_str(),
        None => parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost"),
    };
    let scheme = parts.uri.scheme_str().unwrap_or("http");
    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    Url::parse(&format!("{scheme}://{host}{path}")).ok()
}
