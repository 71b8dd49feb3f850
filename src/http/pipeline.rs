//! Per-request pipeline.
//!
//! # State Machine
//! ```text
//! resolve origin
//!   ├─ empty upstream path        → 302 homepage
//!   ├─ .map with caching disabled → 404
//!   └─ cache lookup (GET, caching enabled)
//!        ├─ hit  → response from cache
//!        └─ miss → upstream fetch
//!                    ├─ raw / HEAD / non-script / non-2xx → passthrough rewrite
//!                    └─ script                            → transform, rewrite, map sibling
//!                  → build response → cache writes (background)
//! → redirect fast path
//! ```

use std::sync::Arc;

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use url::Url;

use crate::build::{BuildService, SourceMap, TransformError, TransformInput, TransformOptions, TransformOutput};
use crate::cache::{is_redirect, Cache, CacheEntry, CacheKey};
use crate::config::UpstreamConfig;
use crate::error::{ProxyError, StartupError};
use crate::http::fast_path::FastPath;
use crate::http::headers;
use crate::http::upstream::{UpstreamClient, UpstreamResponse};
use crate::origin::{OriginResolver, RequestContext};

/// An inbound request with its body buffered.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// URL as received by the proxy.
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn get(url: Url, headers: HeaderMap) -> Self {
        Self {
            method: Method::GET,
            url,
            headers,
            body: Bytes::new(),
        }
    }

    /// GET for a redirect target, keeping the original headers.
    pub fn redirected(&self, url: Url) -> Self {
        Self::get(url, self.headers.clone())
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Upstream,
    /// Produced by the proxy itself.
    Local,
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: Source,
}

impl ProxyResponse {
    pub fn redirect(location: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(location) {
            headers.insert(LOCATION, value);
        }
        Self {
            status: StatusCode::FOUND,
            headers,
            body: Bytes::new(),
            source: Source::Local,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"Not Found"),
            source: Source::Local,
        }
    }

    fn from_entry(entry: CacheEntry) -> Self {
        Self {
            status: entry.status(),
            headers: entry.client_headers(),
            body: entry.body,
            source: Source::Cache,
        }
    }

    pub fn is_redirect(&self) -> bool {
        is_redirect(self.status)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION)?.to_str().ok()
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Response built from an upstream answer, plus the generated source map.
struct Rendered {
    response: ProxyResponse,
    map: Option<Bytes>,
}

pub struct Pipeline {
    resolver: OriginResolver,
    upstream: UpstreamClient,
    cache: Arc<Cache>,
    builds: Arc<BuildService>,
    fast_path: FastPath,
    homepage: String,
    banner: Option<String>,
    writes: TaskTracker,
}

impl Pipeline {
    pub fn new(
        config: &UpstreamConfig,
        cache: Arc<Cache>,
        builds: Arc<BuildService>,
    ) -> Result<Self, StartupError> {
        Ok(Self {
            resolver: OriginResolver::new(config)?,
            upstream: UpstreamClient::new(&config.real_origin_header)?,
            fast_path: FastPath::new(config, cache.policy()),
            homepage: config.homepage.clone(),
            banner: config.output_banner.clone(),
            cache,
            builds,
            writes: TaskTracker::new(),
        })
    }

    pub fn resolver(&self) -> &OriginResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn builds(&self) -> &Arc<BuildService> {
        &self.builds
    }

    /// Wait for every cache write spawned so far.
    pub async fn flush_writes(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Run the full pipeline for one request, including the redirect fast path.
    pub async fn handle(
        &self,
        request: ProxyRequest,
        cancel: &CancellationToken,
    ) -> Result<ProxyResponse, ProxyError> {
        let ctx = self.resolver.resolve(request.url.clone(), &request.headers);
        let public_url = ctx.public_url.clone();
        let span = tracing::info_span!(
            "pipeline",
            method = %request.method,
            url = %public_url,
            target = %ctx.target,
        );

        async {
            let response = self.serve(ctx, &request, cancel).await?;
            if request.method != Method::GET {
                return Ok(self.fast_path.client_view(response));
            }

            let mount = self.resolver.base_path();
            self.fast_path
                .resolve(&request, &public_url, mount, response, cancel, move |next| async move {
                    let ctx = self.resolver.resolve(next.url.clone(), &next.headers);
                    self.serve(ctx, &next, cancel).await
                })
                .instrument(tracing::debug_span!("fast_path"))
                .await
        }
        .instrument(span)
        .await
    }

    /// One pass without the fast path.
    async fn serve(
        &self,
        ctx: RequestContext,
        request: &ProxyRequest,
        cancel: &CancellationToken,
    ) -> Result<ProxyResponse, ProxyError> {
        let Some(upstream_url) = ctx.upstream_url.clone() else {
            tracing::debug!(homepage = %self.homepage, "Empty upstream path");
            return Ok(ProxyResponse::redirect(&self.homepage));
        };

        let caching = self.cache.policy().enabled;
        if ctx.map_request && !caching {
            return Ok(ProxyResponse::not_found());
        }

        let key = (caching && request.method == Method::GET)
            .then(|| CacheKey::new(&ctx.public_url, ctx.target));
        if let Some(key) = &key {
            if let Some(entry) = self.cache.lookup(key).await {
                tracing::debug!(status = entry.status, "Cache hit");
                return Ok(ProxyResponse::from_entry(entry));
            }
        }

        let upstream = self
            .upstream
            .fetch(
                &request.method,
                upstream_url,
                &request.headers,
                ctx.target,
                request.body.clone(),
                cancel,
            )
            .await?;

        let rendered = self.render(&ctx, &request.method, upstream, cancel).await?;
        if let Some(key) = key {
            self.persist(key, &ctx, &rendered);
        }
        Ok(rendered.response)
    }

    async fn render(
        &self,
        ctx: &RequestContext,
        method: &Method,
        upstream: UpstreamResponse,
        cancel: &CancellationToken,
    ) -> Result<Rendered, ProxyError> {
        let headers = headers::client_response(&upstream.headers, &ctx.rewriter);
        // HEAD responses carry no source to transform
        let transform = *method != Method::HEAD
            && !ctx.raw
            && upstream.status.is_success()
            && headers::is_script(&upstream.headers);

        let (body, map) = if transform {
            let output = self.transform(ctx, upstream.body, cancel).await?;
            let map = output.map.map(|map| Bytes::from(ctx.rewriter.rewrite(&map)));
            (Bytes::from(ctx.rewriter.rewrite(&output.code)), map)
        } else {
            (passthrough_body(ctx, &upstream.headers, upstream.body), None)
        };

        Ok(Rendered {
            response: ProxyResponse {
                status: upstream.status,
                headers,
                body,
                source: Source::Upstream,
            },
            map,
        })
    }

    async fn transform(
        &self,
        ctx: &RequestContext,
        source: Bytes,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, ProxyError> {
        let code = String::from_utf8(source.to_vec())
            .map_err(|_| TransformError::Failed("module source is not valid UTF-8".into()))?;

        let caching = self.cache.policy().enabled;
        let options = TransformOptions {
            banner: self.banner.clone(),
            sourcemap: if caching { SourceMap::External } else { SourceMap::Inline },
            sourcemap_file_name: caching.then(|| map_file_name(&ctx.public_url)),
        };
        let input = TransformInput {
            code,
            source_url: ctx.public_url.to_string(),
            options,
        };

        let output = self
            .builds
            .transform(input, cancel)
            .instrument(tracing::debug_span!("transform"))
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Transform failed"))?;
        Ok(output)
    }

    /// Spawn the cache writes for a rendered response. Never blocks the response.
    fn persist(&self, key: CacheKey, ctx: &RequestContext, rendered: &Rendered) {
        let policy = self.cache.policy();
        let response = &rendered.response;
        if !policy.should_store(response.status) {
            return;
        }

        let entry = CacheEntry::from_parts(
            ctx.public_url.as_str(),
            response.status,
            &response.headers,
            response.body.clone(),
        );
        let map = rendered
            .map
            .clone()
            .zip(key.map_sibling())
            .map(|(body, map_key)| {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
                if let Ok(value) = HeaderValue::from_str(&policy.map_cache_control()) {
                    headers.insert(CACHE_CONTROL, value);
                }
                headers::ensure_timing_allow_origin(&mut headers);
                let entry = CacheEntry::from_parts(&map_key.url, StatusCode::OK, &headers, body);
                (map_key, entry)
            });

        let cache = self.cache.clone();
        self.writes.spawn(async move {
            cache.store(key, entry).await;
        });
        if let Some((map_key, map_entry)) = map {
            let cache = self.cache.clone();
            self.writes.spawn(async move {
                cache.store(map_key, map_entry).await;
            });
        }
    }
}

/// Rewrite textual bodies; anything else is returned untouched.
fn passthrough_body(ctx: &RequestContext, headers: &HeaderMap, body: Bytes) -> Bytes {
    if !headers::is_textual(headers) {
        return body;
    }
    match std::str::from_utf8(&body) {
        Ok(text) => Bytes::from(ctx.rewriter.rewrite(text)),
        Err(_) => body,
    }
}

/// Last path segment plus `.map`.
fn map_file_name(url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("index.js");
    format!("{name}.map")
}
