//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST, LOCATION};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use esm_proxy::build::{SourceMap, Transform, TransformError, TransformInput, TransformOptions, TransformOutput};
use esm_proxy::cache::MemoryStore;
use esm_proxy::config::ProxyConfig;
use esm_proxy::http::HttpServer;

pub const PUBLIC_HOST: &str = "proxy.test";
pub const HOMEPAGE: &str = "https://home.test/";

/// Module entry point that redirects to a pinned build.
pub const REDIRECT_PATH: &str = "/react@18.2.0";
pub const MODULE_PATH: &str = "/stable/react@18.2.0/es2022/react.mjs";

#[derive(Clone)]
struct MockState {
    origin: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

/// Programmable ES module CDN on an ephemeral port, counting hits per path.
pub struct MockUpstream {
    pub addr: SocketAddr,
    state: MockState,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = MockState {
            origin: format!("http://{addr}"),
            hits: Arc::new(Mutex::new(HashMap::new())),
        };

        let app = Router::new().fallback(serve_mock).with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn origin(&self) -> String {
        self.state.origin.clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().values().sum()
    }
}

async fn serve_mock(State(state): State<MockState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_default() += 1;
    let origin = &state.origin;

    match path.as_str() {
        REDIRECT_PATH => (
            StatusCode::FOUND,
            [(LOCATION, format!("{origin}{MODULE_PATH}"))],
        )
            .into_response(),
        MODULE_PATH => (
            [
                (CONTENT_TYPE, "application/javascript; charset=utf-8".to_string()),
                (CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
            ],
            format!("export * from \"{origin}/stable/react-dom@18.2.0/es2022/react-dom.mjs\";\n"),
        )
            .into_response(),
        "/broken.mjs" => (
            [(CONTENT_TYPE, "application/javascript")],
            "export default syntax error",
        )
            .into_response(),
        "/style.css" => (
            [(CONTENT_TYPE, "text/css")],
            format!("@import url(\"{origin}/base.css\");"),
        )
            .into_response(),
        "/logo.png" => (
            [(CONTENT_TYPE, "image/png")],
            Bytes::from_static(&[0x89, b'P', b'N', b'G']),
        )
            .into_response(),
        "/slow.mjs" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ([(CONTENT_TYPE, "application/javascript")], "export {}").into_response()
        }
        "/forbidden.mjs" => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        "/echo-headers" => {
            let headers: BTreeMap<String, String> = request
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            Json(headers).into_response()
        }
        _ => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

/// Transform engine that records its calls and emits a fixed loader call.
pub struct RecordingTransform {
    upstream_origin: String,
    calls: AtomicUsize,
    last_options: Mutex<Option<TransformOptions>>,
}

impl RecordingTransform {
    pub fn new(upstream_origin: &str) -> Arc<Self> {
        Arc::new(Self {
            upstream_origin: upstream_origin.to_string(),
            calls: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<TransformOptions> {
        self.last_options.lock().unwrap().clone()
    }
}

impl Transform for RecordingTransform {
    fn transform(
        &self,
        input: &TransformInput,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(input.options.clone());
        if cancel.is_cancelled() {
            return Err(TransformError::Cancelled);
        }
        if input.code.contains("syntax error") {
            return Err(TransformError::Failed("unexpected token".into()));
        }

        let banner = input
            .options
            .banner
            .as_ref()
            .map(|b| format!("{b}\n"))
            .unwrap_or_default();
        let code = format!(
            "{banner}System.register(['/stable/vue@3.3.4/es2022/vue.mjs', \"https://unpkg.com/systemjs/dist/s.js\"], function () {{}});\n// {}",
            input.code.trim_end()
        );
        let map = (input.options.sourcemap == SourceMap::External).then(|| {
            format!(
                "{{\"version\":3,\"sources\":[\"{}/src/index.ts\"]}}",
                self.upstream_origin
            )
        });
        Ok(TransformOutput { code, map })
    }
}

/// Proxy configuration pointing at `upstream`, mounted at `base_path`.
pub fn config(upstream: &MockUpstream, base_path: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.proxy.upstream_origin = upstream.origin();
    config.proxy.base_path = base_path.into();
    config.proxy.homepage = HOMEPAGE.into();
    config.observability.metrics_enabled = false;
    config
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A proxy built around an in-memory store and a recording transform.
pub struct TestProxy {
    pub server: HttpServer,
    pub store: Arc<MemoryStore>,
    pub transform: Arc<RecordingTransform>,
}

impl TestProxy {
    pub fn new(config: ProxyConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let transform = RecordingTransform::new(&config.proxy.upstream_origin);
        let server = HttpServer::new(config, store.clone(), transform.clone()).unwrap();
        Self {
            server,
            store,
            transform,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    /// Drive the router directly; `Host` defaults to [`PUBLIC_HOST`].
    pub async fn send(&self, mut request: Request<Body>) -> TestResponse {
        if !request.headers().contains_key(HOST) {
            request
                .headers_mut()
                .insert(HOST, PUBLIC_HOST.parse().unwrap());
        }
        let response = self.server.router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Wait for background cache writes.
    pub async fn settle(&self) {
        self.server.pipeline().flush_writes().await;
    }
}
