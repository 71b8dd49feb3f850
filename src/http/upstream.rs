//! Upstream CDN client.

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use reqwest::redirect::Policy;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::error::ProxyError;
use crate::http::headers;
use crate::observability::metrics;
use crate::origin::BuildTarget;

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    real_origin_header: String,
}

impl UpstreamClient {
    /// Redirects are returned to the pipeline, never followed here.
    pub fn new(real_origin_header: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            client,
            real_origin_header: real_origin_header.to_ascii_lowercase(),
        })
    }

    pub async fn fetch(
        &self,
        method: &Method,
        url: Url,
        inbound: &HeaderMap,
        target: BuildTarget,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse, ProxyError> {
        let span = tracing::debug_span!("upstream", url = %url, method = %method);
        let headers = headers::upstream_request(inbound, &self.real_origin_header, target);

        let mut request = self.client.request(method.clone(), url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        let exchange = async move {
            let response = request.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(UpstreamResponse { status, headers, body })
        };

        tokio::select! {
            result = exchange.instrument(span) => {
                let response = result?;
                tracing::debug!(status = response.status.as_u16(), bytes = response.body.len(), "Upstream responded");
                metrics::record_upstream(response.status.as_u16());
                Ok(response)
            }
            _ = cancel.cancelled() => Err(ProxyError::Aborted),
        }
    }
}
