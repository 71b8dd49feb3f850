//! Redirect fast path.
//!
//! # Algorithm
//! ```text
//! r0 = pipeline(request)
//! while r_i is a redirect into our mount and hops < max:
//!     r_{i+1} = pipeline(GET Location)
//! unwind from the last hop:
//!     resolved = client_view(r_k)
//!     for i in k-1..0:
//!         resolved = resolved if resolved came from cache
//!                    else client_view(r_i)
//! ```
//!
//! A redirect answered from cache is replaced by its destination; any hop
//! that needed upstream makes the client follow the redirect itself.

use std::future::Future;
use std::time::Duration;

use axum::http::header::{AGE, CACHE_CONTROL};
use axum::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::TtlPolicy;
use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::http::pipeline::{ProxyRequest, ProxyResponse, Source};

#[derive(Debug, Clone)]
pub struct FastPath {
    enabled: bool,
    max_hops: usize,
    client_ttl: Option<Duration>,
}

impl FastPath {
    pub fn new(config: &UpstreamConfig, policy: &TtlPolicy) -> Self {
        Self {
            enabled: config.redirect_fastpath,
            max_hops: config.max_redirect_hops as usize,
            client_ttl: policy.client_redirect_ttl,
        }
    }

    /// Resolve `first` through `fetch`, which runs one pipeline pass.
    ///
    /// `public_url` is the URL the client addressed; only redirects into
    /// the same origin under `mount` are followed.
    pub async fn resolve<F, Fut>(
        &self,
        request: &ProxyRequest,
        public_url: &Url,
        mount: &str,
        first: ProxyResponse,
        cancel: &CancellationToken,
        mut fetch: F,
    ) -> Result<ProxyResponse, ProxyError>
    where
        F: FnMut(ProxyRequest) -> Fut,
        Fut: Future<Output = Result<ProxyResponse, ProxyError>>,
    {
        let mut chain = Vec::new();
        let mut current = first;
        let mut base = public_url.clone();

        while self.enabled
            && chain.len() < self.max_hops
            && current.is_redirect()
            && current.source != Source::Local
        {
            let Some(next_url) = current
                .location()
                .and_then(|location| follow_target(location, &base, mount))
            else {
                break;
            };
            if cancel.is_cancelled() {
                return Err(ProxyError::Aborted);
            }

            tracing::debug!(hop = chain.len() + 1, location = %next_url, "Resolving redirect");
            let next = match fetch(request.redirected(next_url.clone())).await {
                Ok(next) => next,
                Err(ProxyError::Aborted) => return Err(ProxyError::Aborted),
                Err(e) => {
                    tracing::warn!(location = %next_url, error = %e, "Redirect hop failed, returning redirect");
                    break;
                }
            };
            chain.push(current);
            current = next;
            base = next_url;
        }

        let mut resolved = self.client_view(current);
        while let Some(redirect) = chain.pop() {
            if resolved.source != Source::Cache {
                resolved = self.client_view(redirect);
            }
        }
        Ok(resolved)
    }

    /// Apply the client redirect TTL to a redirect going back to a client.
    /// Stored entries are never touched.
    pub fn client_view(&self, mut response: ProxyResponse) -> ProxyResponse {
        let Some(ttl) = self.client_ttl else {
            return response;
        };
        if response.is_redirect() && response.source != Source::Local {
            let value = format!("public, max-age={}", ttl.as_secs());
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers.insert(CACHE_CONTROL, value);
            }
            response.headers.remove(AGE);
        }
        response
    }
}

/// Absolute URL of `location` if it stays on `base`'s origin under `mount`.
fn follow_target(location: &str, base: &Url, mount: &str) -> Option<Url> {
    let url = base.join(location).ok()?;
    if url.origin() != base.origin() {
        return None;
    }
    let path = url.path();
    let inside = mount == "/"
        || path == mount
        || path
            .strip_prefix(mount)
            .is_some_and(|rest| rest.starts_with('/'));
    inside.then_some(url)
}
