//! Per-request origin resolution.
//!
//! # Responsibilities
//! - Normalize the configured upstream origin and base path once
//! - Derive actual, public and upstream URLs for a request
//! - Bind a [`Rewriter`] to the request's public origin
//! - Classify the client and the raw / source map flags

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use regex::Regex;
use url::{Position, Url};

use crate::config::UpstreamConfig;
use crate::origin::rewrite::{origin_pattern, Rewriter};
use crate::origin::target::BuildTarget;

/// Values derived from one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// URL as received by this proxy.
    pub actual_url: Url,
    /// URL as addressed by the client, honouring the trusted origin header.
    pub public_url: Url,
    /// Upstream URL; `None` when the effective path is empty.
    pub upstream_url: Option<Url>,
    pub rewriter: Rewriter,
    pub target: BuildTarget,
    /// Client asked for the untransformed form.
    pub raw: bool,
    /// Client asked for a source map artifact.
    pub map_request: bool,
}

/// Resolves request URLs against the configured upstream and mount point.
#[derive(Debug, Clone)]
pub struct OriginResolver {
    upstream_origin: Arc<str>,
    origin_pattern: Arc<Regex>,
    base_path: Arc<str>,
    real_origin_header: String,
}

impl OriginResolver {
    pub fn new(config: &UpstreamConfig) -> Result<Self, url::ParseError> {
        let upstream_origin = normalize_upstream_origin(&config.upstream_origin)?;
        Ok(Self {
            origin_pattern: origin_pattern(&upstream_origin),
            upstream_origin: upstream_origin.into(),
            base_path: normalize_base_path(&config.base_path).into(),
            real_origin_header: config.real_origin_header.to_ascii_lowercase(),
        })
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn upstream_origin(&self) -> &str {
        &self.upstream_origin
    }

    /// Derive the per-request context. Never fails: a malformed trusted
    /// origin header falls back to the request's own origin.
    pub fn resolve(&self, actual_url: Url, headers: &HeaderMap) -> RequestContext {
        let public_origin = headers
            .get(self.real_origin_header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(parse_origin)
            .unwrap_or_else(|| actual_url.origin().ascii_serialization());

        let public_url = Url::parse(&format!(
            "{public_origin}{}",
            &actual_url[Position::BeforePath..]
        ))
        .unwrap_or_else(|_| actual_url.clone());

        let rewriter = Rewriter::new(
            self.origin_pattern.clone(),
            &public_origin,
            self.base_path.clone(),
        );

        let target = BuildTarget::from_user_agent(
            headers.get(USER_AGENT).and_then(|v| v.to_str().ok()),
        );

        let raw = actual_url
            .query_pairs()
            .any(|(k, v)| k == "raw" && v != "0" && v != "false");
        let map_request = actual_url.path().ends_with(".map");

        RequestContext {
            upstream_url: self.upstream_url(&actual_url),
            actual_url,
            public_url,
            rewriter,
            target,
            raw,
            map_request,
        }
    }

    fn upstream_url(&self, actual_url: &Url) -> Option<Url> {
        let path = strip_base_path(actual_url.path(), &self.base_path);
        let query = actual_url.query();
        if matches!(path, "" | "/") && query.is_none() {
            return None;
        }

        let mut upstream = format!("{}{}", self.upstream_origin, path);
        if let Some(query) = query {
            upstream.push('?');
            upstream.push_str(query);
        }
        Url::parse(&upstream).ok()
    }
}

/// Leading `/`, no trailing `/` unless the whole path is `/`.
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Origin plus path prefix without a trailing slash; query and fragment dropped.
pub fn normalize_upstream_origin(origin: &str) -> Result<String, url::ParseError> {
    let url = Url::parse(origin.trim())?;
    let path = url.path().trim_end_matches('/');
    Ok(format!("{}{}", url.origin().ascii_serialization(), path))
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> &'a str {
    if base_path == "/" {
        return path;
    }
    match path.strip_prefix(base_path) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

fn parse_origin(value: &str) -> Option<String> {
    let url = Url::parse(value.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return None;
    }
    Some(url.origin().ascii_serialization())
}
