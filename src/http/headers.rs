//! Header filter chains for upstream requests and client responses.
//!
//! A chain is a list of pure steps `(name, value) -> Option<(name, value)>`;
//! a step returning `None` drops the header.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::origin::{BuildTarget, Rewriter, SPOOFED_USER_AGENT};

pub type Header = (HeaderName, HeaderValue);

const TIMING_ALLOW_ORIGIN: HeaderName = HeaderName::from_static("timing-allow-origin");

/// Never forwarded upstream.
const REQUEST_DENYLIST: &[&str] = &[
    "host",
    "age",
    "x-real-origin",
    "x-forwarded-for",
    "x-forwarded-proto",
    "x-forwarded-host",
    "x-real-ip",
    "content-length",
    // compressed bodies cannot be rewritten
    "accept-encoding",
    "cdn-loop",
    "cf-connecting-ip",
    "cf-ipcountry",
    "cf-ray",
    "cf-visitor",
    "cf-worker",
];

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Response headers carrying URLs.
const URL_HEADERS: &[&str] = &[
    "location",
    "content-location",
    "link",
    "x-typescript-types",
    "x-esm-path",
];

const SCRIPT_TYPES: &[&str] = &[
    "application/javascript",
    "text/javascript",
    "application/ecmascript",
    "text/ecmascript",
    "application/x-javascript",
];

/// Run every header through `steps` in order.
pub fn apply(headers: &HeaderMap, steps: &[&dyn Fn(Header) -> Option<Header>]) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let mapped = steps
            .iter()
            .try_fold((name.clone(), value.clone()), |header, step| step(header));
        if let Some((name, value)) = mapped {
            out.append(name, value);
        }
    }
    out
}

fn deny(names: &'static [&'static str]) -> impl Fn(Header) -> Option<Header> {
    move |(name, value)| (!names.contains(&name.as_str())).then_some((name, value))
}

/// Headers for the upstream fetch of a client request.
pub fn upstream_request(
    headers: &HeaderMap,
    real_origin_header: &str,
    target: BuildTarget,
) -> HeaderMap {
    let denylisted = deny(REQUEST_DENYLIST);
    let hop_by_hop = deny(HOP_BY_HOP);
    let real_origin = |(name, value): Header| {
        (!name.as_str().eq_ignore_ascii_case(real_origin_header)).then_some((name, value))
    };
    let user_agent = |(name, value): Header| {
        if name == header::USER_AGENT && !target.is_recognized() {
            Some((name, HeaderValue::from_static(SPOOFED_USER_AGENT)))
        } else {
            Some((name, value))
        }
    };

    let mut out = apply(headers, &[&denylisted, &hop_by_hop, &real_origin, &user_agent]);
    if !target.is_recognized() && !out.contains_key(header::USER_AGENT) {
        out.insert(header::USER_AGENT, HeaderValue::from_static(SPOOFED_USER_AGENT));
    }
    out
}

/// Headers for the client response: hop-by-hop and length dropped, URLs
/// rewritten to the public origin, `timing-allow-origin` ensured.
pub fn client_response(headers: &HeaderMap, rewriter: &Rewriter) -> HeaderMap {
    let hop_by_hop = deny(HOP_BY_HOP);
    let length = |(name, value): Header| (name != header::CONTENT_LENGTH).then_some((name, value));
    let urls = |(name, value): Header| {
        if !URL_HEADERS.contains(&name.as_str()) {
            return Some((name, value));
        }
        let rewritten = value
            .to_str()
            .ok()
            .and_then(|v| HeaderValue::from_str(&rewriter.rewrite_header(v)).ok())
            .unwrap_or(value);
        Some((name, rewritten))
    };

    let mut out = apply(headers, &[&hop_by_hop, &length, &urls]);
    ensure_timing_allow_origin(&mut out);
    out
}

pub fn ensure_timing_allow_origin(headers: &mut HeaderMap) {
    if !headers.contains_key(TIMING_ALLOW_ORIGIN) {
        headers.insert(TIMING_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }
}

fn mime_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let mime = value.split(';').next()?.trim().to_ascii_lowercase();
    Some(mime)
}

pub fn is_script(headers: &HeaderMap) -> bool {
    mime_type(headers).is_some_and(|mime| SCRIPT_TYPES.contains(&mime.as_str()))
}

/// Bodies of these types are rewritten on passthrough.
pub fn is_textual(headers: &HeaderMap) -> bool {
    mime_type(headers).is_some_and(|mime| {
        mime.starts_with("text/")
            || SCRIPT_TYPES.contains(&mime.as_str())
            || mime == "application/json"
            || mime == "application/xml"
            || mime == "application/typescript"
            || mime.ends_with("+json")
            || mime.ends_with("+xml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::rewrite::origin_pattern;
    use std::sync::Arc;

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn test_upstream_request_filters_denylist() {
        let headers = map(&[
            ("host", "proxy.test"),
            ("age", "10"),
            ("x-real-origin", "https://cdn.test"),
            ("x-forwarded-for", "10.0.0.1"),
            ("connection", "keep-alive"),
            ("cf-ray", "abc"),
            ("accept", "*/*"),
            ("user-agent", "Mozilla/5.0 Chrome/120.0.0.0 Safari/537.36"),
        ]);

        let out = upstream_request(&headers, "x-real-origin", BuildTarget::Es2022);
        assert_eq!(out.len(), 2);
        assert_eq!(out["accept"], "*/*");
        assert_eq!(out["user-agent"], "Mozilla/5.0 Chrome/120.0.0.0 Safari/537.36");
    }

    #[test]
    fn test_unrecognized_client_gets_spoofed_agent() {
        let out = upstream_request(&map(&[("user-agent", "curl/8.0")]), "x-real-origin", BuildTarget::Unknown);
        assert_eq!(out["user-agent"], SPOOFED_USER_AGENT);

        let out = upstream_request(&HeaderMap::new(), "x-real-origin", BuildTarget::Unknown);
        assert_eq!(out["user-agent"], SPOOFED_USER_AGENT);
    }

    #[test]
    fn test_custom_origin_header_and_default_both_dropped() {
        let headers = map(&[
            ("x-public-origin", "https://a.test"),
            ("x-real-origin", "https://b.test"),
            ("accept", "*/*"),
        ]);

        let out = upstream_request(&headers, "x-public-origin", BuildTarget::Es2022);
        assert!(!out.contains_key("x-public-origin"));
        assert!(!out.contains_key("x-real-origin"));
        assert_eq!(out["accept"], "*/*");
    }

    #[test]
    fn test_client_response_rewrites_urls() {
        let rewriter = Rewriter::new(origin_pattern("https://esm.sh"), "https://proxy.test", Arc::from("/esm"));
        let headers = map(&[
            ("location", "https://esm.sh/react@18.2.0"),
            ("x-typescript-types", "https://ESM.SH/v135/@types/react/index.d.ts"),
            ("content-length", "42"),
            ("transfer-encoding", "chunked"),
            ("etag", "\"https://esm.sh\""),
        ]);

        let out = client_response(&headers, &rewriter);
        assert_eq!(out["location"], "https://proxy.test/esm/react@18.2.0");
        assert_eq!(out["x-typescript-types"], "https://proxy.test/esm/v135/@types/react/index.d.ts");
        assert_eq!(out["etag"], "\"https://esm.sh\"");
        assert_eq!(out["timing-allow-origin"], "*");
        assert!(!out.contains_key("content-length"));
        assert!(!out.contains_key("transfer-encoding"));
    }

    #[test]
    fn test_existing_timing_allow_origin_kept() {
        let rewriter = Rewriter::new(origin_pattern("https://esm.sh"), "https://proxy.test", Arc::from("/"));
        let out = client_response(&map(&[("timing-allow-origin", "https://a.test")]), &rewriter);
        assert_eq!(out["timing-allow-origin"], "https://a.test");
    }

    #[test]
    fn test_content_classification() {
        assert!(is_script(&map(&[("content-type", "application/javascript; charset=utf-8")])));
        assert!(is_script(&map(&[("content-type", "Text/JavaScript")])));
        assert!(!is_script(&map(&[("content-type", "text/css")])));
        assert!(!is_script(&HeaderMap::new()));

        assert!(is_textual(&map(&[("content-type", "text/css")])));
        assert!(is_textual(&map(&[("content-type", "application/manifest+json")])));
        assert!(!is_textual(&map(&[("content-type", "application/wasm")])));
    }
}
