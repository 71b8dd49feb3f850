//! Cache keys and entries.

use std::time::{Duration, SystemTime};

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::origin::BuildTarget;

/// Key of a cached response: normalized URL partitioned by build target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub url: String,
    pub target: BuildTarget,
}

impl CacheKey {
    /// Key for `url` with its fragment removed.
    pub fn new(url: &Url, target: BuildTarget) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            url: url.into(),
            target,
        }
    }

    /// Key of the source map generated alongside this entry:
    /// query dropped, `.map` appended to the path.
    pub fn map_sibling(&self) -> Option<Self> {
        let mut url = Url::parse(&self.url).ok()?;
        url.set_query(None);
        let path = format!("{}.map", url.path());
        url.set_path(&path);
        Some(Self {
            url: url.into(),
            target: self.target,
        })
    }

    /// URL identity used by purge: the URL without query string.
    pub fn identity(&self) -> &str {
        url_identity(&self.url)
    }
}

/// Strip query and fragment from a serialized URL.
pub fn url_identity(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    /// Ordered header pairs; duplicate names are merged into one value.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Seconds since the Unix epoch after which the entry is stale.
    pub expires_at: u64,
    /// The `cache-control` header was added for storage and is not sent to clients.
    #[serde(default)]
    pub synthesized_cache_control: bool,
}

impl CacheEntry {
    /// Snapshot a response. Expiry is set when the entry is stored.
    pub fn from_parts(url: &str, status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            url: url.to_string(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: merge_headers(headers),
            body,
            expires_at: 0,
            synthesized_cache_control: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace (or append) a header, keeping order.
    pub fn set_header(&mut self, name: &str, value: String) {
        match self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, v)) => *v = value,
            None => self.headers.push((name.to_ascii_lowercase(), value)),
        }
    }

    pub fn is_fresh(&self, now: SystemTime) -> bool {
        self.expires_at > unix_secs(now)
    }

    pub fn expire_after(&mut self, ttl: Duration, now: SystemTime) {
        self.expires_at = unix_secs(now).saturating_add(ttl.as_secs());
    }

    /// Headers as sent to a client; a synthesized `cache-control` is left out.
    pub fn client_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if self.synthesized_cache_control && name.eq_ignore_ascii_case("cache-control") {
                continue;
            }
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            // merged set-cookie values are newline separated
            let values: Vec<&str> = if name == SET_COOKIE {
                value.split('\n').collect()
            } else {
                vec![value.as_str()]
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    headers.append(name.clone(), value);
                }
            }
        }
        headers
    }
}

/// Flatten a header map into ordered pairs, merging duplicates per RFC 9110
/// (comma-joined; `set-cookie` joined with newlines).
pub fn merge_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::with_capacity(headers.keys_len());
    for name in headers.keys() {
        let separator = if name == SET_COOKIE { "\n" } else { ", " };
        let value = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(separator);
        merged.push((name.as_str().to_string(), value));
    }
    merged
}

/// `max-age` directive of a `Cache-Control` value.
pub fn max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("max-age")
            .then(|| value.trim().trim_matches('"').parse().ok())
            .flatten()
    })
}

pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        let url = Url::parse("https://proxy.test/react@18?dev#frag").unwrap();
        let key = CacheKey::new(&url, BuildTarget::Es2020);
        assert_eq!(key.url, "https://proxy.test/react@18?dev");
        assert_eq!(key.identity(), "https://proxy.test/react@18");

        let map = key.map_sibling().unwrap();
        assert_eq!(map.url, "https://proxy.test/react@18.map");
        assert_eq!(map.target, BuildTarget::Es2020);
    }

    #[test]
    fn test_duplicate_headers_merge() {
        let mut headers = HeaderMap::new();
        headers.append("vary", HeaderValue::from_static("accept"));
        headers.append("vary", HeaderValue::from_static("user-agent"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let entry = CacheEntry::from_parts("u", StatusCode::OK, &headers, Bytes::new());
        assert_eq!(entry.header("Vary"), Some("accept, user-agent"));
        assert_eq!(entry.headers.len(), 2);
        assert_eq!(entry.status_text, "OK");
    }

    #[test]
    fn test_max_age() {
        assert_eq!(max_age("public, max-age=31536000, immutable"), Some(31536000));
        assert_eq!(max_age("MAX-AGE=60"), Some(60));
        assert_eq!(max_age("no-cache"), None);
        assert_eq!(max_age("max-age=abc"), None);
    }

    #[test]
    fn test_freshness_and_synthesized_header() {
        let now = SystemTime::now();
        let mut entry = CacheEntry::from_parts("u", StatusCode::FOUND, &HeaderMap::new(), Bytes::new());
        assert!(!entry.is_fresh(now));

        entry.expire_after(Duration::from_secs(60), now);
        assert!(entry.is_fresh(now));
        assert!(!entry.is_fresh(now + Duration::from_secs(61)));

        entry.set_header("cache-control", "public, max-age=60".into());
        entry.synthesized_cache_control = true;
        assert!(entry.client_headers().get("cache-control").is_none());
    }

    #[test]
    fn test_set_cookie_survives_storage() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2; HttpOnly"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let entry = CacheEntry::from_parts("u", StatusCode::OK, &headers, Bytes::new());
        let restored = entry.client_headers();

        let cookies: Vec<&str> = restored
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, ["a=1; Path=/", "b=2; HttpOnly"]);
        assert_eq!(restored["content-type"], "text/plain");
    }
}
