//! Mount point, homepage redirect and operational endpoints.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};

use esm_proxy::http::StatusReport;

mod common;
use common::{config, MockUpstream, TestProxy, HOMEPAGE, MODULE_PATH};

fn purge_request(uri: &str, form: &str) -> Request<Body> {
    Request::post(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_root_redirects_to_homepage() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/"));

    let res = proxy.get("/").await;
    assert_eq!(res.status, StatusCode::FOUND);
    assert_eq!(res.header("location"), Some(HOMEPAGE));
    assert_eq!(upstream.total_hits(), 0);
}

#[tokio::test]
async fn test_mount_root_redirects_to_homepage() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/esm"));

    for uri in ["/esm", "/esm/"] {
        let res = proxy.get(uri).await;
        assert_eq!(res.status, StatusCode::FOUND, "{uri}");
        assert_eq!(res.header("location"), Some(HOMEPAGE));
    }
    assert_eq!(upstream.total_hits(), 0);
}

#[tokio::test]
async fn test_outside_mount_is_not_found() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/esm"));

    assert_eq!(proxy.get(MODULE_PATH).await.status, StatusCode::NOT_FOUND);
    assert_eq!(proxy.get("/esmodule").await.status, StatusCode::NOT_FOUND);
    assert_eq!(upstream.total_hits(), 0);

    let res = proxy.get(&format!("/esm{MODULE_PATH}")).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(upstream.hits(MODULE_PATH), 1);
}

#[tokio::test]
async fn test_purge_removes_all_variants() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/"));

    proxy.get(MODULE_PATH).await;
    proxy.get(&format!("{MODULE_PATH}?raw")).await;
    proxy.settle().await;
    assert_eq!(upstream.hits(MODULE_PATH), 2);

    let form = format!("url=http%3A%2F%2Fproxy.test{}", MODULE_PATH.replace('/', "%2F").replace('@', "%40"));
    let res = proxy.send(purge_request("/_purge", &form)).await;
    assert_eq!(res.status, StatusCode::OK);

    let report: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(report["removed"], 2);
    assert_eq!(report["url"], format!("http://proxy.test{MODULE_PATH}"));

    proxy.get(MODULE_PATH).await;
    assert_eq!(upstream.hits(MODULE_PATH), 3);
}

#[tokio::test]
async fn test_multipart_purge() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/"));

    proxy.get(MODULE_PATH).await;
    proxy.settle().await;

    let boundary = "purge-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"url\"\r\n\r\n\
         http://proxy.test{MODULE_PATH}\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::post("/_purge")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let res = proxy.send(request).await;
    assert_eq!(res.status, StatusCode::OK);

    let report: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(report["removed"], 1);

    // a multipart body without the field is still rejected
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"target\"\r\n\r\n\
         x\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::post("/_purge")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    assert_eq!(proxy.send(request).await.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_purge_rejects_bad_input() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/esm"));

    proxy.get(&format!("/esm{MODULE_PATH}")).await;
    proxy.settle().await;
    let stored = proxy.store.len();
    assert!(stored > 0);

    let res = proxy.send(purge_request("/esm/_purge", "url=not%20a%20url")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = proxy.send(purge_request("/esm/_purge", "target=x")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    assert_eq!(proxy.store.len(), stored);
}

#[tokio::test]
async fn test_purge_path_without_post_is_proxied() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/"));

    let res = proxy.get("/_purge").await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(upstream.hits("/_purge"), 1);
}

#[tokio::test]
async fn test_status_report() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/esm"));

    let res = proxy.get("/esm/_status").await;
    assert_eq!(res.status, StatusCode::OK);

    let report: StatusReport = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(report.name, "esm-proxy");
    assert!(report.cache_enabled);
    assert_eq!(report.cache_pool.borrowed, 0);
    assert!(report.build_pool.is_some());
    assert_eq!(upstream.total_hits(), 0);
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let upstream = MockUpstream::start().await;
    let proxy = TestProxy::new(config(&upstream, "/"));

    let res = proxy.get(MODULE_PATH).await;
    assert!(res.header("x-request-id").is_some());

    let request = Request::get(MODULE_PATH)
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let res = proxy.send(request).await;
    assert_eq!(res.header("x-request-id"), Some("req-42"));
}
