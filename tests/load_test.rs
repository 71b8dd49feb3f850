//! Load test against a real listener.

use std::time::{Duration, Instant};

use tokio::net::TcpListener;

use esm_proxy::lifecycle::Shutdown;

mod common;
use common::{config, MockUpstream, MODULE_PATH, REDIRECT_PATH};

#[tokio::test]
async fn test_concurrent_clients_see_identical_output() {
    let upstream = MockUpstream::start().await;
    let cfg = config(&upstream, "/esm");
    let transform = common::RecordingTransform::new(&cfg.proxy.upstream_origin);
    let server = esm_proxy::HttpServer::new(
        cfg,
        std::sync::Arc::new(esm_proxy::cache::MemoryStore::new()),
        transform.clone(),
    )
    .unwrap();
    let pipeline = server.pipeline().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let concurrency = 20;
    let requests_per_task = 10;
    let client = reqwest::Client::new();
    let start = Instant::now();

    let mut tasks = Vec::with_capacity(concurrency);
    for i in 0..concurrency {
        let client = client.clone();
        // half the clients enter through the redirect
        let path = if i % 2 == 0 { MODULE_PATH } else { REDIRECT_PATH };
        let url = format!("http://{addr}/esm{path}");
        tasks.push(tokio::spawn(async move {
            let mut bodies = Vec::with_capacity(requests_per_task);
            for _ in 0..requests_per_task {
                let res = client.get(&url).send().await.unwrap();
                let status = res.status();
                bodies.push((status, res.text().await.unwrap()));
            }
            bodies
        }));
    }

    let mut module_bodies = Vec::new();
    for task in tasks {
        for (status, body) in task.await.unwrap() {
            if status == reqwest::StatusCode::OK {
                module_bodies.push(body);
            } else {
                // an uncached destination answers with the redirect itself
                assert_eq!(status, reqwest::StatusCode::FOUND);
            }
        }
    }
    let elapsed = start.elapsed();
    println!(
        "{} module responses in {:?}",
        module_bodies.len(),
        elapsed
    );

    assert!(module_bodies.len() >= concurrency * requests_per_task / 2);
    assert!(module_bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(module_bodies[0].contains(&format!("http://{addr}/esm/stable/react-dom@18.2.0")));
    // cold misses may race, but the cache absorbs the rest
    assert!(upstream.hits(MODULE_PATH) <= concurrency * 2);

    drop(client);
    shutdown.trigger();
    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));

    assert_eq!(pipeline.cache().pool_status().borrowed, 0);
    assert!(pipeline.builds().pool_status().is_some_and(|s| s.available == 0 && s.borrowed == 0));
    assert!(transform.calls() <= upstream.hits(MODULE_PATH));
}
