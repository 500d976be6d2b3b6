//! Failure injection tests for routing and load balancing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use caching_proxy::config::ProxyConfig;

mod common;
use common::MockResponse;

fn uncached_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.cache.enabled = false;
    config
}

#[tokio::test]
async fn test_round_robin_across_backends() {
    let b1_addr: SocketAddr = "127.0.0.1:28181".parse().unwrap();
    let b2_addr: SocketAddr = "127.0.0.1:28182".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28183".parse().unwrap();

    common::start_mock_backend(b1_addr, "b1").await;
    common::start_mock_backend(b2_addr, "b2").await;

    let mut config = uncached_config();
    config.routes.push(common::balanced_route(
        "web",
        "/web/",
        &[format!("http://{}/", b1_addr), format!("http://{}/", b2_addr)],
    ));
    let shutdown = common::start_proxy(proxy_addr, config).await;
    let client = common::client();

    let mut served = Vec::new();
    for _ in 0..4 {
        let res = client
            .get(format!("http://{}/web/", proxy_addr))
            .send()
            .await
            .expect("Proxy unreachable");
        assert_eq!(res.status(), 200);
        served.push(res.text().await.unwrap());
    }
    assert_eq!(served, vec!["b1", "b2", "b1", "b2"]);

    shutdown.trigger();
}

#[tokio::test]
async fn test_failover_skips_dead_backend() {
    // Nothing listens on the first address.
    let dead_addr: SocketAddr = "127.0.0.1:28281".parse().unwrap();
    let b2_addr: SocketAddr = "127.0.0.1:28282".parse().unwrap();
    let b3_addr: SocketAddr = "127.0.0.1:28283".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28284".parse().unwrap();

    common::start_mock_backend(b2_addr, "b2").await;
    common::start_mock_backend(b3_addr, "b3").await;

    let mut config = uncached_config();
    config.routes.push(common::balanced_route(
        "web",
        "/",
        &[
            format!("http://{}/", dead_addr),
            format!("http://{}/", b2_addr),
            format!("http://{}/", b3_addr),
        ],
    ));
    let shutdown = common::start_proxy(proxy_addr, config).await;
    let client = common::client();

    let mut served = Vec::new();
    for _ in 0..4 {
        let res = client
            .get(format!("http://{}/", proxy_addr))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200, "failover should hide the dead backend");
        served.push(res.text().await.unwrap());
    }
    assert_eq!(served, vec!["b2", "b3", "b2", "b3"]);

    shutdown.trigger();
}

#[tokio::test]
async fn test_all_backends_down_is_bad_gateway() {
    let dead1: SocketAddr = "127.0.0.1:28381".parse().unwrap();
    let dead2: SocketAddr = "127.0.0.1:28382".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28383".parse().unwrap();

    let mut config = uncached_config();
    config.routes.push(common::balanced_route(
        "web",
        "/",
        &[format!("http://{}/", dead1), format!("http://{}/", dead2)],
    ));
    let shutdown = common::start_proxy(proxy_addr, config).await;

    let res = common::client()
        .get(format!("http://{}/anything", proxy_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);

    shutdown.trigger();
}

#[tokio::test]
async fn test_server_errors_do_not_trigger_failover() {
    let b1_addr: SocketAddr = "127.0.0.1:28481".parse().unwrap();
    let b2_addr: SocketAddr = "127.0.0.1:28482".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28483".parse().unwrap();

    let b1_calls = Arc::new(AtomicU32::new(0));
    let c = b1_calls.clone();
    common::start_programmable_backend(b1_addr, move |_| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            MockResponse::status(503, "overloaded")
        }
    })
    .await;
    common::start_mock_backend(b2_addr, "b2").await;

    let mut config = uncached_config();
    config.routes.push(common::balanced_route(
        "web",
        "/",
        &[format!("http://{}/", b1_addr), format!("http://{}/", b2_addr)],
    ));
    let shutdown = common::start_proxy(proxy_addr, config).await;
    let client = common::client();

    let statuses: Vec<u16> = {
        let mut out = Vec::new();
        for _ in 0..4 {
            let res = client.get(format!("http://{}/", proxy_addr)).send().await.unwrap();
            out.push(res.status().as_u16());
        }
        out
    };
    // A backend that answers stays in rotation, whatever the status.
    assert_eq!(statuses, vec![503, 200, 503, 200]);
    assert_eq!(b1_calls.load(Ordering::SeqCst), 2);

    shutdown.trigger();
}

#[tokio::test]
async fn test_prefix_stripped_and_queries_merged() {
    let backend_addr: SocketAddr = "127.0.0.1:28581".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28582".parse().unwrap();

    common::start_programmable_backend(backend_addr, |request| async move {
        MockResponse::ok(request.target)
    })
    .await;

    let mut config = uncached_config();
    config.routes.push(common::single_route(
        "svc",
        "/svc/",
        &format!("http://{}/base?key=abc", backend_addr),
    ));
    config.routes.push(common::single_route(
        "svc-admin",
        "/svc/admin/",
        &format!("http://{}/admin", backend_addr),
    ));
    let shutdown = common::start_proxy(proxy_addr, config).await;
    let client = common::client();

    let body = client
        .get(format!("http://{}/svc/items?page=2", proxy_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/base/items?key=abc&page=2");

    let body = client
        .get(format!("http://{}/svc/admin/users", proxy_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/admin/users");

    let missing = client
        .get(format!("http://{}/other", proxy_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    shutdown.trigger();
}
