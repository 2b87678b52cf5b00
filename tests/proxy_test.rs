//! End-to-end tests for HTTP/2 stream routing and proxying.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use edge_gateway::proxy::{Destination, ProxyOptions, ResolvedTarget};
use edge_gateway::routing::EventSource;
use edge_gateway::{Captures, Router, StaticFiles};

mod common;

fn reply(text: &'static str) -> impl Fn(Request<Body>, Captures) -> std::future::Ready<&'static str> + Clone {
    move |_request, _captures| std::future::ready(text)
}

async fn unused_addr() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_straight_proxy() {
    let backend = common::spawn_gateway(Router::builder().get("/", reply("straight proxy")).build().unwrap()).await;

    let destination = Destination::literal(&backend.url("")).unwrap();
    let front = common::spawn_gateway(
        Router::builder()
            .proxy("/", destination, ProxyOptions::default())
            .build()
            .unwrap(),
    )
    .await;

    let response = common::h2_client().get(front.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "straight proxy");
}

#[tokio::test]
async fn test_resolver_rewrites_path() {
    let backend = common::spawn_gateway(
        Router::builder()
            .get("/rewritten", reply("rewritten"))
            .build()
            .unwrap(),
    )
    .await;

    let backend_url = backend.url("");
    let destination = Destination::resolver(move |headers, _captures| {
        let mut headers = headers.clone();
        headers.set(":path", "/rewritten");
        ResolvedTarget {
            url: backend_url.clone(),
            headers: Some(headers),
            options: None,
        }
        .into()
    });
    let front = common::spawn_gateway(
        Router::builder()
            .proxy("/server2", destination, ProxyOptions::default())
            .build()
            .unwrap(),
    )
    .await;

    let response = common::h2_client().get(front.url("/server2")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "rewritten");
}

#[tokio::test]
async fn test_captures_select_port_and_path() {
    let first = common::spawn_gateway(Router::builder().get("/regex", reply("first")).build().unwrap()).await;
    let second = common::spawn_gateway(Router::builder().get("/regex", reply("second")).build().unwrap()).await;

    let destination = Destination::template("http://127.0.0.1:$1/$2").unwrap();
    let front = common::spawn_gateway(
        Router::builder()
            .proxy("/server2/(.*)/(.*)", destination, ProxyOptions::default())
            .build()
            .unwrap(),
    )
    .await;

    let client = common::h2_client();
    for (backend, expected) in [(&first, "first"), (&second, "second")] {
        let path = format!("/server2/{}/regex", backend.addr.port());
        let response = client.get(front.url(&path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_upstream_down_is_bad_gateway_with_event() {
    let dead = unused_addr().await;
    let destination = Destination::literal(&format!("http://{dead}")).unwrap();
    let front = common::spawn_gateway(
        Router::builder()
            .proxy("/", destination, ProxyOptions::default())
            .build()
            .unwrap(),
    )
    .await;
    let mut events = front.router.subscribe();

    let response = common::h2_client().get(front.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event")
        .unwrap();
    assert_eq!(event.source, EventSource::Proxy);
    assert_eq!(event.path, "/");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_unmatched_stream_is_not_found_with_server_header() {
    let gateway = common::spawn_gateway(Router::builder().get("/known", reply("known")).build().unwrap()).await;

    let response = common::h2_client().get(gateway.url("/unknown")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let server = response.headers().get("server").unwrap().to_str().unwrap();
    assert!(server.starts_with("edge-gateway/"));
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_static_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hello from disk").unwrap();
    std::fs::write(dir.path().join("page.html"), "<p>hi</p>").unwrap();

    let files = StaticFiles::new(dir.path()).unwrap();
    let gateway = common::spawn_gateway(files.mount(Router::builder(), "/files/(.*)").build().unwrap()).await;
    let client = common::h2_client();

    let response = client.get(gateway.url("/files/hello.txt")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.text().await.unwrap(), "hello from disk");

    let response = client.get(gateway.url("/files/page.html")).send().await.unwrap();
    assert_eq!(response.headers()["content-type"], "text/html");

    let response = client.get(gateway.url("/files/missing.txt")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plain_http1_request_is_not_found() {
    let gateway = common::spawn_gateway(Router::builder().get("/", reply("h2 only")).build().unwrap()).await;

    let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();
    assert!(reply.starts_with("HTTP/1.1 404"));
}

#[tokio::test]
async fn test_graceful_stop() {
    let gateway = common::spawn_gateway(Router::builder().get("/", reply("up")).build().unwrap()).await;
    let addr = gateway.addr;

    let response = common::h2_client().get(gateway.url("/")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "up");

    gateway.stop().await;
    assert!(TcpStream::connect(addr).await.is_err());
}
