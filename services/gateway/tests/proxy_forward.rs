//! Non-upgrade requests pass straight through to the backend.

use gateway::{app_router, Gateway, HttpTransport};
use grip_test_utils::{BackendReply, MockBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn start_gateway(backend_url: &str) -> (SocketAddr, Arc<Gateway>) {
    let transport = Arc::new(HttpTransport::new(backend_url, None));
    let gateway = Gateway::new(transport);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind gateway");
    let addr = listener.local_addr().unwrap();
    let router = app_router(Arc::clone(&gateway));
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("gateway server");
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, gateway)
}

#[tokio::test]
async fn get_requests_are_proxied_with_path_query_and_headers() {
    let backend = MockBackend::start(|request| {
        assert_eq!(request.method, "GET");
        BackendReply::raw(axum::http::StatusCode::CREATED, b"from the backend".to_vec())
    })
    .await;
    let (addr, _gateway) = start_gateway(&backend.url()).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/api/things?limit=3"))
        .header("X-Custom", "forty-two")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"from the backend");

    let requests = backend.wait_for_requests(1).await;
    assert_eq!(requests[0].path, "/api/things?limit=3");

    // No connection was created for plain HTTP traffic.
}

#[tokio::test]
async fn post_bodies_are_forwarded_verbatim() {
    let backend = MockBackend::start(|request| {
        BackendReply::raw(axum::http::StatusCode::OK, request.body.clone())
    })
    .await;
    let (addr, _gateway) = start_gateway(&backend.url()).await;

    let payload = b"opaque \x00\x01 bytes".to_vec();
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/ingest"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(response.bytes().await.unwrap().to_vec(), payload);

    let requests = backend.wait_for_requests(1).await;
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, payload);
}

#[tokio::test]
async fn unreachable_backend_yields_bad_gateway() {
    // Point at a port that nothing listens on.
    let (addr, _gateway) = start_gateway("http://127.0.0.1:1").await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/whatever"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
}
