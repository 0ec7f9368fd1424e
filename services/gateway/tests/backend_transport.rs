//! Transport-level behavior against a live mock backend: identity and
//! signature headers, Set-Meta metadata, and failure handling.

use futures_util::{SinkExt, StreamExt};
use gateway::{app_router, Gateway, HttpTransport, Signer};
use grip_protocol::Event;
use grip_test_utils::{BackendReply, MockBackend, RecordedRequest};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

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

async fn connect(addr: SocketAddr, path: &str) -> WsClient {
    let (ws, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("websocket connect");
    ws
}

async fn recv(ws: &mut WsClient) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("websocket error")
}

#[tokio::test]
async fn send_events_posts_batches_and_decodes_replies() {
    let backend = MockBackend::start(|_| {
        BackendReply::events(vec![Event::Open, Event::text("m:welcome")])
            .with_meta("User", "alice")
    })
    .await;

    let transport = HttpTransport::new(backend.url(), None);
    let (metadata, reply) = transport
        .send_events("/ws", "cid-123", &[Event::Open, Event::Ping])
        .await
        .unwrap();

    assert_eq!(reply, vec![Event::Open, Event::text("m:welcome")]);
    assert_eq!(metadata, vec![("user".to_string(), "alice".to_string())]);

    let requests = backend.wait_for_requests(1).await;
    assert_eq!(requests[0].path, "/ws");
    assert_eq!(requests[0].connection_id.as_deref(), Some("cid-123"));
    assert_eq!(
        requests[0].content_type.as_deref(),
        Some("application/websocket-events")
    );
    assert!(requests[0].grip_sig.is_none());
    assert_eq!(requests[0].events, vec![Event::Open, Event::Ping]);
}

#[tokio::test]
async fn configured_signer_attaches_grip_sig() {
    let backend = MockBackend::start_silent().await;

    let signer = Signer::new("the-gateway", b"shared-secret");
    let transport = HttpTransport::new(backend.url(), Some(signer));
    transport
        .send_events("/ws", "cid-sig", &[Event::Open])
        .await
        .unwrap();

    let requests = backend.wait_for_requests(1).await;
    let token = requests[0].grip_sig.clone().expect("Grip-Sig header");
    // Compact JWT form: three dot-separated segments.
    assert_eq!(token.split('.').count(), 3);
}

#[tokio::test]
async fn non_2xx_and_garbage_bodies_are_errors() {
    let backend = MockBackend::start(|_| {
        BackendReply::status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await;
    let transport = HttpTransport::new(backend.url(), None);
    assert!(transport
        .send_events("/ws", "cid", &[Event::Open])
        .await
        .is_err());

    let backend =
        MockBackend::start(|_| BackendReply::raw(axum::http::StatusCode::OK, b"TEXT zz\r\n".to_vec()))
            .await;
    let transport = HttpTransport::new(backend.url(), None);
    assert!(transport
        .send_events("/ws", "cid", &[Event::Open])
        .await
        .is_err());
}

#[tokio::test]
async fn a_failed_batch_does_not_kill_the_connection() {
    let broken_once = AtomicBool::new(true);
    let backend = MockBackend::start(move |request: &RecordedRequest| {
        if broken_once.swap(false, Ordering::SeqCst) {
            return BackendReply::status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        }
        let mut reply = Vec::new();
        for event in &request.events {
            match event {
                Event::Open => reply.push(Event::Open),
                Event::Text(p) => {
                    let mut echoed = b"m:".to_vec();
                    echoed.extend_from_slice(p);
                    reply.push(Event::Text(echoed));
                }
                _ => {}
            }
        }
        BackendReply::events(reply)
    })
    .await;
    let (addr, gateway) = start_gateway(&backend.url()).await;

    let mut ws = connect(addr, "/ws").await;

    // The OPEN batch dies with the 500 and is abandoned.
    backend.wait_for_requests(1).await;
    assert_eq!(gateway.connection_count(), 1);

    // The next frame wakes the drainer and traffic flows again. The first
    // successful reply carries the OPEN acknowledgement.
    ws.send(Message::text("retry")).await.unwrap();
    ws.send(Message::text("again")).await.unwrap();
    assert_eq!(recv(&mut ws).await, Message::text("again"));
    assert_eq!(gateway.connection_count(), 1);
}
