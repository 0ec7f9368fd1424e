// mock_backend: An in-process GRIP backend for exercising the gateway.
//
// Accepts any request on any path, decodes websocket-events bodies, records
// what arrived, and replies with whatever the test's responder returns.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Router;
use grip_protocol::{codec, Event};

/// One request the gateway made to the backend.
///
/// For event POSTs `events` holds the decoded batch; for proxied requests it
/// is empty (unless the body happens to be a valid event stream) and the
/// method/path/body carry the interesting bits.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including the query string, when one was sent.
    pub path: String,
    pub connection_id: Option<String>,
    pub grip_sig: Option<String>,
    pub content_type: Option<String>,
    pub events: Vec<Event>,
    pub body: Vec<u8>,
}

/// What the backend answers with.
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub status: StatusCode,
    pub events: Vec<Event>,
    /// Emitted as `Set-Meta-<name>: <value>` response headers.
    pub metadata: Vec<(String, String)>,
    /// Raw body override for non-event (proxied) responses.
    pub raw_body: Option<Vec<u8>>,
}

impl BackendReply {
    /// A 200 reply carrying the given events.
    pub fn events(events: Vec<Event>) -> Self {
        BackendReply {
            status: StatusCode::OK,
            events,
            metadata: Vec::new(),
            raw_body: None,
        }
    }

    /// A 200 reply with an empty event stream.
    pub fn empty() -> Self {
        Self::events(Vec::new())
    }

    /// A bare status reply (e.g. a 500 to simulate a broken backend).
    pub fn status(status: StatusCode) -> Self {
        BackendReply {
            status,
            events: Vec::new(),
            metadata: Vec::new(),
            raw_body: None,
        }
    }

    /// A reply with a verbatim body, for proxy passthrough tests.
    pub fn raw(status: StatusCode, body: Vec<u8>) -> Self {
        BackendReply {
            status,
            events: Vec::new(),
            metadata: Vec::new(),
            raw_body: Some(body),
        }
    }

    pub fn with_meta(mut self, name: &str, value: &str) -> Self {
        self.metadata.push((name.to_string(), value.to_string()));
        self
    }
}

type Responder = Arc<dyn Fn(&RecordedRequest) -> BackendReply + Send + Sync>;

#[derive(Clone)]
struct BackendState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responder: Responder,
}

/// A mock backend for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound address. Each test
/// can spin up its own isolated instance with its own responder.
pub struct MockBackend {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Handle to the background server; dropped when the backend is dropped.
    _task: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    /// Start the mock backend with the given responder.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> BackendReply + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = BackendState {
            requests: Arc::clone(&requests),
            responder: Arc::new(responder),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock backend");
        let addr = listener.local_addr().expect("local_addr after bind");

        let router = Router::new().fallback(handle_request).with_state(state);
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        MockBackend {
            addr,
            requests,
            _task: task,
        }
    }

    /// An always-200 backend that answers every batch with an empty event
    /// stream.
    pub async fn start_silent() -> Self {
        Self::start(|_| BackendReply::empty()).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for pointing a gateway at this backend.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Snapshot of everything received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// All events received so far, concatenated across batches in arrival
    /// order.
    pub fn received_events(&self) -> Vec<Event> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .flat_map(|request| request.events.clone())
            .collect()
    }

    /// Wait until at least `count` requests have arrived, then return them.
    ///
    /// Panics after five seconds; a missing request is a test failure
    /// either way.
    pub async fn wait_for_requests(&self, count: usize) -> Vec<RecordedRequest> {
        for _ in 0..500 {
            {
                let requests = self.requests.lock().unwrap();
                if requests.len() >= count {
                    return requests.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {count} backend requests; got {:?}",
            self.requests()
        );
    }
}

async fn handle_request(State(state): State<BackendState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();

    let header_str = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
    };

    let recorded = RecordedRequest {
        method: parts.method.to_string(),
        path: parts
            .uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string()),
        connection_id: header_str("connection-id"),
        grip_sig: header_str("grip-sig"),
        content_type: header_str("content-type"),
        events: codec::decode_events(&body).unwrap_or_default(),
        body: body.to_vec(),
    };

    let reply = (state.responder)(&recorded);
    state.requests.lock().unwrap().push(recorded);

    let mut builder = Response::builder().status(reply.status);
    for (name, value) in &reply.metadata {
        builder = builder.header(format!("Set-Meta-{name}").as_str(), value.as_str());
    }
    let body = match reply.raw_body {
        Some(raw) => raw,
        None => {
            builder = builder.header(header::CONTENT_TYPE, "application/websocket-events");
            codec::encode_events(&reply.events)
        }
    };

    builder
        .body(Body::from(body))
        .expect("static response parts are valid")
}
