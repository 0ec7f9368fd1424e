//! Backend HTTP transport.
//!
//! The gateway talks to its backend two ways: per-connection event batches
//! (`POST {endpoint}{path}` with `application/websocket-events` bodies) and a
//! plain reverse proxy for every non-upgrade client request.
//!
//! Event responses may carry `Set-Meta-<Name>` headers; those are returned as
//! a metadata delta for the connection to merge (last value per name wins).

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use grip_protocol::{codec, Event, EventStreamError};
use std::sync::Arc;
use tracing::warn;

use crate::signer::Signer;

const META_HEADER_PREFIX: &str = "set-meta-";

/// Headers that must not cross a proxy hop, plus `Host` and
/// `Content-Length`, which the HTTP client regenerates itself.
const HOP_BY_HOP_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {0}")]
    Status(StatusCode),
    #[error("response decode: {0}")]
    Decode(#[from] EventStreamError),
    #[error("signing: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// Shared HTTP plumbing to one backend endpoint.
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
    signer: Option<Signer>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, signer: Option<Signer>) -> Self {
        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        HttpTransport {
            endpoint,
            client: reqwest::Client::new(),
            signer,
        }
    }

    /// Bind a per-connection channel to this transport.
    pub fn channel(self: &Arc<Self>, path: String, connection_id: String) -> BackendChannel {
        BackendChannel {
            transport: Arc::clone(self),
            path,
            connection_id,
        }
    }

    /// POST one event batch; returns the metadata delta from `Set-Meta-*`
    /// headers and the decoded reply events.
    pub async fn send_events(
        &self,
        path: &str,
        connection_id: &str,
        events: &[Event],
    ) -> Result<(Vec<(String, String)>, Vec<Event>), TransportError> {
        let body = codec::encode_events(events);

        let mut request = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .header("Connection-Id", connection_id)
            .header(header::CONTENT_TYPE, "application/websocket-events");
        if let Some(signer) = &self.signer {
            request = request.header("Grip-Sig", signer.sign()?);
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        let metadata = collect_metadata(response.headers());
        let reply = codec::decode_events(&response.bytes().await?)?;
        Ok((metadata, reply))
    }

    /// Reverse-proxy a non-upgrade client request to the backend unchanged.
    pub async fn forward_request(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let Ok(body) = axum::body::to_bytes(body, usize::MAX).await else {
            return StatusCode::BAD_REQUEST.into_response();
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str());

        let mut upstream = self
            .client
            .request(parts.method, format!("{}{}", self.endpoint, path_and_query));
        for (name, value) in &parts.headers {
            if !is_hop_by_hop(name) {
                upstream = upstream.header(name, value);
            }
        }

        match upstream.body(body).send().await {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers().clone();
                let bytes = response.bytes().await.unwrap_or_default();

                let mut proxied = Response::new(Body::from(bytes));
                *proxied.status_mut() = status;
                for (name, value) in &headers {
                    if !is_hop_by_hop(name) {
                        proxied.headers_mut().append(name, value.clone());
                    }
                }
                proxied
            }
            Err(error) => {
                warn!(%error, "failed to forward request to backend");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

fn collect_metadata(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut metadata = Vec::new();
    for (name, value) in headers {
        let name = name.as_str();
        if name.len() > META_HEADER_PREFIX.len() && name.starts_with(META_HEADER_PREFIX) {
            if let Ok(value) = value.to_str() {
                metadata.push((name[META_HEADER_PREFIX.len()..].to_string(), value.to_string()));
            }
        }
    }
    metadata
}

/// One connection's view of the transport: the upgrade path and connection id
/// ride along on every batch.
#[derive(Debug, Clone)]
pub struct BackendChannel {
    transport: Arc<HttpTransport>,
    path: String,
    connection_id: String,
}

impl BackendChannel {
    pub async fn send_events(
        &self,
        events: &[Event],
    ) -> Result<(Vec<(String, String)>, Vec<Event>), TransportError> {
        self.transport
            .send_events(&self.path, &self.connection_id, events)
            .await
    }
}
