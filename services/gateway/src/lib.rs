//! gateway: WebSocket-over-HTTP bridge.
//!
//! Clients connect with plain WebSocket upgrades; the backend sees each
//! connection as a stream of `application/websocket-events` POSTs and steers
//! it with reply events and in-band control records. Non-upgrade requests
//! pass straight through to the backend, and a separate publish listener
//! fans server-side messages out to subscribed connections.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;

pub mod config;
pub mod connection;
pub mod controller;
pub mod gateway;
pub mod keepalive;
pub mod publish;
pub mod signer;
pub mod transport;

pub use config::Config;
pub use gateway::{Gateway, PublishMode};
pub use signer::Signer;
pub use transport::HttpTransport;

/// The client-facing router: every path either upgrades into a gateway
/// connection or is reverse-proxied to the backend.
pub fn app_router(gateway: Arc<Gateway>) -> Router {
    Router::new().fallback(client_entry).with_state(gateway)
}

async fn client_entry(
    State(gateway): State<Arc<Gateway>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> Response {
    match upgrade {
        Ok(upgrade) => {
            let path = request.uri().path().to_string();
            upgrade
                .on_upgrade(move |socket| async move { gateway.accept(path, socket).await })
                .into_response()
        }
        // Not an upgrade request; hand it to the backend untouched.
        Err(_) => gateway.transport().forward_request(request).await,
    }
}
