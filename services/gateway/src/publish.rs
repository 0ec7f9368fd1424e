//! JSON publish surface.
//!
//! `POST /publish` takes the items envelope and turns each entry into one
//! programmatic publish call. Only the `ws-message` format is honored:
//! `content` publishes a text frame, `content-bin` (base64) a binary one.
//! Items with no usable format are skipped.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use grip_protocol::PublishEnvelope;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::gateway::{Gateway, PublishMode};

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/publish", post(handle_publish))
        .with_state(gateway)
}

async fn handle_publish(State(gateway): State<Arc<Gateway>>, body: Bytes) -> StatusCode {
    let envelope: PublishEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(%error, "rejecting malformed publish payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    for item in envelope.items {
        if item.channel.is_empty() {
            continue;
        }
        let Some(ws_message) = item.formats.and_then(|formats| formats.ws_message) else {
            debug!(channel = %item.channel, "publish item has no ws-message format");
            continue;
        };

        if let Some(content) = ws_message.content {
            gateway.publish(&item.channel, PublishMode::Text, content.as_bytes());
        } else if let Some(content) = ws_message.content_bin {
            gateway.publish(&item.channel, PublishMode::Binary, &content);
        }
    }

    StatusCode::OK
}
