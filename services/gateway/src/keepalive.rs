//! Backend-configured keep-alive frames.
//!
//! A `keep-alive` control directive arms a per-connection timer. In idle mode
//! the frame goes out only when the outbound queue was empty at the deadline;
//! in interval mode it goes out at every deadline. Every successful transmit
//! restarts the deadline, as does a reconfiguration, so at most one deadline
//! is ever pending.

use axum::body::Bytes;
use axum::extract::ws::Message;
use grip_protocol::ControlRecord;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::connection::Connection;

#[derive(Debug, Clone)]
pub struct KeepAlive {
    pub message: Message,
    pub timeout: Duration,
    pub interval_mode: bool,
}

/// Validate a `keep-alive` control record into a config.
///
/// Returns `None` (directive silently ignored) when the timeout is absent or
/// non-positive, the message type is unrecognized, or a text/binary frame has
/// no content to send.
pub fn parse_config(record: &ControlRecord) -> Option<KeepAlive> {
    let timeout = match record.timeout {
        Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
        _ => return None,
    };

    let message = match record.message_type.as_deref() {
        None | Some("") => {
            let content = record.content.as_deref().filter(|c| !c.is_empty())?;
            Message::Text(content.to_string().into())
        }
        Some("binary") => {
            let content = record.content_bin.as_deref().filter(|c| !c.is_empty())?;
            Message::Binary(Bytes::copy_from_slice(content))
        }
        Some("ping") => Message::Ping(Bytes::new()),
        Some("pong") => Message::Pong(Bytes::new()),
        Some(_) => return None,
    };

    Some(KeepAlive {
        message,
        timeout,
        interval_mode: record.mode.as_deref() == Some("interval"),
    })
}

/// Own the keep-alive deadline for one connection.
///
/// Parks until a config is installed; afterwards each pass either fires at
/// the deadline or restarts on a reset signal (installed config change or
/// transmit completion).
pub async fn run(conn: Arc<Connection>) {
    let mut shutdown = conn.shutdown_signal();
    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(config) = conn.keep_alive_config() else {
            tokio::select! {
                () = conn.keep_alive_reset() => {}
                _ = shutdown.changed() => {}
            }
            continue;
        };

        tokio::select! {
            () = tokio::time::sleep(config.timeout) => {
                if config.interval_mode || conn.outgoing_messages_empty() {
                    debug!(connection_id = %conn.id(), "keep-alive deadline fired");
                    conn.enqueue_outgoing_message(config.message.clone());
                }
            }
            () = conn.keep_alive_reset() => {}
            _ = shutdown.changed() => {}
        }
    }
}
