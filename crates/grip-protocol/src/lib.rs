// grip-protocol: WebSocket-over-HTTP event model and wire formats.
//
// Everything the gateway and backend exchange lives here: the event sum
// type, the `application/websocket-events` codec, and the JSON shapes for
// in-band control records and the publish envelope.

use std::fmt;

pub mod codec;
pub mod control;

pub use codec::{decode_events, encode_event, encode_events, EventDecoder, EventStreamError};
pub use control::{ControlRecord, PublishEnvelope, PublishFormats, PublishItem, WsMessageFormat};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A single unit of the gateway<->backend protocol.
///
/// The four parameterless variants describe connection lifecycle; `Text` and
/// `Binary` carry payloads verbatim; `Close` carries the WebSocket close code
/// and reason. On the wire a close payload is `u16-BE(code) || reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Ping,
    Pong,
    Disconnect,
    Text(Vec<u8>),
    Binary(Vec<u8>),
    Close { code: u16, reason: Vec<u8> },
}

impl Event {
    /// The uppercase wire label for this event.
    pub fn label(&self) -> &'static str {
        match self {
            Event::Open => "OPEN",
            Event::Ping => "PING",
            Event::Pong => "PONG",
            Event::Disconnect => "DISCONNECT",
            Event::Text(_) => "TEXT",
            Event::Binary(_) => "BINARY",
            Event::Close { .. } => "CLOSE",
        }
    }

    /// The content bytes as they appear on the wire.
    ///
    /// Lifecycle events have no content. A close event always has content
    /// (at minimum the two code bytes).
    pub fn content(&self) -> Vec<u8> {
        match self {
            Event::Open | Event::Ping | Event::Pong | Event::Disconnect => Vec::new(),
            Event::Text(p) | Event::Binary(p) => p.clone(),
            Event::Close { code, reason } => {
                let mut p = Vec::with_capacity(reason.len() + 2);
                p.extend_from_slice(&code.to_be_bytes());
                p.extend_from_slice(reason);
                p
            }
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Event::Text(s.into().into_bytes())
    }

    pub fn binary(p: impl Into<Vec<u8>>) -> Self {
        Event::Binary(p.into())
    }

    pub fn close(code: u16, reason: impl Into<Vec<u8>>) -> Self {
        Event::Close {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
