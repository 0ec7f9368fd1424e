//! JSON wire shapes for in-band control records and the publish envelope.
//!
//! Control records ride inside backend TEXT/BINARY events behind the control
//! prefix; the publish envelope is the body of a `POST /publish` request.
//! Binary payloads (`content-bin`) are base64 strings on the wire and decode
//! to raw bytes here; a bad base64 string fails the whole record, which
//! callers treat as "silently discard".

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer};

/// A backend control directive.
///
/// Only `type` is meaningful on its own; the remaining fields matter per
/// directive and are ignored otherwise. An unrecognized `type` is ignored by
/// the receiver, so this decodes permissively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ControlRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "content-bin", default, deserialize_with = "base64_opt")]
    pub content_bin: Option<Vec<u8>>,
    #[serde(rename = "message-type", default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub mode: Option<String>,
}

// ---------------------------------------------------------------------------
// Publish envelope
// ---------------------------------------------------------------------------

/// Body of a publish request: `{"items": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PublishEnvelope {
    #[serde(default)]
    pub items: Vec<PublishItem>,
}

/// One channel publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PublishItem {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub formats: Option<PublishFormats>,
}

/// Per-transport renderings of a publication. Only the WebSocket message
/// format is supported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PublishFormats {
    #[serde(rename = "ws-message", default)]
    pub ws_message: Option<WsMessageFormat>,
}

/// The `ws-message` format: text `content` or base64 `content-bin`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WsMessageFormat {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "content-bin", default, deserialize_with = "base64_opt")]
    pub content_bin: Option<Vec<u8>>,
}

fn base64_opt<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) => BASE64
            .decode(s.as_bytes())
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
