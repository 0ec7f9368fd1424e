//! Splits backend DATA event payloads into control directives and
//! passthrough messages.
//!
//! A payload starting with the control prefix is a JSON control record; one
//! starting with the message prefix (or any payload, when the message prefix
//! is empty) is forwarded to the client with the prefix stripped. Anything
//! else is dropped. Malformed control JSON is dropped too; the connection
//! carries on.

use grip_protocol::ControlRecord;
use tracing::debug;

pub const DEFAULT_CONTROL_PREFIX: &[u8] = b"c:";
pub const DEFAULT_MESSAGE_PREFIX: &[u8] = b"m:";

#[derive(Debug, Clone)]
pub struct Controller {
    control_prefix: Vec<u8>,
    message_prefix: Vec<u8>,
}

/// What a backend DATA payload turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Control(ControlRecord),
    Message(Vec<u8>),
    Ignore,
}

impl Default for Controller {
    fn default() -> Self {
        Controller {
            control_prefix: DEFAULT_CONTROL_PREFIX.to_vec(),
            message_prefix: DEFAULT_MESSAGE_PREFIX.to_vec(),
        }
    }
}

impl Controller {
    pub fn with_prefixes(control_prefix: Vec<u8>, message_prefix: Vec<u8>) -> Self {
        Controller {
            control_prefix,
            message_prefix,
        }
    }

    pub fn interpret(&self, payload: &[u8]) -> Interpretation {
        if payload.starts_with(&self.control_prefix) {
            let body = &payload[self.control_prefix.len()..];
            return match serde_json::from_slice::<ControlRecord>(body) {
                Ok(record) => Interpretation::Control(record),
                Err(error) => {
                    debug!(%error, "discarding malformed control record");
                    Interpretation::Ignore
                }
            };
        }

        if self.message_prefix.is_empty() {
            return Interpretation::Message(payload.to_vec());
        }
        if payload.starts_with(&self.message_prefix) {
            return Interpretation::Message(payload[self.message_prefix.len()..].to_vec());
        }

        Interpretation::Ignore
    }
}
