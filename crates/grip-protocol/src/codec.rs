//! The `application/websocket-events` wire codec.
//!
//! Each event is one header line, CRLF-terminated, optionally followed by a
//! payload section:
//!
//! ```text
//! TYPE [SP HEXLEN] CRLF [PAYLOAD CRLF]
//! ```
//!
//! The length (and the payload section with its trailing CRLF) is present
//! exactly when the payload is non-empty. `HEXLEN` parses in either case;
//! encoding emits lowercase.
//!
//! [`EventDecoder`] is a pull decoder over a streaming source: feed it bytes
//! as they arrive and drain complete events. Partial input is buffered, never
//! consumed, and retried on the next call.

use crate::Event;

/// Errors produced while decoding an event stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventStreamError {
    /// The stream ended in the middle of an event.
    #[error("event stream truncated")]
    Truncated,
    /// The header line carried an unparseable length field.
    #[error("malformed event header: {0:?}")]
    BadHeader(String),
    /// The header line named a type outside the closed set.
    #[error("unknown event type: {0:?}")]
    UnknownType(String),
}

const CRLF: &[u8] = b"\r\n";

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Restartable streaming decoder.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly-arrived bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode the next event.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete event yet; the
    /// buffered prefix stays put and the call can be retried after more
    /// `feed`s. Bytes are consumed only when a whole event parses.
    pub fn next_event(&mut self) -> Result<Option<Event>, EventStreamError> {
        let Some(line_end) = find_crlf(&self.buf) else {
            return Ok(None);
        };
        let line = &self.buf[..line_end];

        let (label, content_len) = match line.iter().position(|&b| b == b' ') {
            Some(sp) => {
                let len_str = String::from_utf8_lossy(&line[sp + 1..]).into_owned();
                let len = usize::from_str_radix(&len_str, 16)
                    .map_err(|_| EventStreamError::BadHeader(len_str))?;
                (&line[..sp], len)
            }
            None => (line, 0),
        };

        // The payload section (payload + CRLF) exists only for non-empty
        // content.
        let payload_start = line_end + CRLF.len();
        let consumed = if content_len > 0 {
            payload_start
                .checked_add(content_len)
                .and_then(|end| end.checked_add(CRLF.len()))
                .ok_or_else(|| EventStreamError::BadHeader(format!("{content_len:x}")))?
        } else {
            payload_start
        };
        if self.buf.len() < consumed {
            return Ok(None);
        }

        let label = String::from_utf8_lossy(label).into_owned();
        let content = if content_len > 0 {
            self.buf[payload_start..payload_start + content_len].to_vec()
        } else {
            Vec::new()
        };

        let event = match label.as_str() {
            "OPEN" => Event::Open,
            "PING" => Event::Ping,
            "PONG" => Event::Pong,
            "DISCONNECT" => Event::Disconnect,
            "TEXT" => Event::Text(content),
            "BINARY" => Event::Binary(content),
            "CLOSE" => {
                if content.len() < 2 {
                    Event::Close {
                        code: 0,
                        reason: Vec::new(),
                    }
                } else {
                    Event::Close {
                        code: u16::from_be_bytes([content[0], content[1]]),
                        reason: content[2..].to_vec(),
                    }
                }
            }
            _ => return Err(EventStreamError::UnknownType(label)),
        };

        self.buf.drain(..consumed);
        Ok(Some(event))
    }

    /// Declare end of input. Leftover buffered bytes mean the stream broke
    /// off mid-event.
    pub fn finish(&self) -> Result<(), EventStreamError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(EventStreamError::Truncated)
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decode a complete event stream held in memory (e.g. an HTTP body).
pub fn decode_events(body: &[u8]) -> Result<Vec<Event>, EventStreamError> {
    let mut decoder = EventDecoder::new();
    decoder.feed(body);

    let mut events = Vec::new();
    while let Some(event) = decoder.next_event()? {
        events.push(event);
    }
    decoder.finish()?;
    Ok(events)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append one event in wire form.
pub fn encode_event(buf: &mut Vec<u8>, event: &Event) {
    buf.extend_from_slice(event.label().as_bytes());

    let content = event.content();
    if !content.is_empty() {
        buf.push(b' ');
        buf.extend_from_slice(format!("{:x}", content.len()).as_bytes());
        buf.extend_from_slice(CRLF);
        buf.extend_from_slice(&content);
    }
    buf.extend_from_slice(CRLF);
}

/// Encode a batch of events as a single body.
pub fn encode_events(events: &[Event]) -> Vec<u8> {
    let mut buf = Vec::new();
    for event in events {
        encode_event(&mut buf, event);
    }
    buf
}
