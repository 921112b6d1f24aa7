//! Incremental decoder for the widget's streaming reply protocol.
//!
//! The backend answers a message with a plain streamed HTTP body of
//! newline-delimited `data: <json>` lines:
//!
//! ```text
//! data: {"type":"chunk","content":"Hel"}
//!
//! data: {"type":"chunk","content":"lo"}
//!
//! data: {"type":"complete"}
//! ```
//!
//! Network reads may split a line anywhere, including inside a multi-byte
//! UTF-8 sequence, so [`SseDecoder`] keeps the unterminated tail of each read
//! and only parses a line once its newline has arrived.
//!
//! # Example
//!
//! ```rust
//! use clayo_widget::sse::{SseDecoder, StreamEvent};
//!
//! let mut decoder = SseDecoder::new();
//! assert!(decoder.push(b"data: {\"typ").is_empty());
//! let events = decoder.push(b"e\":\"chunk\",\"content\":\"X\"}\n");
//! assert_eq!(events, vec![StreamEvent::Chunk { content: "X".to_string() }]);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::WidgetError;

/// One decoded frame of a reply stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A fragment to append to the in-flight bot message.
    Chunk {
        #[serde(default)]
        content: String,
    },
    /// The reply is finished.
    Complete,
    /// The backend gave up on this reply.
    Error {
        #[serde(default = "default_error")]
        error: String,
    },
}

fn default_error() -> String {
    "Unknown error".to_string()
}

/// Line-buffered decoder for `data:` frames.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    skipped: usize,
    last_error: Option<WidgetError>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns the events completed by it, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.drain(..=pos).collect::<Vec<_>>();
            if let Some(event) = self.decode_line(&line[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final line the stream ended without terminating.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        self.decode_line(&line)
    }

    /// Number of complete lines dropped as malformed so far.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Why the most recent malformed line was dropped.
    #[must_use]
    pub fn last_error(&self) -> Option<&WidgetError> {
        self.last_error.as_ref()
    }

    /// Bytes held back waiting for a newline.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);

        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => Some(event),
            Err(e) => {
                let err = WidgetError::Protocol(e.to_string());
                self.skipped += 1;
                tracing::debug!(error = %err, line = %data, "Skipping malformed stream frame");
                self.last_error = Some(err);
                None
            }
        }
    }
}

/// Encode an event the way the backend frames it.
pub fn encode_event(event: &StreamEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "error": e.to_string() }).to_string()
    });
    format!("data: {json}\n\n")
}
