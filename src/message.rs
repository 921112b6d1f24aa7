//! Conversation messages and the ordered message log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A single chat bubble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Still receiving chunks.
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    fn new(sender: Sender, content: impl Into<String>, streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            content: content.into(),
            timestamp: Utc::now(),
            streaming,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content, false)
    }

    #[must_use]
    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(Sender::Bot, content, false)
    }
}

/// Append-only message list.
///
/// Only the in-flight bot message (at most one) is mutated after it is
/// appended, and it is always the most recent message.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    in_flight: Option<usize>,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finished message. Refused while a reply is streaming.
    pub fn push(&mut self, message: Message) -> Option<&Message> {
        if self.in_flight.is_some() {
            return None;
        }
        self.messages.push(message);
        self.messages.last()
    }

    /// Append the empty placeholder that stream chunks will fill.
    pub fn begin_bot_message(&mut self) -> Option<&Message> {
        if self.in_flight.is_some() {
            return None;
        }
        self.messages.push(Message::new(Sender::Bot, String::new(), true));
        self.in_flight = Some(self.messages.len() - 1);
        self.messages.last()
    }

    /// Append a chunk to the in-flight message.
    pub fn append_chunk(&mut self, chunk: &str) -> Option<&Message> {
        let msg = self.in_flight_mut()?;
        msg.content.push_str(chunk);
        Some(&*msg)
    }

    /// Mark the in-flight message as finished.
    pub fn finish_in_flight(&mut self) -> Option<&Message> {
        let idx = self.in_flight.take()?;
        let msg = &mut self.messages[idx];
        msg.streaming = false;
        Some(&*msg)
    }

    /// Finish the in-flight message, replacing its text with `fallback` when
    /// nothing has streamed into it yet.
    pub fn fail_in_flight(&mut self, fallback: &str) -> Option<&Message> {
        let idx = self.in_flight.take()?;
        let msg = &mut self.messages[idx];
        if msg.content.is_empty() {
            msg.content = fallback.to_string();
        }
        msg.streaming = false;
        Some(&*msg)
    }

    /// Stop the in-flight message. It is removed if nothing streamed into it,
    /// otherwise kept as it stands. Returns whether it was removed.
    pub fn abandon_in_flight(&mut self) -> bool {
        let Some(idx) = self.in_flight.take() else {
            return false;
        };
        if self.messages[idx].content.is_empty() {
            self.messages.remove(idx);
            true
        } else {
            self.messages[idx].streaming = false;
            false
        }
    }

    /// The message currently receiving chunks.
    #[must_use]
    pub fn in_flight(&self) -> Option<&Message> {
        self.in_flight.map(|idx| &self.messages[idx])
    }

    fn in_flight_mut(&mut self) -> Option<&mut Message> {
        self.in_flight.map(|idx| &mut self.messages[idx])
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.in_flight = None;
    }
}
