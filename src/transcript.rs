//! Ordered, append-only log of conversation messages.
//!
//! The transcript is mutated only by the turn state machine and read by
//! whatever presentation layer observes the client. Messages are never
//! deleted within a session and are not persisted beyond it.

use chrono::{DateTime, Utc};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    /// The local user.
    User,
    /// The remote agent.
    Agent,
}

/// Kind of transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Ordinary conversation content.
    Normal,
    /// A system-generated notice (connectivity changes, fatal errors).
    Notice,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Unique within the session, generated on append.
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

/// Append-only message log.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, returning its generated id.
    pub fn push(&mut self, sender: Sender, content: String, kind: MessageKind) -> String {
        self.next_id += 1;
        let id = format!("msg_{}", self.next_id);
        self.messages.push(Message {
            id: id.clone(),
            sender,
            content,
            timestamp: Utc::now(),
            kind,
        });
        id
    }

    /// Append text to an existing message. Returns false if the id is
    /// unknown.
    pub fn append_to(&mut self, id: &str, text: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Look up a message by id.
    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// All messages in append order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The most recently appended message.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
