//! Conversation history
//!
//! An append-only log of chat messages. The first entry is always the
//! system prompt; user and assistant messages follow in turn order.

use serde::{Deserialize, Serialize};

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions set once at startup
    System,
    /// Transcribed speech from the user
    User,
    /// Generated response
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the message
    pub role: Role,

    /// Message text
    pub content: String,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered, append-only conversation history
///
/// Messages can only be added at the end and are never edited afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// Start a history with its system prompt
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(Role::System, system_prompt)],
        }
    }

    /// Append a user message
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::User, content));
    }

    /// Append an assistant message
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::Assistant, content));
    }

    /// All messages in chronological order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The system prompt this history was created with
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        self.messages
            .first()
            .map_or("", |m| m.content.as_str())
    }

    /// Most recent message
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages, including the system prompt
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false: the system prompt is present from construction
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of completed exchanges (assistant replies)
    #[must_use]
    pub fn turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }
}
