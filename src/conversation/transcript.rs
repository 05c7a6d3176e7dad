//! Conversation transcript
//!
//! Append-only message log for a session. The chat-context window is the
//! trailing slice of messages that existed before the current user message
//! was appended.

use crate::services::HistoryEntry;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One transcript entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The session's ordered message log
#[derive(Debug, Default)]
pub struct Transcript {
    messages: RwLock<Vec<Message>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript seeded with the assistant's greeting
    pub fn with_greeting(assistant_name: &str) -> Self {
        let transcript = Self::new();
        transcript.add(Role::Assistant, greeting(assistant_name));
        transcript
    }

    /// Append a message and return a copy of the stored entry
    pub fn add(&self, role: Role, content: impl Into<String>) -> Message {
        let message = Message::new(role, content);
        self.messages.write().push(message.clone());
        message
    }

    /// The trailing `window` messages, shaped for the chat call
    pub fn recent(&self, window: usize) -> Vec<HistoryEntry> {
        let messages = self.messages.read();
        let skip = messages.len().saturating_sub(window);
        messages[skip..]
            .iter()
            .map(|m| HistoryEntry {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    pub fn all(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Drop all messages and reseed the greeting
    pub fn reset(&self, assistant_name: &str) {
        let mut messages = self.messages.write();
        messages.clear();
        messages.push(Message::new(Role::Assistant, greeting(assistant_name)));
    }
}

fn greeting(assistant_name: &str) -> String {
    format!(
        "Hey! I'm {}, your personal AI assistant. How can I help you today?",
        assistant_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_seed() {
        let transcript = Transcript::with_greeting("Nova");
        let all = transcript.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].role, Role::Assistant);
        assert!(all[0].content.contains("Nova"));
    }

    #[test]
    fn test_recent_is_a_trailing_window() {
        let transcript = Transcript::new();
        for i in 0..15 {
            transcript.add(Role::User, format!("message {}", i));
        }

        let recent = transcript.recent(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].content, "message 5");
        assert_eq!(recent[9].content, "message 14");
    }

    #[test]
    fn test_recent_with_short_transcript() {
        let transcript = Transcript::new();
        transcript.add(Role::User, "hello");
        assert_eq!(transcript.recent(10).len(), 1);
        assert!(Transcript::new().recent(10).is_empty());
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let recent = {
            let transcript = Transcript::new();
            transcript.add(Role::Assistant, "hi");
            transcript.recent(10)
        };
        assert_eq!(recent[0].role, "assistant");
    }

    #[test]
    fn test_reset_reseeds_greeting() {
        let transcript = Transcript::with_greeting("Nova");
        transcript.add(Role::User, "hello");
        transcript.reset("Nova");

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.all()[0].role, Role::Assistant);
    }
}
