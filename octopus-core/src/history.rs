//! Conversation history.
//!
//! The full transcript is kept for the life of a session; prompt builders
//! only ever look at a trailing window of it.

use serde::{Deserialize, Serialize};

/// Who said a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered player commands and narrator replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHistory(Vec<ChatMessage>);

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.0.push(message);
    }

    /// Record a completed exchange: the player's command and the reply.
    pub fn record_exchange(&mut self, command: &str, narrative: &str) {
        self.0.push(ChatMessage::user(command));
        self.0.push(ChatMessage::assistant(narrative));
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[ChatMessage] {
        let start = self.0.len().saturating_sub(n);
        &self.0[start..]
    }

    /// Render the last `n` messages as a plain transcript.
    pub fn transcript(&self, n: usize) -> String {
        self.recent(n)
            .iter()
            .map(|m| {
                let speaker = match m.role {
                    Role::System => "System",
                    Role::User => "Player",
                    Role::Assistant => "Narrator",
                };
                format!("{speaker}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_window() {
        let mut history = MessageHistory::new();
        for i in 0..5 {
            history.push(ChatMessage::user(format!("command {i}")));
        }

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "command 3");
        assert_eq!(history.recent(50).len(), 5);
    }

    #[test]
    fn test_transcript_labels_speakers() {
        let mut history = MessageHistory::new();
        history.record_exchange("look", "A dark room.");
        assert_eq!(history.transcript(10), "Player: look\nNarrator: A dark room.");
    }
}
