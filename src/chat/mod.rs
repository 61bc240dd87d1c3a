//! Chat-completion boundary
//!
//! A [`Conversation`] is the append-only history sent with every request.
//! [`ChatCompletion`] turns that history into a lazy stream of text deltas.

mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::Result;

pub use openai::{OpenAiChat, SseDecoder};

/// Lazy, finite stream of completion text deltas
pub type DeltaStream = BoxStream<'static, Result<String>>;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    /// Create a turn
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered conversation history
///
/// Turns can only be appended; nothing is removed or rewritten.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Start a conversation with the system prompt as its first turn
    #[must_use]
    pub fn new(system_prompt: &str) -> Self {
        Self {
            turns: vec![Turn::new(Role::System, system_prompt)],
        }
    }

    /// Append a user turn
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::new(Role::User, content));
    }

    /// Append an assistant turn
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::new(Role::Assistant, content));
    }

    /// All turns in order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns, including the system prompt
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always false; the system prompt is present from the start
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recent turn
    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

/// Token-streaming chat completion
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Request a completion of `turns`, streaming text deltas
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn stream(&self, turns: &[Turn]) -> Result<DeltaStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_starts_with_system_prompt() {
        let conversation = Conversation::new("be brief");
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.turns()[0], Turn::new(Role::System, "be brief"));
    }

    #[test]
    fn turns_keep_append_order() {
        let mut conversation = Conversation::new("sys");
        conversation.push_user("hello");
        conversation.push_assistant("hi there");
        conversation.push_user("how are you");

        let roles: Vec<Role> = conversation.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(conversation.last().map(|t| t.content.as_str()), Some("how are you"));
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Turn::new(Role::Assistant, "ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
