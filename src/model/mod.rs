//! Model client contract
//!
//! The controller only sees [`ModelClient`]: hand it the conversation so
//! far, get back the raw completion text. [`OllamaClient`] is the bundled
//! implementation.

pub mod ollama;

pub use ollama::OllamaClient;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

/// A message in a chat conversation
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

/// Failures talking to the model backend. Always fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The backend could not be reached at all
    #[error("model backend unreachable at {url}: {detail}")]
    Unreachable { url: String, detail: String },

    /// The backend answered with an error status
    #[error("model backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The backend answered, but not with a usable completion
    #[error("malformed completion: {detail}")]
    MalformedCompletion { detail: String },
}

/// Stateless text generation over a conversation.
///
/// `messages` is the full history, system prompt first. Retries, if any,
/// belong to the implementation.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;

    /// Model name, for logs and transcripts.
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_string(&ChatMessage::assistant("<think>x</think>")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"<think>x</think>"}"#);

        let back: ChatMessage = serde_json::from_str(r#"{"role":"system","content":"hi"}"#).unwrap();
        assert_eq!(back, ChatMessage::system("hi"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
    }
}
