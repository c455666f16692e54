//! Ollama chat client
//!
//! Non-streaming calls to `/api/chat` at temperature 0. The memory agent
//! drives the conversation through markers in plain text, so no tool
//! definitions are sent.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ChatMessage, ModelClient, ModelError};

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    eval_duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Client for Ollama's /api/chat endpoint
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `model` - The model name (e.g., "qwen3")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.temperature
            }
        })
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let endpoint = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&endpoint)
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| ModelError::Unreachable {
                url: endpoint.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ModelError::MalformedCompletion {
            detail: format!("failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(ModelError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_completion(&text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn parse_completion(text: &str) -> Result<String, ModelError> {
    if text.trim().is_empty() {
        return Err(ModelError::MalformedCompletion {
            detail: "empty response from Ollama".to_string(),
        });
    }

    let chat: ChatResponse = serde_json::from_str(text).map_err(|e| ModelError::MalformedCompletion {
        detail: e.to_string(),
    })?;
    debug!(
        done = chat.done,
        eval_count = chat.eval_count,
        eval_duration_ms = chat.eval_duration / 1_000_000,
        "ollama completion"
    );

    match chat.message {
        Some(message) => Ok(message.content),
        None => Err(ModelError::MalformedCompletion {
            detail: "response has no message".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let client = OllamaClient::new("http://localhost:11434/", "qwen3");
        assert_eq!(client.base_url(), "http://localhost:11434");

        let body = client.request_body(&[ChatMessage::system("s"), ChatMessage::user("q")]);
        assert_eq!(body["model"], "qwen3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["options"]["temperature"], 0.0);
    }

    #[test]
    fn test_parse_completion() {
        let text = r#"{"model":"qwen3","message":{"role":"assistant","content":"<think>a</think><reply>b</reply>"},"done":true,"eval_count":12}"#;
        assert_eq!(parse_completion(text).unwrap(), "<think>a</think><reply>b</reply>");
    }

    #[test]
    fn test_parse_completion_errors() {
        assert!(matches!(parse_completion(""), Err(ModelError::MalformedCompletion { .. })));
        assert!(matches!(parse_completion("{not json"), Err(ModelError::MalformedCompletion { .. })));
        assert!(matches!(
            parse_completion(r#"{"done":true}"#),
            Err(ModelError::MalformedCompletion { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Port 9 (discard) is not an Ollama server
        let client = OllamaClient::new("http://127.0.0.1:9", "qwen3");
        let err = client.generate(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ModelError::Unreachable { .. }));
    }

    #[tokio::test]
    #[ignore] // Requires Ollama running on localhost:11434
    async fn test_live_completion() {
        let client = OllamaClient::new("http://localhost:11434", "qwen3");
        let text = client.generate(&[ChatMessage::user("Say hello")]).await.unwrap();
        assert!(!text.is_empty());
    }
}
