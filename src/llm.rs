//! Text-generation seam used by the scene planner and character resolver.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::LlmConfig;
use crate::openai::{ChatMessage, OpenAiClient, OpenAiError};

/// A chat-style text generator: system instruction + user prompt in, text out.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str, temperature: f32) -> Result<String, OpenAiError>;
}

#[async_trait]
impl TextBackend for OpenAiClient {
    async fn complete(&self, system: &str, user: &str, temperature: f32) -> Result<String, OpenAiError> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        self.chat(&messages, temperature).await
    }
}

/// The configured text backend, if any. A client that cannot be built is
/// logged and treated as absent.
pub fn text_backend_from_config(config: &LlmConfig) -> Option<Arc<dyn TextBackend>> {
    match OpenAiClient::from_config(config) {
        Ok(Some(client)) => {
            log::debug!("Text backend: {} at {}", client.model(), client.base_url());
            Some(Arc::new(client))
        }
        Ok(None) => None,
        Err(e) => {
            log::warn!("Text backend unavailable ({}), using local fallbacks", e);
            None
        }
    }
}

/// Strip a Markdown code fence around a model reply.
///
/// A ```` ```json ```` fence wins over a bare ```` ``` ```` one. Text without a
/// fence is returned trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();

    let inner = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text;
    };

    match inner.split_once("```") {
        Some((body, _)) => body.trim(),
        None => inner.trim(),
    }
}

/// Parse a possibly fenced JSON reply.
pub fn parse_fenced_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_code_fence(text))
}
