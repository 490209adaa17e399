//! OpenAiClient - handles communication with OpenAI-compatible endpoints.
//!
//! One client covers the three endpoints storyforge uses: chat completions
//! (scene planning, character extraction), image generation and speech.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::config::LlmConfig;
use crate::retry::{is_transient_network_error, parse_retry_after, with_retry, RetryClass, RetryPolicy, Retryable};

/// Default base URL for the OpenAI API.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP status code for rate limiting.
const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageContent,
}

#[derive(Debug, Deserialize)]
struct ChatMessageContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

/// Client for OpenAI-compatible HTTP APIs.
pub struct OpenAiClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiClient {
    /// Build a client from the `[llm]` config section.
    ///
    /// Returns `Ok(None)` when neither an API key nor a custom endpoint is
    /// configured: callers treat that as "no text backend".
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, OpenAiError> {
        if !config.is_configured() {
            return Ok(None);
        }
        let base_url = config
            .base_url
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| OPENAI_API_BASE_URL.to_string());
        let client = Self::build(
            config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url,
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Some(client))
    }

    /// Create a client against a custom base URL.
    ///
    /// Useful for testing against a mock server.
    pub fn with_base_url(api_key: Option<String>, base_url: String, model: String) -> Result<Self, OpenAiError> {
        Self::build(api_key, base_url, model, Duration::from_secs(30))
    }

    fn build(api_key: Option<String>, base_url: String, model: String, timeout: Duration) -> Result<Self, OpenAiError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http_client,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy (tests use [`RetryPolicy::none`]).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn post(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, endpoint);
        let request = self.http_client.post(url);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Turn a non-success response into the matching error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, OpenAiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status.as_u16() == HTTP_STATUS_TOO_MANY_REQUESTS {
            let retry_after_secs = parse_retry_after(&response);
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Rate limit exceeded".to_string());
            return Err(OpenAiError::RateLimit {
                message,
                retry_after_secs,
            });
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(OpenAiError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Single chat completion; returns the first choice's text.
    pub async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String, OpenAiError> {
        with_retry(self.retry, "chat completion", move || self.chat_once(messages, temperature)).await
    }

    async fn chat_once(&self, messages: &[ChatMessage], temperature: f32) -> Result<String, OpenAiError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature,
        };
        log::debug!("POST {}/chat/completions (model {})", self.base_url, self.model);

        let response = self.post("chat/completions").json(&body).send().await?;
        let response = Self::check(response).await?;
        let parsed: ChatResponse = response.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OpenAiError::EmptyResponse("chat completion had no content".to_string()))
    }

    /// Generate one image and download it to `dest`.
    pub async fn generate_image(
        &self,
        model: &str,
        prompt: &str,
        size: &str,
        dest: &Path,
    ) -> Result<PathBuf, OpenAiError> {
        let url = with_retry(self.retry, "image generation", move || async move {
            let body = ImageRequest {
                model,
                prompt,
                size,
                quality: "standard",
                n: 1,
            };
            let response = self.post("images/generations").json(&body).send().await?;
            let response = Self::check(response).await?;
            let parsed: ImageResponse = response.json().await?;
            parsed
                .data
                .into_iter()
                .find_map(|d| d.url)
                .ok_or_else(|| OpenAiError::EmptyResponse("image generation returned no URL".to_string()))
        })
        .await?;

        self.download(&url, dest).await
    }

    /// Synthesize speech for `text` and write the MP3 body to `dest`.
    pub async fn speech(&self, model: &str, text: &str, voice: &str, dest: &Path) -> Result<PathBuf, OpenAiError> {
        let bytes = with_retry(self.retry, "speech", move || async move {
            let body = SpeechRequest {
                model,
                input: text,
                voice,
            };
            let response = self.post("audio/speech").json(&body).send().await?;
            let response = Self::check(response).await?;
            Ok::<_, OpenAiError>(response.bytes().await?)
        })
        .await?;

        if bytes.is_empty() {
            return Err(OpenAiError::EmptyResponse("speech returned no audio".to_string()));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(dest.to_path_buf())
    }

    /// Stream a file from `url` to `dest`.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf, OpenAiError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.http_client.get(url).send().await?;
        let response = Self::check(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        Ok(dest.to_path_buf())
    }
}

/// Errors that can occur talking to an OpenAI-compatible API.
#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Empty response: {0}")]
    EmptyResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for OpenAiError {
    fn retry_class(&self) -> RetryClass {
        match self {
            OpenAiError::Http(e) if is_transient_network_error(e) => RetryClass::Network,
            OpenAiError::Api { status, .. } if matches!(status, 502..=504) => RetryClass::Network,
            OpenAiError::RateLimit { retry_after_secs, .. } => RetryClass::RateLimited(*retry_after_secs),
            _ => RetryClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_unconfigured_is_none() {
        let config = LlmConfig::default();
        assert!(OpenAiClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_from_config_defaults_base_url() {
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        let client = OpenAiClient::from_config(&config).unwrap().unwrap();
        assert_eq!(client.base_url(), OPENAI_API_BASE_URL);
        assert_eq!(client.model(), "gpt-4o-mini");
        assert!(client.has_api_key());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            OpenAiClient::with_base_url(None, "http://localhost:8080/v1/".to_string(), "m".to_string()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
        assert!(!client.has_api_key());
    }

    #[test]
    fn test_retry_classes() {
        let rate = OpenAiError::RateLimit {
            message: "slow".to_string(),
            retry_after_secs: Some(3),
        };
        assert_eq!(rate.retry_class(), RetryClass::RateLimited(Some(3)));

        let gateway = OpenAiError::Api {
            status: 503,
            message: "busy".to_string(),
        };
        assert_eq!(gateway.retry_class(), RetryClass::Network);

        let bad = OpenAiError::Api {
            status: 400,
            message: "bad".to_string(),
        };
        assert_eq!(bad.retry_class(), RetryClass::Fatal);
    }

    #[test]
    fn test_chat_request_serialization() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: 0.5,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
    }
}
