//! FalClient - handles communication with the fal.ai queue API.
//!
//! Only the image-to-video flow is used: a still is uploaded inline as a data
//! URI, the request is polled until it completes, and the clip is streamed to
//! disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::config::AnimationConfig;
use crate::retry::{is_transient_network_error, parse_retry_after, with_retry, RetryClass, RetryPolicy, Retryable};

/// Default base URL for the fal.ai queue API.
pub const FAL_API_BASE_URL: &str = "https://queue.fal.run";

/// Default image-to-video model.
pub const DEFAULT_MODEL: &str = "fal-ai/fast-svd-lcm";

/// Default timeout for HTTP requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a whole generation (180 seconds).
const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Default polling interval for status checks (2 seconds).
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// HTTP status code for rate limiting.
const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Request body for image-to-video generation.
#[derive(Debug, Serialize)]
struct ImageToVideoRequest {
    /// Source still, as an http(s) URL or a `data:` URI.
    image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_frames: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fps: Option<u32>,
}

/// Response from queue submission.
#[derive(Debug, Deserialize)]
pub struct QueueResponse {
    /// The unique request ID for polling.
    pub request_id: String,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub response_url: Option<String>,
}

/// Response from the status endpoint.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    response_url: Option<String>,
    /// Some deployments inline the result in the status body.
    #[serde(default)]
    video: Option<VideoOutput>,
    #[serde(default)]
    error: Option<String>,
}

/// Final result of a completed request.
#[derive(Debug, Deserialize)]
struct ResultResponse {
    video: VideoOutput,
}

#[derive(Debug, Deserialize)]
struct VideoOutput {
    url: String,
}

/// Status of a queued generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationStatus {
    /// Request is queued for processing.
    Pending,
    /// Clip is being generated.
    InProgress,
    /// Generation completed; the clip is at `video_url`, or must be fetched
    /// from `result_url`.
    Completed {
        video_url: Option<String>,
        result_url: Option<String>,
    },
    /// Generation failed with an error.
    Failed { error: String },
}

/// Client for communicating with the fal.ai API.
pub struct FalClient {
    api_key: String,
    base_url: String,
    model: String,
    num_frames: Option<u32>,
    fps: Option<u32>,
    generation_timeout: Duration,
    poll_interval: Duration,
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl FalClient {
    /// Build a client from the `[animation]` config section.
    ///
    /// Returns `FalError::MissingApiKey` when no key is configured.
    pub fn from_config(config: &AnimationConfig) -> Result<Self, FalError> {
        let api_key = config.fal_api_key.clone().unwrap_or_default();
        let mut client = Self::with_base_url(api_key, config.base_url.clone())?;
        client.model = config.model.clone();
        client.num_frames = Some(config.num_frames);
        client.fps = Some(config.fps);
        client.generation_timeout = Duration::from_secs(config.timeout_secs);
        Ok(client)
    }

    /// Create a new FalClient with an explicit API key.
    pub fn with_api_key(api_key: String) -> Result<Self, FalError> {
        Self::with_base_url(api_key, FAL_API_BASE_URL.to_string())
    }

    /// Create a new FalClient with a custom base URL.
    ///
    /// Useful for testing against a mock server.
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, FalError> {
        if api_key.trim().is_empty() {
            return Err(FalError::MissingApiKey);
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            num_frames: None,
            fps: None,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            http_client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

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

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Key {}", self.api_key))
    }

    fn request_url(&self, request_id: &str) -> String {
        format!("{}/{}/requests/{}", self.base_url, self.model, request_id)
    }

    async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response, FalError> {
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
            return Err(FalError::RateLimit {
                message,
                retry_after_secs,
            });
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(FalError::ApiError {
            status: Some(status.as_u16()),
            message: format!("{} failed: {}", context, error_text),
        })
    }

    /// Submit an image-to-video request for `image_url` to the queue.
    pub async fn submit_image_to_video(&self, image_url: &str) -> Result<QueueResponse, FalError> {
        let url = format!("{}/{}", self.base_url, self.model);
        with_retry(self.retry, "fal submit", move || {
            let url = url.clone();
            async move {
                let body = ImageToVideoRequest {
                    image_url: image_url.to_string(),
                    num_frames: self.num_frames,
                    fps: self.fps,
                };
                log::debug!("POST {}", url);
                let response = self.auth(self.http_client.post(&url)).json(&body).send().await?;
                let response = Self::check(response, "Submission").await?;
                Ok::<_, FalError>(response.json::<QueueResponse>().await?)
            }
        })
        .await
    }

    /// Check generation status for a submitted request.
    pub async fn poll_status(&self, request_id: &str) -> Result<GenerationStatus, FalError> {
        let url = format!("{}/status", self.request_url(request_id));

        let response = self.auth(self.http_client.get(&url)).send().await?;
        let response = Self::check(response, "Status check").await?;
        let status_response: StatusResponse = response.json().await?;

        match status_response.status.to_uppercase().as_str() {
            "PENDING" | "IN_QUEUE" => Ok(GenerationStatus::Pending),
            "PROCESSING" | "IN_PROGRESS" => Ok(GenerationStatus::InProgress),
            "COMPLETED" | "OK" => Ok(GenerationStatus::Completed {
                video_url: status_response.video.map(|v| v.url),
                result_url: status_response.response_url,
            }),
            "FAILED" | "ERROR" => Ok(GenerationStatus::Failed {
                error: status_response
                    .error
                    .unwrap_or_else(|| "Unknown error occurred during generation".to_string()),
            }),
            unknown => Err(FalError::ApiError {
                status: None,
                message: format!("Unknown generation status: {}", unknown),
            }),
        }
    }

    /// Fetch the result document of a completed request and return the clip URL.
    pub async fn fetch_result(&self, result_url: &str) -> Result<String, FalError> {
        let response = self.auth(self.http_client.get(result_url)).send().await?;
        let response = Self::check(response, "Result fetch").await?;
        let result: ResultResponse = response.json().await?;
        Ok(result.video.url)
    }

    /// Animate a local still and download the clip to `dest`.
    ///
    /// Submits, polls until completion or the generation timeout, then
    /// streams the clip to disk.
    pub async fn animate_image(&self, image: &Path, dest: &Path) -> Result<PathBuf, FalError> {
        use tokio::time::Instant;

        let data_uri = image_data_uri(image).await?;

        log::info!("Submitting {} for animation...", image.display());
        let queue_response = self.submit_image_to_video(&data_uri).await?;
        let request_id = &queue_response.request_id;
        log::info!("Animation submitted, request_id: {}", request_id);

        let start_time = Instant::now();
        let (video_url, result_url) = loop {
            if start_time.elapsed() > self.generation_timeout {
                log::error!("Animation timed out after {:?}", self.generation_timeout);
                return Err(FalError::Timeout);
            }

            match self.poll_status(request_id).await? {
                GenerationStatus::Pending => log::debug!("Status: pending, waiting..."),
                GenerationStatus::InProgress => log::debug!("Status: generating..."),
                GenerationStatus::Completed { video_url, result_url } => break (video_url, result_url),
                GenerationStatus::Failed { error } => {
                    return Err(FalError::ApiError {
                        status: None,
                        message: format!("Generation failed: {}", error),
                    });
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        };

        let video_url = match video_url {
            Some(url) => url,
            None => {
                let result_url = result_url
                    .or(queue_response.response_url.clone())
                    .unwrap_or_else(|| self.request_url(request_id));
                self.fetch_result(&result_url).await?
            }
        };

        log::debug!("Downloading clip from: {}", video_url);
        self.download_video(&video_url, dest).await
    }

    /// Download a clip from a URL to disk without buffering it in memory.
    pub async fn download_video(&self, url: &str, dest: &Path) -> Result<PathBuf, FalError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.http_client.get(url).send().await?;
        let response = Self::check(response, "Video download").await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;

        Ok(dest.to_path_buf())
    }
}

/// MIME type for an image path, by extension.
pub fn image_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

/// Read an image into a base64 `data:` URI.
pub async fn image_data_uri(path: &Path) -> Result<String, FalError> {
    let bytes = tokio::fs::read(path).await?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", image_mime_type(path), encoded))
}

/// Errors that can occur during fal.ai operations.
#[derive(Debug, thiserror::Error)]
pub enum FalError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {message}")]
    ApiError { status: Option<u16>, message: String },

    #[error("Generation timed out")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after_secs: Option<u64>,
    },
}

impl Retryable for FalError {
    fn retry_class(&self) -> RetryClass {
        match self {
            FalError::HttpError(e) if is_transient_network_error(e) => RetryClass::Network,
            FalError::ApiError {
                status: Some(502..=504),
                ..
            } => RetryClass::Network,
            FalError::RateLimit { retry_after_secs, .. } => RetryClass::RateLimited(*retry_after_secs),
            _ => RetryClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_api_key_empty_returns_error() {
        assert!(matches!(
            FalClient::with_api_key(String::new()),
            Err(FalError::MissingApiKey)
        ));
        assert!(matches!(
            FalClient::with_api_key("   ".to_string()),
            Err(FalError::MissingApiKey)
        ));
    }

    #[test]
    fn test_from_config_without_key_is_missing() {
        let config = AnimationConfig::default();
        assert!(matches!(FalClient::from_config(&config), Err(FalError::MissingApiKey)));
    }

    #[test]
    fn test_from_config_applies_settings() {
        let config = AnimationConfig {
            fal_api_key: Some("key".to_string()),
            base_url: "http://localhost:1234/".to_string(),
            model: "fal-ai/other".to_string(),
            ..AnimationConfig::default()
        };
        let client = FalClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:1234");
        assert_eq!(client.model(), "fal-ai/other");
        assert_eq!(client.num_frames, Some(14));
        assert_eq!(client.fps, Some(7));
    }

    #[test]
    fn test_request_url_format() {
        let client = FalClient::with_api_key("test-key".to_string()).unwrap();
        assert_eq!(
            client.request_url("abc123"),
            "https://queue.fal.run/fal-ai/fast-svd-lcm/requests/abc123"
        );
    }

    #[test]
    fn test_request_serialization_skips_unset_fields() {
        let request = ImageToVideoRequest {
            image_url: "data:image/png;base64,AAAA".to_string(),
            num_frames: None,
            fps: Some(7),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["image_url"], "data:image/png;base64,AAAA");
        assert_eq!(json["fps"], 7);
        assert!(json.get("num_frames").is_none());
    }

    #[test]
    fn test_status_response_deserialization() {
        let pending: StatusResponse = serde_json::from_str(r#"{"status": "IN_QUEUE"}"#).unwrap();
        assert_eq!(pending.status, "IN_QUEUE");
        assert!(pending.video.is_none());

        let done: StatusResponse = serde_json::from_str(
            r#"{"status": "COMPLETED", "response_url": "https://queue.fal.run/x/requests/1"}"#,
        )
        .unwrap();
        assert_eq!(done.response_url.as_deref(), Some("https://queue.fal.run/x/requests/1"));
    }

    #[test]
    fn test_image_mime_type() {
        assert_eq!(image_mime_type(Path::new("a.PNG")), "image/png");
        assert_eq!(image_mime_type(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(image_mime_type(Path::new("a.webp")), "image/webp");
        assert_eq!(image_mime_type(Path::new("noext")), "image/png");
    }

    #[tokio::test]
    async fn test_image_data_uri_encodes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.jpg");
        std::fs::write(&path, b"abc").unwrap();
        let uri = image_data_uri(&path).await.unwrap();
        assert_eq!(uri, "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn test_retry_classes() {
        let gateway = FalError::ApiError {
            status: Some(502),
            message: "bad gateway".to_string(),
        };
        assert_eq!(gateway.retry_class(), RetryClass::Network);
        let bad = FalError::ApiError {
            status: Some(422),
            message: "invalid".to_string(),
        };
        assert_eq!(bad.retry_class(), RetryClass::Fatal);
        assert_eq!(FalError::Timeout.retry_class(), RetryClass::Fatal);
    }

    #[test]
    fn test_fal_error_display() {
        assert_eq!(FalError::MissingApiKey.to_string(), "API key not configured");
        assert_eq!(FalError::Timeout.to_string(), "Generation timed out");
    }
}
