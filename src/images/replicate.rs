//! Replicate hosted predictions (SDXL and compatible text-to-image models).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{check_response, save_image_bytes, ImageBackend, ImageError, ImageRequest};
use crate::config::ImageConfig;
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(180);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    /// First output URL; models return either a string or a list of them.
    fn output_url(&self) -> Option<String> {
        match self.output.as_ref()? {
            Value::String(url) => Some(url.clone()),
            Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
            _ => None,
        }
    }

    fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(message)) => message.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => format!("prediction {}", self.status),
        }
    }
}

pub struct ReplicateBackend {
    token: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
    generation_timeout: Duration,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl ReplicateBackend {
    pub fn from_config(config: &ImageConfig) -> Result<Self, ImageError> {
        let token = config
            .replicate_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ImageError::MissingCredentials("REPLICATE_API_TOKEN"))?;
        Self::with_base_url(token, config.replicate_base_url.clone(), config.replicate_model.clone())
    }

    pub fn with_base_url(token: String, base_url: String, model: String) -> Result<Self, ImageError> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http_client,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
        })
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

    /// Endpoint and body for a new prediction.
    ///
    /// `owner/name:version` pins a version through `/predictions`; a bare
    /// `owner/name` uses the model's latest deployment.
    fn submission(&self, request: &ImageRequest<'_>) -> (String, Value) {
        let input = json!({
            "prompt": request.prompt,
            "width": request.width,
            "height": request.height,
        });
        match self.model.split_once(':') {
            Some((_, version)) => (
                format!("{}/predictions", self.base_url),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!("{}/models/{}/predictions", self.base_url, self.model),
                json!({ "input": input }),
            ),
        }
    }

    async fn get_prediction(&self, url: &str) -> Result<Prediction, ImageError> {
        let response = self.http_client.get(url).bearer_auth(&self.token).send().await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn run_prediction(&self, request: &ImageRequest<'_>) -> Result<String, ImageError> {
        use tokio::time::Instant;

        let (url, body) = self.submission(request);
        let (url, body) = (&url, &body);
        let mut prediction = with_retry(self.retry, "replicate submit", move || async move {
            log::debug!("POST {}", url);
            let response = self
                .http_client
                .post(url)
                .bearer_auth(&self.token)
                .json(body)
                .send()
                .await?;
            let response = check_response(response).await?;
            Ok::<_, ImageError>(response.json::<Prediction>().await?)
        })
        .await?;

        let poll_url = prediction
            .urls
            .as_ref()
            .and_then(|u| u.get.clone())
            .unwrap_or_else(|| format!("{}/predictions/{}", self.base_url, prediction.id));

        let start_time = Instant::now();
        while !prediction.is_terminal() {
            if start_time.elapsed() > self.generation_timeout {
                return Err(ImageError::Timeout);
            }
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_prediction(&poll_url).await?;
            log::debug!("Replicate prediction {}: {}", prediction.id, prediction.status);
        }

        if prediction.status != "succeeded" {
            return Err(ImageError::InvalidResponse(prediction.error_message()));
        }
        prediction
            .output_url()
            .ok_or_else(|| ImageError::InvalidResponse("prediction succeeded without an output URL".to_string()))
    }
}

#[async_trait]
impl ImageBackend for ReplicateBackend {
    fn name(&self) -> &'static str {
        "replicate"
    }

    async fn generate(&self, request: &ImageRequest<'_>, dest: &Path) -> Result<(), ImageError> {
        let output_url = self.run_prediction(request).await?;

        let response = self.http_client.get(&output_url).send().await?;
        let response = check_response(response).await?;
        let bytes = response.bytes().await?;
        save_image_bytes(&bytes, dest, request.width, request.height)
    }
}
