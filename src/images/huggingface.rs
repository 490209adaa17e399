//! Hugging Face hosted inference (Stable Diffusion text-to-image).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{check_response, save_image_bytes, ImageBackend, ImageError, ImageRequest};
use crate::config::ImageConfig;
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    width: u32,
    height: u32,
    num_inference_steps: u32,
}

pub struct HuggingFaceBackend {
    token: String,
    base_url: String,
    model: String,
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl HuggingFaceBackend {
    pub fn from_config(config: &ImageConfig) -> Result<Self, ImageError> {
        let token = config
            .huggingface_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ImageError::MissingCredentials("HF_API_TOKEN"))?;
        Self::with_base_url(token, config.huggingface_base_url.clone(), config.huggingface_model.clone())
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
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model)
    }
}

#[async_trait]
impl ImageBackend for HuggingFaceBackend {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    async fn generate(&self, request: &ImageRequest<'_>, dest: &Path) -> Result<(), ImageError> {
        let url = self.endpoint();
        let body = InferenceRequest {
            inputs: request.prompt,
            parameters: InferenceParameters {
                width: request.width,
                height: request.height,
                num_inference_steps: 25,
            },
        };

        let (url, body) = (&url, &body);

        // A cold model answers 503 while loading; that is retried as a
        // network failure.
        let bytes = with_retry(self.retry, "huggingface inference", move || async move {
            log::debug!("POST {}", url);
            let response = self
                .http_client
                .post(url)
                .bearer_auth(&self.token)
                .header("Accept", "image/png")
                .json(body)
                .send()
                .await?;
            let response = check_response(response).await?;
            Ok::<_, ImageError>(response.bytes().await?)
        })
        .await?;

        if bytes.is_empty() {
            return Err(ImageError::InvalidResponse("empty image body".to_string()));
        }
        save_image_bytes(&bytes, dest, request.width, request.height)
    }
}
