//! OpenAI image generation (DALL-E).

use std::path::Path;

use async_trait::async_trait;

use super::{save_image_bytes, ImageBackend, ImageError, ImageRequest};
use crate::config::{ImageConfig, LlmConfig};
use crate::openai::OpenAiClient;

pub struct OpenAiImageBackend {
    client: OpenAiClient,
    model: String,
}

impl OpenAiImageBackend {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Shares the key and endpoint of the `[llm]` section.
    pub fn from_config(llm: &LlmConfig, image: &ImageConfig) -> Result<Self, ImageError> {
        let client = OpenAiClient::from_config(llm)?
            .filter(OpenAiClient::has_api_key)
            .ok_or(ImageError::MissingCredentials("OPENAI_API_KEY"))?;
        Ok(Self::new(client, image.openai_model.clone()))
    }
}

/// Closest supported landscape or square size for the requested canvas.
pub fn dalle_size(width: u32, height: u32) -> &'static str {
    if width > 1024 || width > height {
        "1792x1024"
    } else if height > width {
        "1024x1792"
    } else {
        "1024x1024"
    }
}

#[async_trait]
impl ImageBackend for OpenAiImageBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, request: &ImageRequest<'_>, dest: &Path) -> Result<(), ImageError> {
        let size = dalle_size(request.width, request.height);
        self.client
            .generate_image(&self.model, request.prompt, size, dest)
            .await?;

        let bytes = tokio::fs::read(dest).await?;
        save_image_bytes(&bytes, dest, request.width, request.height)
    }
}
