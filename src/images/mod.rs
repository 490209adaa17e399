//! Scene and character image generation.
//!
//! One [`ImageBackend`] is chosen from configuration. [`FallbackImageGenerator`]
//! wraps it so that any backend failure degrades to a placeholder still at the
//! same path: a run never stops because an image service misbehaved.

mod cache;
mod dalle;
mod huggingface;
mod placeholder;
mod prompt;
mod replicate;

pub use cache::ImageCache;
pub use dalle::OpenAiImageBackend;
pub use huggingface::HuggingFaceBackend;
pub use placeholder::{render as render_placeholder, short_caption, write_placeholder, PlaceholderBackend};
pub use prompt::{character_hint, portrait_prompt, truncate_words, ScenePrompt, MAX_PROMPT_WORDS};
pub use replicate::ReplicateBackend;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::imageops::FilterType;

use crate::assets::{character_portrait_name, scene_image_name, CHARACTERS_DIR_NAME};
use crate::config::{Config, ImageBackendKind};
use crate::openai::OpenAiError;
use crate::retry::{is_transient_network_error, parse_retry_after, RetryClass, Retryable};

/// HTTP status code for rate limiting.
const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// One image to render.
///
/// Hosted backends use `prompt`; the placeholder draws `title` and `caption`.
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    pub prompt: &'a str,
    pub title: &'a str,
    pub caption: &'a str,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Short identifier, also part of the cache key.
    fn name(&self) -> &'static str;

    /// Render `request` as a PNG at `dest`.
    async fn generate(&self, request: &ImageRequest<'_>, dest: &Path) -> Result<(), ImageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("{0} is not configured")]
    MissingCredentials(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("OpenAI error: {0}")]
    OpenAi(#[from] OpenAiError),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Generation timed out")]
    Timeout,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for ImageError {
    fn retry_class(&self) -> RetryClass {
        match self {
            ImageError::Http(e) if is_transient_network_error(e) => RetryClass::Network,
            ImageError::Api { status, .. } if matches!(status, 502..=504) => RetryClass::Network,
            ImageError::RateLimit { retry_after_secs, .. } => RetryClass::RateLimited(*retry_after_secs),
            _ => RetryClass::Fatal,
        }
    }
}

/// Turn a non-success response into the matching error.
pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ImageError> {
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
        return Err(ImageError::RateLimit {
            message,
            retry_after_secs,
        });
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ImageError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Decode an encoded image, crop-resize it to `width`x`height` and save as PNG.
pub fn save_image_bytes(bytes: &[u8], dest: &Path, width: u32, height: u32) -> Result<(), ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let fitted = if decoded.width() == width && decoded.height() == height {
        decoded
    } else {
        decoded.resize_to_fill(width.max(1), height.max(1), FilterType::Lanczos3)
    };
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    fitted.to_rgb8().save_with_format(dest, image::ImageFormat::Png)?;
    Ok(())
}

/// Serves repeated prompts from an [`ImageCache`] before calling the backend.
pub struct CachedBackend {
    inner: Box<dyn ImageBackend>,
    cache: ImageCache,
}

impl CachedBackend {
    pub fn new(inner: Box<dyn ImageBackend>, cache: ImageCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl ImageBackend for CachedBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn generate(&self, request: &ImageRequest<'_>, dest: &Path) -> Result<(), ImageError> {
        let key = ImageCache::key(self.inner.name(), request.prompt, request.width, request.height);

        if let Some(hit) = self.cache.get(&key) {
            log::debug!("Image cache hit {} -> {}", key, dest.display());
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&hit, dest)?;
            return Ok(());
        }

        self.inner.generate(request, dest).await?;

        if let Err(e) = self.cache.store(&key, dest) {
            log::warn!("Could not cache image {}: {}", dest.display(), e);
        }
        Ok(())
    }
}

/// Build the backend named in the config, fronted by the prompt cache for
/// hosted backends. A backend that cannot be built is logged and replaced by
/// the placeholder.
pub fn select_backend(config: &Config) -> Box<dyn ImageBackend> {
    let image = &config.image;

    let hosted: Result<Box<dyn ImageBackend>, ImageError> = match image.backend {
        ImageBackendKind::Placeholder => return Box::new(PlaceholderBackend),
        ImageBackendKind::Huggingface => HuggingFaceBackend::from_config(image).map(|b| Box::new(b) as _),
        ImageBackendKind::Openai => OpenAiImageBackend::from_config(&config.llm, image).map(|b| Box::new(b) as _),
        ImageBackendKind::Replicate => ReplicateBackend::from_config(image).map(|b| Box::new(b) as _),
    };

    match hosted {
        Ok(backend) if image.cache_max_mb > 0 => {
            let dir = image.cache_dir.clone().unwrap_or_else(ImageCache::default_dir);
            Box::new(CachedBackend::new(backend, ImageCache::new(dir, image.cache_max_mb)))
        }
        Ok(backend) => backend,
        Err(e) => {
            log::warn!("Image backend '{}' unavailable ({}), using placeholder images", image.backend, e);
            Box::new(PlaceholderBackend)
        }
    }
}

/// Image generator with a uniform placeholder fallback.
pub struct FallbackImageGenerator {
    backend: Box<dyn ImageBackend>,
    width: u32,
    height: u32,
}

impl FallbackImageGenerator {
    pub fn new(backend: Box<dyn ImageBackend>, width: u32, height: u32) -> Self {
        Self {
            backend,
            width,
            height,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(select_backend(config), config.image.width, config.image.height)
    }

    /// Generator that only draws placeholders.
    pub fn placeholder(width: u32, height: u32) -> Self {
        Self::new(Box::new(PlaceholderBackend), width, height)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Render the still for one scene as `scene_NNN.png` in `output_dir`.
    ///
    /// Only a failure to write the placeholder itself is returned as an error.
    pub async fn generate(&self, scene: &ScenePrompt<'_>, output_dir: &Path) -> Result<PathBuf, ImageError> {
        let prompt = scene.build();
        let title = format!("Scene {}", scene.scene_number);
        let request = ImageRequest {
            prompt: &prompt,
            title: &title,
            caption: scene.description,
            width: self.width,
            height: self.height,
        };
        let dest = output_dir.join(scene_image_name(scene.scene_number));
        self.generate_with_fallback(&request, &dest).await
    }

    /// Render a square reference portrait as `characters/character_<name>.png`.
    pub async fn generate_character_portrait(
        &self,
        name: &str,
        description: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, ImageError> {
        let prompt = portrait_prompt(name, description);
        let request = ImageRequest {
            prompt: &prompt,
            title: name,
            caption: description,
            width: self.height,
            height: self.height,
        };
        let dest = output_dir
            .join(CHARACTERS_DIR_NAME)
            .join(character_portrait_name(name));
        self.generate_with_fallback(&request, &dest).await
    }

    async fn generate_with_fallback(&self, request: &ImageRequest<'_>, dest: &Path) -> Result<PathBuf, ImageError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        log::debug!("[{}] {}", self.backend.name(), request.prompt);
        match self.backend.generate(request, dest).await {
            Ok(()) => Ok(dest.to_path_buf()),
            Err(e) => {
                log::warn!(
                    "Image backend '{}' failed for {} ({}), using placeholder",
                    self.backend.name(),
                    dest.display(),
                    e
                );
                let _ = std::fs::remove_file(dest);
                write_placeholder(request.title, request.caption, dest, request.width, request.height)
            }
        }
    }
}
