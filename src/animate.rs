//! Optional image-to-video step for scene stills.
//!
//! Animation is best effort: any failure leaves the still in place and the
//! composer falls back to per-frame motion.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::assets::scene_clip_path;
use crate::config::AnimationConfig;
use crate::fal::{FalClient, FalError};

#[async_trait]
pub trait SceneAnimator: Send + Sync {
    /// Turn a still into a short clip. `None` means "use the still".
    async fn animate(&self, image: &Path) -> Option<PathBuf>;
}

/// Animator used when animation is disabled or unavailable.
pub struct NoAnimator;

#[async_trait]
impl SceneAnimator for NoAnimator {
    async fn animate(&self, _image: &Path) -> Option<PathBuf> {
        None
    }
}

/// Hosted image-to-video through the fal.ai queue.
pub struct FalAnimator {
    client: Option<FalClient>,
}

impl FalAnimator {
    pub fn new(client: FalClient) -> Self {
        Self { client: Some(client) }
    }

    /// Build from config. A missing key is not an error here: every
    /// `animate` call then logs and returns `None`.
    pub fn from_config(config: &AnimationConfig) -> Self {
        match FalClient::from_config(config) {
            Ok(client) => Self::new(client),
            Err(FalError::MissingApiKey) => Self { client: None },
            Err(e) => {
                log::warn!("Scene animation unavailable: {}", e);
                Self { client: None }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl SceneAnimator for FalAnimator {
    async fn animate(&self, image: &Path) -> Option<PathBuf> {
        let Some(client) = &self.client else {
            log::warn!("Scene animation skipped: FAL_API_KEY is not set");
            return None;
        };
        if !image.is_file() {
            log::warn!("Scene animation skipped: {} does not exist", image.display());
            return None;
        }

        let dest = scene_clip_path(image);
        match client.animate_image(image, &dest).await {
            Ok(path) => {
                log::info!("Animated {} -> {}", image.display(), path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("Scene animation failed for {}: {}", image.display(), e);
                // A partial download is worse than none.
                let _ = tokio::fs::remove_file(&dest).await;
                None
            }
        }
    }
}
