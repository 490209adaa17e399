//! Configuration file handling for storyforge.
//!
//! Loads configuration from `~/.config/storyforge/config.toml` or a custom path,
//! then lets environment variables (and a `.env` file, loaded by the binary)
//! override credentials and backend choices. The resulting [`Config`] value is
//! passed explicitly to every component; nothing reads global state later.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_API_BASE_ENV: &str = "OPENAI_API_BASE";
pub const SCENE_MODEL_ENV: &str = "SCENE_MODEL";
pub const IMAGE_BACKEND_ENV: &str = "IMAGE_BACKEND";
pub const HF_API_TOKEN_ENV: &str = "HF_API_TOKEN";
pub const REPLICATE_API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";
pub const FAL_API_KEY_ENV: &str = "FAL_API_KEY";
pub const TTS_BACKEND_ENV: &str = "TTS_BACKEND";

/// Configuration file structure for storyforge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub narration: NarrationConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
    #[serde(default)]
    pub video: VideoConfig,
}

/// OpenAI-compatible chat completion endpoint used for scene planning and
/// character extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_scene_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_scene_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    /// A text backend is configured when either a key or a custom endpoint is
    /// present (local OpenAI-compatible servers often need no key).
    pub fn is_configured(&self) -> bool {
        non_empty(&self.api_key) || non_empty(&self.base_url)
    }
}

/// Which image backend renders scene stills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackendKind {
    #[default]
    Placeholder,
    Huggingface,
    Openai,
    Replicate,
}

impl ImageBackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "placeholder" | "none" => Some(Self::Placeholder),
            "huggingface" | "hf" => Some(Self::Huggingface),
            "openai" | "dalle" | "dall-e" => Some(Self::Openai),
            "replicate" => Some(Self::Replicate),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placeholder => write!(f, "placeholder"),
            Self::Huggingface => write!(f, "huggingface"),
            Self::Openai => write!(f, "openai"),
            Self::Replicate => write!(f, "replicate"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub backend: ImageBackendKind,
    #[serde(default = "default_image_width")]
    pub width: u32,
    #[serde(default = "default_image_height")]
    pub height: u32,
    #[serde(default)]
    pub huggingface_token: Option<String>,
    #[serde(default = "default_hf_model")]
    pub huggingface_model: String,
    #[serde(default = "default_hf_base_url")]
    pub huggingface_base_url: String,
    #[serde(default = "default_openai_image_model")]
    pub openai_model: String,
    #[serde(default)]
    pub replicate_token: Option<String>,
    #[serde(default = "default_replicate_model")]
    pub replicate_model: String,
    #[serde(default = "default_replicate_base_url")]
    pub replicate_base_url: String,
    /// Prompt cache for hosted backends; `None` uses the user cache dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_cache_max_mb")]
    pub cache_max_mb: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            backend: ImageBackendKind::default(),
            width: default_image_width(),
            height: default_image_height(),
            huggingface_token: None,
            huggingface_model: default_hf_model(),
            huggingface_base_url: default_hf_base_url(),
            openai_model: default_openai_image_model(),
            replicate_token: None,
            replicate_model: default_replicate_model(),
            replicate_base_url: default_replicate_base_url(),
            cache_dir: None,
            cache_max_mb: default_cache_max_mb(),
        }
    }
}

/// Which text-to-speech engine voices the narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechBackendKind {
    #[default]
    EdgeTts,
    Openai,
}

impl SpeechBackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "edge_tts" | "edge-tts" | "edge" => Some(Self::EdgeTts),
            "openai" => Some(Self::Openai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationConfig {
    #[serde(default)]
    pub backend: SpeechBackendKind,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_edge_tts_command")]
    pub edge_tts_command: String,
    #[serde(default = "default_openai_tts_model")]
    pub openai_model: String,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            backend: SpeechBackendKind::default(),
            voice: default_voice(),
            edge_tts_command: default_edge_tts_command(),
            openai_model: default_openai_tts_model(),
        }
    }
}

/// Hosted image-to-video settings (fal.ai queue API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationConfig {
    #[serde(default)]
    pub fal_api_key: Option<String>,
    #[serde(default = "default_fal_base_url")]
    pub base_url: String,
    #[serde(default = "default_fal_model")]
    pub model: String,
    #[serde(default = "default_num_frames")]
    pub num_frames: u32,
    #[serde(default = "default_clip_fps")]
    pub fps: u32,
    #[serde(default = "default_animation_timeout")]
    pub timeout_secs: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            fal_api_key: None,
            base_url: default_fal_base_url(),
            model: default_fal_model(),
            num_frames: default_num_frames(),
            fps: default_clip_fps(),
            timeout_secs: default_animation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_true")]
    pub motion: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            motion: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_scene_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_image_width() -> u32 {
    1024
}
fn default_image_height() -> u32 {
    576
}
fn default_hf_model() -> String {
    "runwayml/stable-diffusion-v1-5".to_string()
}
fn default_hf_base_url() -> String {
    "https://api-inference.huggingface.co".to_string()
}
fn default_openai_image_model() -> String {
    "dall-e-3".to_string()
}
fn default_replicate_model() -> String {
    "stability-ai/sdxl".to_string()
}
fn default_replicate_base_url() -> String {
    "https://api.replicate.com/v1".to_string()
}
fn default_cache_max_mb() -> u64 {
    512
}
fn default_voice() -> String {
    "en-US-JennyNeural".to_string()
}
fn default_edge_tts_command() -> String {
    "edge-tts".to_string()
}
fn default_openai_tts_model() -> String {
    "tts-1".to_string()
}
fn default_fal_base_url() -> String {
    "https://queue.fal.run".to_string()
}
fn default_fal_model() -> String {
    "fal-ai/fast-svd-lcm".to_string()
}
fn default_num_frames() -> u32 {
    14
}
fn default_clip_fps() -> u32 {
    7
}
fn default_animation_timeout() -> u64 {
    180
}
fn default_fps() -> u32 {
    24
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}
fn default_video_codec() -> String {
    "libx264".to_string()
}
fn default_audio_codec() -> String {
    "aac".to_string()
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            log::debug!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Load the file and apply overrides from the process environment.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    ///
    /// Empty values are ignored. Unknown backend names are logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(OPENAI_API_KEY_ENV) {
            self.llm.api_key = Some(key);
        }
        if let Some(base) = get(OPENAI_API_BASE_ENV) {
            self.llm.base_url = Some(base);
        }
        if let Some(model) = get(SCENE_MODEL_ENV) {
            self.llm.model = model;
        }
        if let Some(name) = get(IMAGE_BACKEND_ENV) {
            match ImageBackendKind::parse(&name) {
                Some(kind) => self.image.backend = kind,
                None => log::warn!("Unknown {} '{}', keeping {}", IMAGE_BACKEND_ENV, name, self.image.backend),
            }
        }
        if let Some(token) = get(HF_API_TOKEN_ENV) {
            self.image.huggingface_token = Some(token);
        }
        if let Some(token) = get(REPLICATE_API_TOKEN_ENV) {
            self.image.replicate_token = Some(token);
        }
        if let Some(key) = get(FAL_API_KEY_ENV) {
            self.animation.fal_api_key = Some(key);
        }
        if let Some(name) = get(TTS_BACKEND_ENV) {
            match SpeechBackendKind::parse(&name) {
                Some(kind) => self.narration.backend = kind,
                None => log::warn!("Unknown {} '{}', ignoring", TTS_BACKEND_ENV, name),
            }
        }
    }

    /// Copy of the config with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        fn mask(value: &Option<String>) -> Option<String> {
            value.as_ref().map(|_| "********".to_string())
        }
        let mut copy = self.clone();
        copy.llm.api_key = mask(&self.llm.api_key);
        copy.image.huggingface_token = mask(&self.image.huggingface_token);
        copy.image.replicate_token = mask(&self.image.replicate_token);
        copy.animation.fal_api_key = mask(&self.animation.fal_api_key);
        copy
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path.display(), source)
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("storyforge").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/storyforge/config.toml")
        })
}
