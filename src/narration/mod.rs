//! Narration synthesis: scene text -> `narration_NNN.mp3`.

mod silence;

pub use silence::{silent_mp3, write_silent_mp3};

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::assets::narration_name;
use crate::config::{Config, SpeechBackendKind};
use crate::media;
use crate::openai::{OpenAiClient, OpenAiError};

/// Duration assumed when a narration file cannot be measured.
pub const DEFAULT_AUDIO_DURATION_SECS: f64 = 5.0;

/// Length of the silent track written for empty narration.
pub const SILENT_NARRATION_SECS: f64 = 1.0;

const OPENAI_VOICES: &[&str] = &["alloy", "ash", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer"];
const OPENAI_DEFAULT_VOICE: &str = "alloy";

#[derive(Debug, thiserror::Error)]
pub enum NarrationError {
    #[error("TTS command '{0}' not found; install it with `pip install edge-tts`")]
    CommandNotFound(String),

    #[error("TTS command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("TTS produced no audio at {0}")]
    EmptyOutput(PathBuf),

    #[error("OpenAI speech failed: {0}")]
    OpenAi(#[from] OpenAiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Speak `text` with `voice` into an MP3 at `dest`.
    async fn speak(&self, text: &str, voice: &str, dest: &Path) -> Result<(), NarrationError>;
}

/// Microsoft Edge TTS through the `edge-tts` command line tool.
pub struct EdgeTtsCli {
    command: String,
}

impl EdgeTtsCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl SpeechBackend for EdgeTtsCli {
    fn name(&self) -> &'static str {
        "edge-tts"
    }

    async fn speak(&self, text: &str, voice: &str, dest: &Path) -> Result<(), NarrationError> {
        let output = tokio::process::Command::new(&self.command)
            .arg("--voice")
            .arg(voice)
            .arg("--text")
            .arg(text)
            .arg("--write-media")
            .arg(dest)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    NarrationError::CommandNotFound(self.command.clone())
                } else {
                    NarrationError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(NarrationError::CommandFailed {
                command: self.command.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// OpenAI `audio/speech`.
pub struct OpenAiSpeech {
    client: OpenAiClient,
    model: String,
}

impl OpenAiSpeech {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

/// Map a requested voice onto one OpenAI knows; Edge voice names fall back
/// to the default.
pub fn openai_voice(voice: &str) -> &str {
    let lowered = voice.trim().to_lowercase();
    OPENAI_VOICES
        .iter()
        .copied()
        .find(|v| *v == lowered)
        .unwrap_or(OPENAI_DEFAULT_VOICE)
}

#[async_trait]
impl SpeechBackend for OpenAiSpeech {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn speak(&self, text: &str, voice: &str, dest: &Path) -> Result<(), NarrationError> {
        self.client
            .speech(&self.model, text, openai_voice(voice), dest)
            .await?;
        Ok(())
    }
}

/// Pick the speech backend named in the config.
pub fn select_speech_backend(config: &Config) -> Box<dyn SpeechBackend> {
    let narration = &config.narration;
    match narration.backend {
        SpeechBackendKind::EdgeTts => Box::new(EdgeTtsCli::new(narration.edge_tts_command.clone())),
        SpeechBackendKind::Openai => match OpenAiClient::from_config(&config.llm) {
            Ok(Some(client)) if client.has_api_key() => {
                Box::new(OpenAiSpeech::new(client, narration.openai_model.clone()))
            }
            Ok(_) => {
                log::warn!("OpenAI speech requested but OPENAI_API_KEY is not set, using edge-tts");
                Box::new(EdgeTtsCli::new(narration.edge_tts_command.clone()))
            }
            Err(e) => {
                log::warn!("OpenAI speech unavailable ({}), using edge-tts", e);
                Box::new(EdgeTtsCli::new(narration.edge_tts_command.clone()))
            }
        },
    }
}

pub struct NarrationSynthesizer {
    backend: Box<dyn SpeechBackend>,
    ffprobe: String,
}

impl NarrationSynthesizer {
    pub fn new(backend: Box<dyn SpeechBackend>, ffprobe: impl Into<String>) -> Self {
        Self {
            backend,
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(select_speech_backend(config), config.video.ffprobe.clone())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Write `narration_NNN.mp3` for one scene into `output_dir`.
    ///
    /// Blank text yields about a second of silence without calling the TTS
    /// backend. Backend failures are returned.
    pub async fn synthesize(
        &self,
        text: &str,
        scene_number: u32,
        voice: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, NarrationError> {
        tokio::fs::create_dir_all(output_dir).await?;
        let dest = output_dir.join(narration_name(scene_number));

        let text = text.trim();
        if text.is_empty() {
            log::debug!("Scene {} has no narration, writing silence", scene_number);
            write_silent_mp3(&dest, SILENT_NARRATION_SECS)?;
            return Ok(dest);
        }

        self.backend.speak(text, voice, &dest).await?;

        match tokio::fs::metadata(&dest).await {
            Ok(meta) if meta.len() > 0 => Ok(dest),
            _ => Err(NarrationError::EmptyOutput(dest)),
        }
    }

    /// Measured duration of an audio file; 5.0 when it cannot be read.
    pub fn audio_duration(&self, path: &Path) -> f64 {
        audio_duration(&self.ffprobe, path)
    }
}

/// Measured duration of an audio file; 5.0 when it cannot be read.
pub fn audio_duration(ffprobe: &str, path: &Path) -> f64 {
    media::duration_or(ffprobe, path, DEFAULT_AUDIO_DURATION_SECS)
}
