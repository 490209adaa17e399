//! Story-to-video orchestration.
//!
//! Runs every stage sequentially in scene order. Two entry points share the
//! composer: [`Pipeline::run_fresh`] plans and generates everything, while
//! [`Pipeline::run_existing`] rebuilds a video from the assets a previous run
//! left in `<output_dir>/run`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::animate::{FalAnimator, SceneAnimator};
use crate::assets::{self, RUN_DIR_NAME};
use crate::characters::{CharacterError, CharacterResolver};
use crate::compose::{ComposeError, FfmpegComposer, VideoComposer};
use crate::config::Config;
use crate::images::{FallbackImageGenerator, ImageError, ScenePrompt};
use crate::llm::text_backend_from_config;
use crate::models::{CharacterDescription, Scene, SceneBreakdown};
use crate::narration::{NarrationError, NarrationSynthesizer};
use crate::planner::{PlanError, ScenePlanner};

/// Title of the breakdown returned by a reuse run.
pub const EXISTING_RUN_TITLE: &str = "Existing run";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Story text is empty")]
    EmptyStory,

    #[error("Images folder not found: {}", .0.display())]
    ImagesDirNotFound(PathBuf),

    #[error("Characters file not found: {}", .0.display())]
    CharactersFileNotFound(PathBuf),

    #[error("No scene images found in {}", .0.display())]
    NoExistingAssets(PathBuf),

    #[error("Found {images} scene images but only {narration} narration files")]
    NarrationCountMismatch { images: usize, narration: usize },

    #[error("Scene {requested} is out of range (run has {available} scenes)")]
    SceneOutOfRange { requested: usize, available: usize },

    #[error("Interrupted")]
    Interrupted,

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Characters(CharacterError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Narration(#[from] NarrationError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Composer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<CharacterError> for PipelineError {
    fn from(e: CharacterError) -> Self {
        match e {
            CharacterError::NotFound(path) => PipelineError::CharactersFileNotFound(path),
            other => PipelineError::Characters(other),
        }
    }
}

/// Inputs for a run that starts from story text.
#[derive(Debug, Clone)]
pub struct FreshRunRequest {
    pub story: String,
    pub output_dir: PathBuf,
    pub output_filename: String,
    pub voice: String,
    /// Use these images (natural-sorted) instead of generating.
    pub images_dir: Option<PathBuf>,
    pub characters_file: Option<PathBuf>,
    pub analyze_characters: bool,
    pub visual_instruction: Option<String>,
    pub movable: bool,
    pub character_images: bool,
    pub animate_scenes: bool,
    pub motion: bool,
}

impl FreshRunRequest {
    pub fn new(story: impl Into<String>, output_dir: impl Into<PathBuf>, output_filename: impl Into<String>) -> Self {
        Self {
            story: story.into(),
            output_dir: output_dir.into(),
            output_filename: output_filename.into(),
            voice: crate::config::NarrationConfig::default().voice,
            images_dir: None,
            characters_file: None,
            analyze_characters: false,
            visual_instruction: None,
            movable: true,
            character_images: false,
            animate_scenes: false,
            motion: true,
        }
    }
}

/// Inputs for a run that recomposes assets from `<output_dir>/run`.
#[derive(Debug, Clone)]
pub struct ReuseRunRequest {
    pub output_dir: PathBuf,
    pub output_filename: String,
    pub animate_scenes: bool,
    /// 1-based scene to compose on its own.
    pub only_scene: Option<usize>,
    pub motion: bool,
}

impl ReuseRunRequest {
    pub fn new(output_dir: impl Into<PathBuf>, output_filename: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            output_filename: output_filename.into(),
            animate_scenes: false,
            only_scene: None,
            motion: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunRequest {
    Fresh(FreshRunRequest),
    Reuse(ReuseRunRequest),
}

pub struct Pipeline {
    planner: ScenePlanner,
    characters: CharacterResolver,
    images: FallbackImageGenerator,
    animator: Arc<dyn SceneAnimator>,
    narrator: NarrationSynthesizer,
    composer: Arc<dyn VideoComposer>,
    interrupt: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        planner: ScenePlanner,
        characters: CharacterResolver,
        images: FallbackImageGenerator,
        animator: Arc<dyn SceneAnimator>,
        narrator: NarrationSynthesizer,
        composer: Arc<dyn VideoComposer>,
    ) -> Self {
        Self {
            planner,
            characters,
            images,
            animator,
            narrator,
            composer,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire every component from the configuration.
    pub fn from_config(config: &Config) -> Self {
        let text = text_backend_from_config(&config.llm);
        let images = FallbackImageGenerator::from_config(config);
        let narrator = NarrationSynthesizer::from_config(config);

        log::debug!(
            "Backends: planner={}, images={}, speech={}",
            if text.is_some() { "llm" } else { "local" },
            images.backend_name(),
            narrator.backend_name()
        );

        Self::new(
            ScenePlanner::new(text.clone()),
            CharacterResolver::new(text),
            images,
            Arc::new(FalAnimator::from_config(&config.animation)),
            narrator,
            Arc::new(FfmpegComposer::new(&config.video)),
        )
    }

    /// Share a flag that, once set, stops the run at the next scene boundary.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    fn check_interrupt(&self) -> Result<(), PipelineError> {
        if self.interrupt.load(Ordering::SeqCst) {
            return Err(PipelineError::Interrupted);
        }
        Ok(())
    }

    pub async fn run(&self, request: RunRequest) -> Result<(PathBuf, SceneBreakdown), PipelineError> {
        match request {
            RunRequest::Fresh(request) => self.run_fresh(request).await,
            RunRequest::Reuse(request) => self.run_existing(request).await,
        }
    }

    /// Story -> scenes -> images -> (clips) -> narration -> video.
    pub async fn run_fresh(&self, request: FreshRunRequest) -> Result<(PathBuf, SceneBreakdown), PipelineError> {
        if request.story.trim().is_empty() {
            return Err(PipelineError::EmptyStory);
        }
        if let Some(dir) = &request.images_dir {
            if !dir.is_dir() {
                return Err(PipelineError::ImagesDirNotFound(dir.clone()));
            }
        }
        if let Some(file) = &request.characters_file {
            if !file.is_file() {
                return Err(PipelineError::CharactersFileNotFound(file.clone()));
            }
        }

        let run_dir = request.output_dir.join(RUN_DIR_NAME);
        tokio::fs::create_dir_all(&run_dir).await?;

        log::info!("[1/4] Breaking story into scenes...");
        let breakdown = self.planner.plan(&request.story).await?;
        log::info!("      -> {} scenes: {}", breakdown.len(), breakdown.title);
        self.check_interrupt()?;

        let characters = self
            .characters
            .resolve(request.characters_file.as_deref(), &request.story, request.analyze_characters)
            .await?;
        if request.character_images && !characters.is_empty() {
            self.render_portraits(&characters, &run_dir).await?;
        }

        let mut media = self.scene_media(&request, &breakdown, &characters, &run_dir).await?;

        if request.animate_scenes {
            log::info!("      Animating scene images...");
            media = self.animate_all(media).await?;
        }

        log::info!("[3/4] Generating narration (TTS)...");
        let mut audio = Vec::with_capacity(breakdown.len());
        for scene in &breakdown.scenes {
            self.check_interrupt()?;
            let path = self
                .narrator
                .synthesize(&scene.narration_text, scene.scene_number, &request.voice, &run_dir)
                .await?;
            audio.push(path);
        }
        self.check_interrupt()?;

        log::info!("[4/4] Composing video...");
        let output = request.output_dir.join(&request.output_filename);
        let output = self.compose(media, audio, output, request.motion).await?;
        log::info!("      -> Done: {}", output.display());
        Ok((output, breakdown))
    }

    async fn render_portraits(&self, characters: &[CharacterDescription], run_dir: &Path) -> Result<(), PipelineError> {
        log::info!("      Rendering {} character portraits...", characters.len());
        for character in characters {
            self.check_interrupt()?;
            let path = self
                .images
                .generate_character_portrait(&character.name, &character.description, run_dir)
                .await?;
            log::debug!("      {} -> {}", character.name, path.display());
        }
        Ok(())
    }

    /// One image per scene, from the user folder when it has images.
    async fn scene_media(
        &self,
        request: &FreshRunRequest,
        breakdown: &SceneBreakdown,
        characters: &[CharacterDescription],
        run_dir: &Path,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let folder_images = match &request.images_dir {
            Some(dir) => {
                let images = assets::images_in_folder(dir)?;
                if images.is_empty() {
                    log::warn!("No images in {} (use .png, .jpg, etc.), generating instead", dir.display());
                }
                images
            }
            None => Vec::new(),
        };

        if !folder_images.is_empty() {
            log::info!("[2/4] Using {} images from folder", folder_images.len());
            return Ok(breakdown
                .scenes
                .iter()
                .map(|scene| folder_image(&folder_images, scene).to_path_buf())
                .collect());
        }

        log::info!("[2/4] Generating images with {}...", self.images.backend_name());
        let mut media = Vec::with_capacity(breakdown.len());
        for scene in &breakdown.scenes {
            self.check_interrupt()?;
            let prompt = ScenePrompt::new(scene.scene_number, &scene.description)
                .with_characters(characters)
                .with_visual_instruction(request.visual_instruction.as_deref())
                .with_movable(request.movable);
            media.push(self.images.generate(&prompt, run_dir).await?);
        }
        Ok(media)
    }

    /// Replace stills with motion clips where animation succeeds.
    async fn animate_all(&self, media: Vec<PathBuf>) -> Result<Vec<PathBuf>, PipelineError> {
        let mut out = Vec::with_capacity(media.len());
        for path in media {
            self.check_interrupt()?;
            match self.animator.animate(&path).await {
                Some(clip) => out.push(clip),
                None => out.push(path),
            }
        }
        Ok(out)
    }

    /// Recompose the stills and narration of a previous run.
    pub async fn run_existing(&self, request: ReuseRunRequest) -> Result<(PathBuf, SceneBreakdown), PipelineError> {
        let run_dir = request.output_dir.join(RUN_DIR_NAME);
        let images = assets::discover_scene_images(&run_dir)?;
        let narration = assets::discover_narration(&run_dir)?;
        if images.is_empty() {
            return Err(PipelineError::NoExistingAssets(run_dir));
        }
        log::info!(
            "Reusing {} scene images and {} narration files from {}",
            images.len(),
            narration.len(),
            run_dir.display()
        );

        let (mut media, audio) = select_existing(&images, &narration, request.only_scene)?;

        if request.animate_scenes {
            log::info!("Animating scene images...");
            media = self.animate_all(media).await?;
        }
        self.check_interrupt()?;

        let breakdown = SceneBreakdown::new(
            EXISTING_RUN_TITLE,
            (1..=media.len() as u32).map(|n| Scene::new(n, "", "")).collect(),
        );

        log::info!("Composing video...");
        let output = request.output_dir.join(&request.output_filename);
        let output = self.compose(media, audio, output, request.motion).await?;
        log::info!("Done: {}", output.display());
        Ok((output, breakdown))
    }

    async fn compose(
        &self,
        media: Vec<PathBuf>,
        audio: Vec<PathBuf>,
        output: PathBuf,
        motion: bool,
    ) -> Result<PathBuf, PipelineError> {
        let composer = Arc::clone(&self.composer);
        let path = tokio::task::spawn_blocking(move || composer.compose(&media, &audio, &output, motion)).await??;
        Ok(path)
    }
}

/// Folder image for a scene; scenes past the end reuse the last image.
fn folder_image<'a>(images: &'a [PathBuf], scene: &Scene) -> &'a Path {
    let index = (scene.scene_number as usize).saturating_sub(1).min(images.len() - 1);
    &images[index]
}

/// Pair discovered images with narration, optionally narrowed to one scene.
pub fn select_existing(
    images: &[PathBuf],
    narration: &[PathBuf],
    only_scene: Option<usize>,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), PipelineError> {
    match only_scene {
        Some(n) => {
            if n == 0 || n > images.len() {
                return Err(PipelineError::SceneOutOfRange {
                    requested: n,
                    available: images.len(),
                });
            }
            if narration.len() < n {
                return Err(PipelineError::NarrationCountMismatch {
                    images: n,
                    narration: narration.len(),
                });
            }
            Ok((vec![images[n - 1].clone()], vec![narration[n - 1].clone()]))
        }
        None => {
            if narration.len() < images.len() {
                return Err(PipelineError::NarrationCountMismatch {
                    images: images.len(),
                    narration: narration.len(),
                });
            }
            Ok((images.to_vec(), narration[..images.len()].to_vec()))
        }
    }
}
