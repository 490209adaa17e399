//! Request building and subcommand handlers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::args::{Args, ConfigAction};
use crate::config::{default_path, Config};
use crate::models::SceneBreakdown;
use crate::pipeline::{FreshRunRequest, ReuseRunRequest, RunRequest};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Provide story text, --file FILE, or --use-existing")]
    NoInput,

    #[error("--only-scene only applies with --use-existing")]
    OnlySceneWithoutReuse,

    #[error("File not found: {}", .0.display())]
    StoryFileNotFound(PathBuf),

    #[error("Config file already exists: {}\nUse 'storyforge config show' to view current settings.", .0.display())]
    ConfigExists(PathBuf),

    #[error("Could not serialize config: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Could not serialize scenes: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `storyforge_2026-10-16_14-03-59.mp4`
pub fn default_output_name(now: DateTime<Local>) -> String {
    format!("storyforge_{}.mp4", now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Read a story file, tolerating invalid UTF-8.
pub fn read_story(path: &Path) -> Result<String, CliError> {
    if !path.is_file() {
        return Err(CliError::StoryFileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Turn parsed arguments and config into a pipeline request.
pub fn build_request(args: &Args, config: &Config) -> Result<RunRequest, CliError> {
    let output_filename = args
        .name
        .clone()
        .unwrap_or_else(|| default_output_name(Local::now()));
    let motion = config.video.motion && !args.no_motion;

    if args.use_existing {
        return Ok(RunRequest::Reuse(ReuseRunRequest {
            output_dir: args.output.clone(),
            output_filename,
            animate_scenes: args.animate_scenes,
            only_scene: args.only_scene,
            motion,
        }));
    }

    // clap counts an unset bool flag as present, so `requires` cannot catch this.
    if args.only_scene.is_some() {
        return Err(CliError::OnlySceneWithoutReuse);
    }

    let story = match (&args.file, &args.story) {
        (Some(path), _) => read_story(path)?,
        (None, Some(story)) => story.clone(),
        (None, None) => return Err(CliError::NoInput),
    };

    Ok(RunRequest::Fresh(FreshRunRequest {
        story,
        output_dir: args.output.clone(),
        output_filename,
        voice: args.voice.clone().unwrap_or_else(|| config.narration.voice.clone()),
        images_dir: args.images.clone(),
        characters_file: args.characters.clone(),
        analyze_characters: args.analyze_characters,
        visual_instruction: args.visual_prompt.clone(),
        movable: !args.no_movable,
        character_images: args.character_images,
        animate_scenes: args.animate_scenes,
        motion,
    }))
}

/// `<dir>/<stem>.scenes.json` next to the video.
pub fn scenes_json_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "storyforge".to_string());
    video.with_file_name(format!("{}.scenes.json", stem))
}

/// Save the breakdown beside the video.
pub fn write_breakdown(video: &Path, breakdown: &SceneBreakdown) -> Result<PathBuf, CliError> {
    let path = scenes_json_path(video);
    std::fs::write(&path, serde_json::to_string_pretty(breakdown)?)?;
    Ok(path)
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, path: Option<&Path>, config: &Config) -> Result<(), CliError> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(default_path);

    match action {
        ConfigAction::Show => {
            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found, using defaults)", config_path.display());
            }
            println!();
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigAction::Init => {
            if config_path.exists() {
                return Err(CliError::ConfigExists(config_path));
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let body = format!(
                "# storyforge configuration\n# Credentials are read from the environment (OPENAI_API_KEY, HF_API_TOKEN,\n# REPLICATE_API_TOKEN, FAL_API_KEY) and override values here.\n\n{}",
                Config::default().to_toml()?
            );
            std::fs::write(&config_path, body)?;
            println!("Created config file: {}", config_path.display());
        }
    }
    Ok(())
}
