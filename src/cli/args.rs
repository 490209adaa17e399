//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Turn a written story into a narrated video with camera motion
#[derive(Parser, Debug)]
#[command(name = "storyforge")]
#[command(version, about = "Turn a written story into a narrated video", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Story text (inline)
    #[arg(conflicts_with_all = ["file", "use_existing"])]
    pub story: Option<String>,

    /// Read the story from a text file
    #[arg(short, long, conflicts_with = "use_existing")]
    pub file: Option<PathBuf>,

    /// Recompose the scenes and narration already in <OUTPUT>/run
    #[arg(long)]
    pub use_existing: bool,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Output video filename (default: storyforge_<timestamp>.mp4)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Narration voice, e.g. en-US-JennyNeural or en-GB-SoniaNeural
    #[arg(short, long)]
    pub voice: Option<String>,

    /// Use images from this folder (sorted by name) instead of generating
    #[arg(short, long, value_name = "DIR")]
    pub images: Option<PathBuf>,

    /// JSON or "Name: description" file with character descriptions
    #[arg(short, long, value_name = "FILE")]
    pub characters: Option<PathBuf>,

    /// Extract character descriptions from the story with the LLM
    #[arg(long)]
    pub analyze_characters: bool,

    /// Look applied to every generated image, e.g. "soft lighting, watercolor"
    #[arg(short = 'p', long, value_name = "TEXT")]
    pub visual_prompt: Option<String>,

    /// Leave the cinematic hint out of image prompts
    #[arg(long)]
    pub no_movable: bool,

    /// Also render a reference portrait per character into run/characters/
    #[arg(long)]
    pub character_images: bool,

    /// Turn scene stills into short motion clips (needs FAL_API_KEY)
    #[arg(long)]
    pub animate_scenes: bool,

    /// With --use-existing, compose only this 1-based scene
    #[arg(long, value_name = "N")]
    pub only_scene: Option<usize>,

    /// Use a gentle zoom for every still instead of rotating camera moves
    #[arg(long)]
    pub no_motion: bool,

    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show the effective configuration (secrets masked)
    Show,
    /// Create default config file
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["storyforge", "Once upon a time."]);
        assert_eq!(args.story.as_deref(), Some("Once upon a time."));
        assert!(args.file.is_none());
        assert!(!args.use_existing);
        assert_eq!(args.output, PathBuf::from("output"));
        assert!(args.name.is_none());
        assert!(args.voice.is_none());
        assert!(!args.analyze_characters);
        assert!(!args.no_movable);
        assert!(!args.no_motion);
        assert!(args.only_scene.is_none());
        assert!(args.command.is_none());
    }

    #[test]
    fn test_args_short_flags() {
        let args = Args::parse_from([
            "storyforge",
            "-f",
            "story.txt",
            "-o",
            "out",
            "-n",
            "film.mp4",
            "-v",
            "en-GB-SoniaNeural",
            "-i",
            "pics",
            "-c",
            "cast.txt",
            "-p",
            "watercolor",
        ]);
        assert_eq!(args.file, Some(PathBuf::from("story.txt")));
        assert_eq!(args.output, PathBuf::from("out"));
        assert_eq!(args.name.as_deref(), Some("film.mp4"));
        assert_eq!(args.voice.as_deref(), Some("en-GB-SoniaNeural"));
        assert_eq!(args.images, Some(PathBuf::from("pics")));
        assert_eq!(args.characters, Some(PathBuf::from("cast.txt")));
        assert_eq!(args.visual_prompt.as_deref(), Some("watercolor"));
    }

    #[test]
    fn test_args_reuse_mode() {
        let args = Args::parse_from(["storyforge", "--use-existing", "--only-scene", "2", "--animate-scenes"]);
        assert!(args.use_existing);
        assert_eq!(args.only_scene, Some(2));
        assert!(args.animate_scenes);
    }

    #[test]
    fn test_story_and_file_conflict() {
        assert!(Args::try_parse_from(["storyforge", "story", "--file", "s.txt"]).is_err());
        assert!(Args::try_parse_from(["storyforge", "--file", "s.txt", "--use-existing"]).is_err());
    }

    #[test]
    fn test_config_subcommand() {
        let args = Args::parse_from(["storyforge", "config", "show"]);
        assert!(matches!(
            args.command,
            Some(Command::Config {
                action: ConfigAction::Show
            })
        ));
    }

    #[test]
    fn test_config_path_flag() {
        let args = Args::parse_from(["storyforge", "--config", "/tmp/sf.toml", "--use-existing"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/sf.toml")));
    }
}
