//! Character descriptions for consistent visuals across scenes.
//!
//! Characters come from a user file (JSON or `Name: description` lines) or,
//! on request, from one extraction call against the text backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{parse_fenced_json, TextBackend};
use crate::models::CharacterDescription;

pub const EXTRACT_SYSTEM_PROMPT: &str = "You are extracting character descriptions for a short film. Given a story, list each named or implied character with a short visual description for AI image generation (age, appearance, clothing, etc.). Output JSON only: {\"characters\": [{\"name\": \"Name\", \"description\": \"visual description\"}]}. Use 1-2 short sentences per description. If no clear characters, describe the main subject (e.g. \"A person\") with one entry.";

const EXTRACT_TEMPERATURE: f32 = 0.3;

/// Story prefix sent for extraction, in characters.
pub const MAX_EXTRACT_CHARS: usize = 4000;

#[derive(Debug, thiserror::Error)]
pub enum CharacterError {
    #[error("Characters file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Could not read characters file: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepted JSON layouts.
#[derive(Deserialize)]
#[serde(untagged)]
enum CharactersJson {
    List(Vec<CharacterDescription>),
    Wrapped { characters: Vec<CharacterDescription> },
    Single(CharacterDescription),
}

impl From<CharactersJson> for Vec<CharacterDescription> {
    fn from(json: CharactersJson) -> Self {
        match json {
            CharactersJson::List(list) | CharactersJson::Wrapped { characters: list } => list,
            CharactersJson::Single(one) => vec![one],
        }
    }
}

/// Parse a JSON character list: a bare list, `{"characters": [...]}`, or a
/// single object.
pub fn parse_characters_json(text: &str) -> Result<Vec<CharacterDescription>, serde_json::Error> {
    let parsed: CharactersJson = serde_json::from_str(text)?;
    Ok(parsed.into())
}

/// Parse `Name: description` lines. Text after `#` is ignored, as are lines
/// without a colon or with an empty side.
pub fn parse_characters_text(text: &str) -> Vec<CharacterDescription> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            let (name, description) = line.split_once(':')?;
            let (name, description) = (name.trim(), description.trim());
            if name.is_empty() || description.is_empty() {
                return None;
            }
            Some(CharacterDescription::new(name, description))
        })
        .collect()
}

/// Load characters from a file. A `.json` file that does not parse falls
/// back to the line format.
pub fn load_characters_from_file(path: &Path) -> Result<Vec<CharacterDescription>, CharacterError> {
    if !path.is_file() {
        return Err(CharacterError::NotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        match parse_characters_json(text) {
            Ok(characters) => return Ok(characters),
            Err(e) => log::warn!("{} is not valid character JSON ({}), reading as text", path.display(), e),
        }
    }

    Ok(parse_characters_text(text))
}

pub struct CharacterResolver {
    backend: Option<Arc<dyn TextBackend>>,
}

impl CharacterResolver {
    pub fn new(backend: Option<Arc<dyn TextBackend>>) -> Self {
        Self { backend }
    }

    /// Characters from `file` when given, else extracted from the story when
    /// `analyze` is set and a backend exists, else none.
    pub async fn resolve(
        &self,
        file: Option<&Path>,
        story: &str,
        analyze: bool,
    ) -> Result<Vec<CharacterDescription>, CharacterError> {
        if let Some(path) = file {
            let characters = load_characters_from_file(path)?;
            log::info!("Loaded {} characters from {}", characters.len(), path.display());
            return Ok(characters);
        }
        if analyze {
            return Ok(self.analyze(story).await);
        }
        Ok(Vec::new())
    }

    /// Ask the backend for characters. Every failure yields an empty list.
    pub async fn analyze(&self, story: &str) -> Vec<CharacterDescription> {
        let Some(backend) = &self.backend else {
            log::warn!("Character analysis needs a text backend; set OPENAI_API_KEY or OPENAI_API_BASE");
            return Vec::new();
        };

        let excerpt: String = story.chars().take(MAX_EXTRACT_CHARS).collect();
        let prompt = format!("Story:\n{}", excerpt);

        let reply = match backend.complete(EXTRACT_SYSTEM_PROMPT, &prompt, EXTRACT_TEMPERATURE).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Character analysis failed: {}", e);
                return Vec::new();
            }
        };

        match parse_fenced_json::<CharactersJson>(&reply) {
            Ok(parsed) => {
                let characters: Vec<CharacterDescription> = parsed.into();
                log::info!("Extracted {} characters from the story", characters.len());
                characters
            }
            Err(e) => {
                log::warn!("Character analysis returned unusable JSON: {}", e);
                Vec::new()
            }
        }
    }
}
