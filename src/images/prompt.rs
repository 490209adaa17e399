//! Image prompt construction.

use crate::models::CharacterDescription;

/// Prompts are cut to this many words to fit the diffusion text encoder.
pub const MAX_PROMPT_WORDS: usize = 55;

pub const CHARACTER_VISIBLE_CLAUSE: &str = "character clearly visible in frame";
pub const MOVABLE_CLAUSE: &str = "cinematic, detailed";

/// Everything the image generator needs to know about one scene.
#[derive(Debug, Clone, Copy)]
pub struct ScenePrompt<'a> {
    pub scene_number: u32,
    pub description: &'a str,
    pub characters: &'a [CharacterDescription],
    pub visual_instruction: Option<&'a str>,
    pub movable: bool,
}

impl<'a> ScenePrompt<'a> {
    pub fn new(scene_number: u32, description: &'a str) -> Self {
        Self {
            scene_number,
            description,
            characters: &[],
            visual_instruction: None,
            movable: true,
        }
    }

    pub fn with_characters(mut self, characters: &'a [CharacterDescription]) -> Self {
        self.characters = characters;
        self
    }

    pub fn with_visual_instruction(mut self, instruction: Option<&'a str>) -> Self {
        self.visual_instruction = instruction;
        self
    }

    pub fn with_movable(mut self, movable: bool) -> Self {
        self.movable = movable;
        self
    }

    /// Comma-joined prompt, truncated to [`MAX_PROMPT_WORDS`].
    pub fn build(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(instruction) = self.visual_instruction.map(str::trim).filter(|s| !s.is_empty()) {
            parts.push(instruction.to_string());
        }
        let description = self.description.trim();
        if !description.is_empty() {
            parts.push(description.to_string());
        }
        if let Some(hint) = character_hint(self.characters, self.description) {
            parts.push(hint);
        }
        parts.push(CHARACTER_VISIBLE_CLAUSE.to_string());
        if self.movable {
            parts.push(MOVABLE_CLAUSE.to_string());
        }

        truncate_words(&parts.join(", "), MAX_PROMPT_WORDS)
    }
}

/// Prompt for a standalone character portrait.
pub fn portrait_prompt(name: &str, description: &str) -> String {
    truncate_words(
        &format!(
            "Character portrait of {}, {}, neutral background, {}",
            name.trim(),
            description.trim(),
            MOVABLE_CLAUSE
        ),
        MAX_PROMPT_WORDS,
    )
}

/// Character text for a scene prompt.
///
/// Characters named in the description (case-insensitive) are used; when none
/// match, every character is included. `None` when there are no characters.
pub fn character_hint(characters: &[CharacterDescription], description: &str) -> Option<String> {
    if characters.is_empty() {
        return None;
    }

    let lowered = description.to_lowercase();
    let mentioned: Vec<&CharacterDescription> = characters
        .iter()
        .filter(|c| {
            let name = c.name.trim().to_lowercase();
            !name.is_empty() && lowered.contains(&name)
        })
        .collect();

    let selected: Vec<&CharacterDescription> = if mentioned.is_empty() {
        characters.iter().collect()
    } else {
        mentioned
    };

    Some(
        selected
            .iter()
            .map(|c| format!("{}: {}", c.name.trim(), c.description.trim()))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Keep the first `max_words` whitespace-separated words.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace().take(max_words).collect::<Vec<_>>().join(" ")
}
