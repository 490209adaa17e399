//! Scene and character data passed between pipeline stages.

use serde::{Deserialize, Serialize};

/// Default suggested on-screen time for a scene, in seconds.
pub const DEFAULT_SCENE_DURATION_SECS: f64 = 5.0;

fn default_duration_hint() -> f64 {
    DEFAULT_SCENE_DURATION_SECS
}

fn default_title() -> String {
    "Untitled".to_string()
}

/// A single scene in the story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// 1-based position of the scene in the breakdown.
    pub scene_number: u32,
    /// Visual description used to build the image prompt.
    pub description: String,
    /// Words spoken over the scene.
    pub narration_text: String,
    /// Suggested duration; the composer derives the real one from narration.
    #[serde(default = "default_duration_hint")]
    pub duration_hint_sec: f64,
}

impl Scene {
    pub fn new(scene_number: u32, description: impl Into<String>, narration_text: impl Into<String>) -> Self {
        Self {
            scene_number,
            description: description.into(),
            narration_text: narration_text.into(),
            duration_hint_sec: DEFAULT_SCENE_DURATION_SECS,
        }
    }
}

/// Ordered breakdown of a story into scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneBreakdown {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub scenes: Vec<Scene>,
}

impl SceneBreakdown {
    pub fn new(title: impl Into<String>, scenes: Vec<Scene>) -> Self {
        let mut breakdown = Self {
            title: title.into(),
            scenes,
        };
        breakdown.renumber();
        breakdown
    }

    /// Rewrite `scene_number` so it matches list position (1-based).
    ///
    /// LLM output is not trusted to number scenes contiguously.
    pub fn renumber(&mut self) {
        for (index, scene) in self.scenes.iter_mut().enumerate() {
            scene.scene_number = index as u32 + 1;
        }
        for scene in &mut self.scenes {
            if !scene.duration_hint_sec.is_finite() || scene.duration_hint_sec < 0.0 {
                scene.duration_hint_sec = DEFAULT_SCENE_DURATION_SECS;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

/// Persistent visual description of a story character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterDescription {
    pub name: String,
    pub description: String,
}

impl CharacterDescription {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}
