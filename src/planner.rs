//! Scene planner: story text -> ordered scene breakdown.
//!
//! With a text backend the story is segmented by the model in one call. Without
//! one, a deterministic local splitter produces scenes from paragraphs or
//! sentences so a run never silently does nothing.

use std::sync::Arc;

use crate::llm::{parse_fenced_json, TextBackend};
use crate::models::{Scene, SceneBreakdown};
use crate::openai::OpenAiError;

pub const PLANNER_SYSTEM_PROMPT: &str = "You are a cinematic scene planner. Your job is to break a written story into a sequence of visual scenes suitable for turning into a short film.

For each scene you must provide:
1. description: A clear, concrete visual description for AI image generation (setting, characters, action, mood, lighting). Be specific (e.g. \"A young woman in a red dress stands in a sunlit market, baskets of fruit around her\").
2. narration_text: The exact words to be spoken (voice-over) during this scene. Keep it concise for a 4-7 second clip.
3. duration_hint_sec: Suggested duration in seconds (typically 4-8).

Output a JSON object with:
- \"title\": short story title
- \"scenes\": list of objects, each with \"scene_number\" (1-based), \"description\", \"narration_text\", \"duration_hint_sec\"

Segment the story into 3-8 cinematic scenes; for longer text, aim for one scene per major story beat. Be cinematic and visual.";

const PLANNER_TEMPERATURE: f32 = 0.5;

/// Paragraph mode keeps at most this many scenes.
pub const MAX_PARAGRAPH_SCENES: usize = 10;

/// Sentence mode groups sentences into at most this many scenes.
pub const MAX_SENTENCE_SCENES: usize = 8;

/// Single-paragraph stories with this many sentences or fewer get one scene
/// per sentence.
pub const MAX_UNGROUPED_SENTENCES: usize = 3;

/// Longest fallback scene description before truncation.
pub const MAX_SCENE_CHARS: usize = 220;

pub const EMPTY_STORY_DESCRIPTION: &str = "A single quiet scene.";

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("scene planning request failed: {0}")]
    Backend(#[from] OpenAiError),

    #[error("scene planner returned invalid JSON: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("scene planner returned no scenes")]
    NoScenes,
}

pub struct ScenePlanner {
    backend: Option<Arc<dyn TextBackend>>,
}

impl ScenePlanner {
    pub fn new(backend: Option<Arc<dyn TextBackend>>) -> Self {
        Self { backend }
    }

    /// Planner that always uses the local splitter.
    pub fn local() -> Self {
        Self { backend: None }
    }

    pub fn uses_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Break a story into scenes.
    ///
    /// Backend failures and malformed replies are returned as errors; there
    /// is no silent fallback once a backend is configured.
    pub async fn plan(&self, story: &str) -> Result<SceneBreakdown, PlanError> {
        let Some(backend) = &self.backend else {
            return Ok(fallback_plan(story));
        };

        let user = format!("Break this story into cinematic scenes.\n\nStory:\n{}", story);
        let reply = backend
            .complete(PLANNER_SYSTEM_PROMPT, &user, PLANNER_TEMPERATURE)
            .await?;
        log::debug!("Planner reply: {}", reply);

        let mut breakdown: SceneBreakdown = parse_fenced_json(&reply)?;
        if breakdown.is_empty() {
            return Err(PlanError::NoScenes);
        }
        breakdown.renumber();
        Ok(breakdown)
    }
}

/// Deterministic local scene split; never touches the network.
pub fn fallback_plan(story: &str) -> SceneBreakdown {
    let paragraphs = split_paragraphs(story);

    let texts: Vec<String> = match paragraphs.len() {
        0 => vec![EMPTY_STORY_DESCRIPTION.to_string()],
        1 => {
            let sentences = split_sentences(&paragraphs[0]);
            if sentences.len() <= MAX_UNGROUPED_SENTENCES {
                sentences
            } else {
                group_sentences(&sentences)
            }
        }
        _ => paragraphs.into_iter().take(MAX_PARAGRAPH_SCENES).collect(),
    };

    let scenes = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let description = scene_text(text);
            Scene::new(i as u32 + 1, description.clone(), description)
        })
        .collect();

    SceneBreakdown::new("Untitled", scenes)
}

/// Blank-line separated paragraphs, whitespace collapsed, empties dropped.
fn split_paragraphs(story: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in story.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(collapse_whitespace(&current.join(" ")));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(collapse_whitespace(&current.join(" ")));
    }
    paragraphs
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_closing_mark(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
}

/// Split on `.`, `!` or `?` (plus any closing quotes) followed by whitespace.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut end = i + 1;
            while end < chars.len() && (matches!(chars[end], '.' | '!' | '?') || is_closing_mark(chars[end])) {
                end += 1;
            }
            if end == chars.len() || chars[end].is_whitespace() {
                let sentence: String = chars[start..end].iter().collect();
                let sentence = sentence.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
            i = end;
        } else {
            i += 1;
        }
    }

    let tail: String = chars[start..].iter().collect();
    let tail = tail.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Number of scenes for a single paragraph of `sentence_count` sentences.
///
/// Up to three sentences map one-to-one; beyond that roughly two sentences
/// per scene, capped at eight scenes.
pub fn sentence_scene_count(sentence_count: usize) -> usize {
    if sentence_count <= MAX_UNGROUPED_SENTENCES {
        sentence_count
    } else {
        sentence_count.div_ceil(2).min(MAX_SENTENCE_SCENES)
    }
}

/// Group sentences into near-equal runs; earlier groups take the remainder.
fn group_sentences(sentences: &[String]) -> Vec<String> {
    let scene_count = sentence_scene_count(sentences.len()).max(1);
    let base = sentences.len() / scene_count;
    let extra = sentences.len() % scene_count;

    let mut groups = Vec::with_capacity(scene_count);
    let mut cursor = 0;
    for index in 0..scene_count {
        let size = base + usize::from(index < extra);
        groups.push(sentences[cursor..cursor + size].join(" "));
        cursor += size;
    }
    groups
}

/// Truncate to [`MAX_SCENE_CHARS`] with an ellipsis and ensure terminal
/// punctuation.
fn scene_text(text: &str) -> String {
    let text = text.trim();
    let mut out = if text.chars().count() > MAX_SCENE_CHARS {
        let head: String = text.chars().take(MAX_SCENE_CHARS).collect();
        format!("{}...", head.trim_end())
    } else {
        text.to_string()
    };

    let terminated = out
        .trim_end_matches(is_closing_mark)
        .ends_with(['.', '!', '?']);
    if !terminated {
        out.push('.');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedBackend(String);

    #[async_trait::async_trait]
    impl TextBackend for CannedBackend {
        async fn complete(&self, _system: &str, _user: &str, _temperature: f32) -> Result<String, OpenAiError> {
            Ok(self.0.clone())
        }
    }

    fn numbers(breakdown: &SceneBreakdown) -> Vec<u32> {
        breakdown.scenes.iter().map(|s| s.scene_number).collect()
    }

    #[test]
    fn test_empty_story_yields_single_placeholder_scene() {
        for story in ["", "   ", "\n\n\t\n"] {
            let breakdown = fallback_plan(story);
            assert_eq!(breakdown.len(), 1);
            assert_eq!(breakdown.scenes[0].description, EMPTY_STORY_DESCRIPTION);
            assert_eq!(breakdown.scenes[0].scene_number, 1);
        }
    }

    #[test]
    fn test_paragraphs_become_scenes() {
        let story = "The fox woke early\n\nIt ran to the river.\n\n\nThe sun rose!";
        let breakdown = fallback_plan(story);
        assert_eq!(numbers(&breakdown), vec![1, 2, 3]);
        assert_eq!(breakdown.scenes[0].description, "The fox woke early.");
        assert_eq!(breakdown.scenes[1].description, "It ran to the river.");
        assert_eq!(breakdown.scenes[2].description, "The sun rose!");
        for scene in &breakdown.scenes {
            assert_eq!(scene.narration_text, scene.description);
            assert_eq!(scene.duration_hint_sec, 5.0);
        }
    }

    #[test]
    fn test_paragraphs_capped_at_ten() {
        let story = (1..=14).map(|i| format!("Paragraph {}.", i)).collect::<Vec<_>>().join("\n\n");
        let breakdown = fallback_plan(&story);
        assert_eq!(breakdown.len(), 10);
        assert_eq!(breakdown.scenes[9].description, "Paragraph 10.");
    }

    #[test]
    fn test_long_paragraph_truncated_with_ellipsis() {
        let long = "word ".repeat(100);
        let story = format!("{}\n\nShort one.", long);
        let breakdown = fallback_plan(&story);
        let first = &breakdown.scenes[0].description;
        assert!(first.ends_with("..."));
        assert!(first.chars().count() <= MAX_SCENE_CHARS + 3);
    }

    #[test]
    fn test_few_sentences_one_per_scene() {
        let breakdown = fallback_plan("A cat sat. A dog barked! Did the bird sing?");
        assert_eq!(breakdown.len(), 3);
        assert_eq!(breakdown.scenes[1].description, "A dog barked!");
        assert_eq!(breakdown.scenes[2].description, "Did the bird sing?");
    }

    #[test]
    fn test_single_sentence_without_punctuation() {
        let breakdown = fallback_plan("a lighthouse in the fog");
        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown.scenes[0].description, "a lighthouse in the fog.");
    }

    #[test]
    fn test_sentence_scene_count_boundaries() {
        assert_eq!(sentence_scene_count(1), 1);
        assert_eq!(sentence_scene_count(3), 3);
        assert_eq!(sentence_scene_count(4), 2);
        assert_eq!(sentence_scene_count(5), 3);
        assert_eq!(sentence_scene_count(14), 7);
        assert_eq!(sentence_scene_count(15), 8);
        assert_eq!(sentence_scene_count(16), 8);
        assert_eq!(sentence_scene_count(40), 8);
    }

    #[test]
    fn test_sentences_grouped_evenly() {
        let story = (1..=5).map(|i| format!("Sentence {}.", i)).collect::<Vec<_>>().join(" ");
        let breakdown = fallback_plan(&story);
        assert_eq!(breakdown.len(), 3);
        assert_eq!(breakdown.scenes[0].description, "Sentence 1. Sentence 2.");
        assert_eq!(breakdown.scenes[1].description, "Sentence 3. Sentence 4.");
        assert_eq!(breakdown.scenes[2].description, "Sentence 5.");
    }

    #[test]
    fn test_many_sentences_capped_at_eight() {
        let story = (1..=17).map(|i| format!("Line {}.", i)).collect::<Vec<_>>().join(" ");
        let breakdown = fallback_plan(&story);
        assert_eq!(breakdown.len(), 8);
        assert_eq!(breakdown.scenes[0].description, "Line 1. Line 2. Line 3.");
        assert_eq!(numbers(&breakdown), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_quoted_sentence_end() {
        let sentences = split_sentences("She said \"Run.\" He ran. Then? Silence");
        assert_eq!(sentences, vec!["She said \"Run.\"", "He ran.", "Then?", "Silence"]);
    }

    #[test]
    fn test_decimal_numbers_do_not_split() {
        let sentences = split_sentences("It cost 3.50 dollars. Cheap.");
        assert_eq!(sentences, vec!["It cost 3.50 dollars.", "Cheap."]);
    }

    #[test]
    fn test_fallback_invariant_on_varied_inputs() {
        let inputs = [
            "x",
            "One. Two. Three. Four. Five. Six. Seven. Eight. Nine. Ten. Eleven.",
            "a\n\nb\n\nc\n\nd\n\ne\n\nf\n\ng\n\nh\n\ni\n\nj\n\nk\n\nl",
            "Multi-line\nparagraph without\nblank lines.",
        ];
        for story in inputs {
            let breakdown = fallback_plan(story);
            assert!((1..=10).contains(&breakdown.len()), "bad count for {:?}", story);
            let expected: Vec<u32> = (1..=breakdown.len() as u32).collect();
            assert_eq!(numbers(&breakdown), expected);
        }
    }

    #[tokio::test]
    async fn test_local_planner_uses_fallback() {
        let planner = ScenePlanner::local();
        assert!(!planner.uses_backend());
        let breakdown = planner.plan("First.\n\nSecond.").await.unwrap();
        assert_eq!(breakdown.len(), 2);
    }

    #[tokio::test]
    async fn test_backend_reply_is_parsed_and_renumbered() {
        let reply = r#"```json
{"title": "The Fox", "scenes": [
  {"scene_number": 4, "description": "A fox in snow", "narration_text": "It was cold.", "duration_hint_sec": 6},
  {"scene_number": 9, "description": "A den", "narration_text": "Home."}
]}
```"#;
        let planner = ScenePlanner::new(Some(Arc::new(CannedBackend(reply.to_string()))));
        let breakdown = planner.plan("story").await.unwrap();
        assert_eq!(breakdown.title, "The Fox");
        assert_eq!(numbers(&breakdown), vec![1, 2]);
        assert_eq!(breakdown.scenes[0].duration_hint_sec, 6.0);
        assert_eq!(breakdown.scenes[1].duration_hint_sec, 5.0);
    }

    #[tokio::test]
    async fn test_backend_invalid_json_is_hard_error() {
        let planner = ScenePlanner::new(Some(Arc::new(CannedBackend("not json at all".to_string()))));
        let err = planner.plan("story").await.unwrap_err();
        assert!(matches!(err, PlanError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_backend_empty_scene_list_is_error() {
        let planner = ScenePlanner::new(Some(Arc::new(CannedBackend(r#"{"title": "x", "scenes": []}"#.to_string()))));
        assert!(matches!(planner.plan("story").await, Err(PlanError::NoScenes)));
    }
}
