//! Scene planning against a mock chat endpoint, plus the local splitter.

use std::sync::Arc;

use serde_json::json;
use storyforge::characters::CharacterResolver;
use storyforge::llm::TextBackend;
use storyforge::openai::OpenAiClient;
use storyforge::planner::{fallback_plan, PlanError, ScenePlanner};
use storyforge::retry::RetryPolicy;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> Arc<dyn TextBackend> {
    let client = OpenAiClient::with_base_url(Some("sk-test".to_string()), server.uri(), "gpt-4o-mini".to_string())
        .unwrap()
        .with_retry_policy(RetryPolicy::none());
    Arc::new(client)
}

async fn mount_reply(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_plan_parses_fenced_reply_and_renumbers() {
    let server = MockServer::start().await;
    let reply = r#"Here you go:
```json
{
  "title": "The Fox",
  "scenes": [
    {"scene_number": 4, "description": "A fox in snow", "narration_text": "It was cold.", "duration_hint_sec": 6},
    {"scene_number": 9, "description": "A den at dusk", "narration_text": "Home at last."}
  ]
}
```"#;
    mount_reply(&server, reply).await;

    let planner = ScenePlanner::new(Some(backend(&server)));
    assert!(planner.uses_backend());
    let breakdown = planner.plan("A fox walks home.").await.unwrap();

    assert_eq!(breakdown.title, "The Fox");
    assert_eq!(breakdown.len(), 2);
    assert_eq!(breakdown.scenes[0].scene_number, 1);
    assert_eq!(breakdown.scenes[1].scene_number, 2);
    assert_eq!(breakdown.scenes[0].duration_hint_sec, 6.0);
    assert_eq!(breakdown.scenes[1].duration_hint_sec, 5.0);
    assert_eq!(breakdown.scenes[1].narration_text, "Home at last.");
}

#[tokio::test]
async fn test_plan_with_no_scenes_is_error() {
    let server = MockServer::start().await;
    mount_reply(&server, r#"{"title": "Nothing", "scenes": []}"#).await;

    let planner = ScenePlanner::new(Some(backend(&server)));
    assert!(matches!(planner.plan("story").await, Err(PlanError::NoScenes)));
}

#[tokio::test]
async fn test_plan_with_prose_reply_is_invalid() {
    let server = MockServer::start().await;
    mount_reply(&server, "Sorry, I cannot help with that.").await;

    let planner = ScenePlanner::new(Some(backend(&server)));
    assert!(matches!(planner.plan("story").await, Err(PlanError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_plan_backend_failure_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let planner = ScenePlanner::new(Some(backend(&server)));
    assert!(matches!(planner.plan("story").await, Err(PlanError::Backend(_))));
}

#[tokio::test]
async fn test_local_planner_matches_fallback() {
    let story = "First paragraph here.\n\nSecond paragraph here.";
    let breakdown = ScenePlanner::local().plan(story).await.unwrap();
    assert_eq!(breakdown, fallback_plan(story));
    assert_eq!(breakdown.len(), 2);
}

#[test]
fn test_long_single_paragraph_is_grouped() {
    let story = (1..=20).map(|i| format!("Sentence {}.", i)).collect::<Vec<_>>().join(" ");
    let breakdown = fallback_plan(&story);
    assert_eq!(breakdown.len(), 8);
    assert!(breakdown.scenes[0].description.starts_with("Sentence 1. Sentence 2."));
    assert!(breakdown.scenes[7].description.ends_with("Sentence 20."));
}

#[tokio::test]
async fn test_character_analysis_through_chat_endpoint() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        r#"```json
[{"name": "Mira", "description": "a tall girl with a green scarf"}]
```"#,
    )
    .await;

    let resolver = CharacterResolver::new(Some(backend(&server)));
    let characters = resolver.resolve(None, "Mira walked.", true).await.unwrap();
    assert_eq!(characters.len(), 1);
    assert_eq!(characters[0].name, "Mira");
}
