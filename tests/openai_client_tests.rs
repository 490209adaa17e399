//! Mock HTTP tests for the OpenAI-compatible client.

use serde_json::json;
use storyforge::openai::{ChatMessage, OpenAiClient, OpenAiError};
use storyforge::retry::RetryPolicy;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> OpenAiClient {
    OpenAiClient::with_base_url(
        Some("sk-test".to_string()),
        format!("{}/v1", server.uri()),
        "gpt-4o-mini".to_string(),
    )
    .unwrap()
    .with_retry_policy(RetryPolicy::none())
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

#[tokio::test]
async fn test_chat_returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("  Hello there.\n")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client(&server)
        .chat(&[ChatMessage::system("be brief"), ChatMessage::user("hi")], 0.5)
        .await
        .unwrap();
    assert_eq!(reply, "Hello there.");
}

#[tokio::test]
async fn test_chat_without_choices_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client(&server).chat(&[ChatMessage::user("hi")], 0.5).await.unwrap_err();
    assert!(matches!(err, OpenAiError::EmptyResponse(_)));
}

#[tokio::test]
async fn test_unauthorized_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let err = client(&server).chat(&[ChatMessage::user("hi")], 0.5).await.unwrap_err();
    match err {
        OpenAiError::Api { status, message } => {
            assert_eq!(status, 401);
            assert!(message.contains("invalid api key"));
        }
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).chat(&[ChatMessage::user("hi")], 0.5).await.unwrap_err();
    match err {
        OpenAiError::RateLimit { retry_after_secs, .. } => assert_eq!(retry_after_secs, Some(12)),
        other => panic!("expected RateLimit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_generate_image_downloads_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(body_partial_json(json!({"model": "dall-e-3", "size": "1792x1024", "n": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"url": format!("{}/blob/img.png", server.uri())}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/img.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png bytes".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("scene_001.png");
    let written = client(&server)
        .generate_image("dall-e-3", "a fox", "1792x1024", &dest)
        .await
        .unwrap();

    assert_eq!(written, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), b"png bytes");
}

#[tokio::test]
async fn test_generate_image_without_url_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"b64_json": "AAAA"}]})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = client(&server)
        .generate_image("dall-e-3", "a fox", "1024x1024", &dir.path().join("x.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, OpenAiError::EmptyResponse(_)));
}

#[tokio::test]
async fn test_speech_writes_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(body_partial_json(json!({"model": "tts-1", "voice": "nova", "input": "Once."})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xFB, 0x10, 0xC0]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("narration_001.mp3");
    client(&server).speech("tts-1", "Once.", "nova", &dest).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), vec![0xFF, 0xFB, 0x10, 0xC0]);
}

#[tokio::test]
async fn test_speech_empty_body_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("narration_001.mp3");
    let err = client(&server).speech("tts-1", "Once.", "nova", &dest).await.unwrap_err();
    assert!(matches!(err, OpenAiError::EmptyResponse(_)));
    assert!(!dest.exists());
}
