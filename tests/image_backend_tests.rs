//! Hosted image backends against mock servers, and the placeholder fallback.

use std::io::Cursor;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::json;
use storyforge::images::{
    CachedBackend, FallbackImageGenerator, HuggingFaceBackend, ImageBackend, ImageCache, ImageRequest,
    ReplicateBackend, ScenePrompt,
};
use storyforge::retry::RetryPolicy;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn request<'a>(prompt: &'a str, width: u32, height: u32) -> ImageRequest<'a> {
    ImageRequest {
        prompt,
        title: "Scene 1",
        caption: prompt,
        width,
        height,
    }
}

fn hf_backend(server: &MockServer) -> HuggingFaceBackend {
    HuggingFaceBackend::with_base_url(
        "hf-token".to_string(),
        server.uri(),
        "runwayml/stable-diffusion-v1-5".to_string(),
    )
    .unwrap()
    .with_retry_policy(RetryPolicy::none())
}

#[tokio::test]
async fn test_huggingface_saves_resized_png() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/runwayml/stable-diffusion-v1-5"))
        .and(header("Authorization", "Bearer hf-token"))
        .and(body_partial_json(json!({"inputs": "a red barn", "parameters": {"width": 64, "height": 36}})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(128, 128)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("scene_001.png");
    hf_backend(&server)
        .generate(&request("a red barn", 64, 36), &dest)
        .await
        .unwrap();

    let saved = image::open(&dest).unwrap();
    assert_eq!((saved.width(), saved.height()), (64, 36));
}

#[tokio::test]
async fn test_huggingface_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/runwayml/stable-diffusion-v1-5"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = hf_backend(&server)
        .generate(&request("x", 32, 32), &dir.path().join("scene_001.png"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_replicate_polls_until_succeeded() {
    let server = MockServer::start().await;
    let uri = server.uri();

    Mock::given(method("POST"))
        .and(path("/models/stability-ai/sdxl/predictions"))
        .and(header("Authorization", "Bearer r8-token"))
        .and(body_partial_json(json!({"input": {"prompt": "a lighthouse", "width": 40, "height": 30}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p1",
            "status": "starting",
            "urls": {"get": format!("{}/predictions/p1", uri)}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p1",
            "status": "succeeded",
            "output": [format!("{}/out/p1.png", uri)]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/out/p1.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(80, 60)))
        .expect(1)
        .mount(&server)
        .await;

    let backend = ReplicateBackend::with_base_url("r8-token".to_string(), uri.clone(), "stability-ai/sdxl".to_string())
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
        .with_retry_policy(RetryPolicy::none());

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("scene_001.png");
    backend.generate(&request("a lighthouse", 40, 30), &dest).await.unwrap();

    let saved = image::open(&dest).unwrap();
    assert_eq!((saved.width(), saved.height()), (40, 30));
}

#[tokio::test]
async fn test_replicate_failed_prediction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/stability-ai/sdxl/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p2",
            "status": "failed",
            "error": "NSFW content detected"
        })))
        .mount(&server)
        .await;

    let backend = ReplicateBackend::with_base_url("t".to_string(), server.uri(), "stability-ai/sdxl".to_string())
        .unwrap()
        .with_retry_policy(RetryPolicy::none());

    let dir = tempfile::tempdir().unwrap();
    let err = backend
        .generate(&request("x", 32, 32), &dir.path().join("scene_001.png"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("NSFW content detected"));
}

#[tokio::test]
async fn test_fallback_writes_placeholder_when_backend_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/runwayml/stable-diffusion-v1-5"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let generator = FallbackImageGenerator::new(Box::new(hf_backend(&server)), 96, 54);
    assert_eq!(generator.backend_name(), "huggingface");

    let dir = tempfile::tempdir().unwrap();
    let scene = ScenePrompt::new(3, "A quiet harbor at dawn");
    let path = generator.generate(&scene, dir.path()).await.unwrap();

    assert_eq!(path, dir.path().join("scene_003.png"));
    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (96, 54));
}

#[tokio::test]
async fn test_cached_backend_skips_second_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/runwayml/stable-diffusion-v1-5"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(32, 32)))
        .expect(1)
        .mount(&server)
        .await;

    let cache_dir = tempfile::tempdir().unwrap();
    let backend = CachedBackend::new(
        Box::new(hf_backend(&server)),
        ImageCache::new(cache_dir.path().to_path_buf(), 10),
    );

    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("scene_001.png");
    let second = dir.path().join("scene_002.png");
    backend.generate(&request("same prompt", 32, 32), &first).await.unwrap();
    backend.generate(&request("same prompt", 32, 32), &second).await.unwrap();

    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
}
