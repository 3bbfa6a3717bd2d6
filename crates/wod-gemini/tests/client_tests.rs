//! Gemini REST client tests against a mock server.

use std::io::Write;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wod_gemini::{
    AnalysisService, Analyzer, FileState, GeminiClient, GeminiConfig, GeminiError, RemoteFile,
};

fn client(server: &MockServer) -> GeminiClient {
    GeminiClient::new(
        GeminiConfig::default()
            .with_api_key("test-key")
            .with_base_url(server.uri()),
    )
    .unwrap()
}

fn file_json(state: &str) -> serde_json::Value {
    serde_json::json!({
        "name": "files/abc123",
        "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123",
        "mimeType": "video/mp4",
        "state": state
    })
}

async fn mount_upload(server: &MockServer, state: &str) {
    Mock::given(method("POST"))
        .and(path("/upload/v1beta/files"))
        .and(header("x-goog-api-key", "test-key"))
        .and(header("X-Goog-Upload-Command", "start"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-goog-upload-url", format!("{}/upload-session/1", server.uri()).as_str()),
        )
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload-session/1"))
        .and(body_string("fake video bytes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "file": file_json(state)
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn scratch_video() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    file.write_all(b"fake video bytes").unwrap();
    file
}

#[tokio::test]
async fn test_upload_streams_file() {
    let server = MockServer::start().await;
    mount_upload(&server, "PROCESSING").await;

    let video = scratch_video();
    let file = client(&server).upload(video.path(), "video/mp4").await.unwrap();

    assert_eq!(file.name, "files/abc123");
    assert_eq!(file.state, FileState::Processing);
}

#[tokio::test]
async fn test_upload_missing_file_fails() {
    let server = MockServer::start().await;

    let result = client(&server)
        .upload(std::path::Path::new("/nonexistent/video.mp4"), "video/mp4")
        .await;
    assert!(matches!(result, Err(GeminiError::Io(_))));
}

#[tokio::test]
async fn test_get_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/files/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_json("ACTIVE")))
        .mount(&server)
        .await;

    let file = client(&server).get_file("files/abc123").await.unwrap();
    assert_eq!(file.state, FileState::Active);
}

#[tokio::test]
async fn test_generate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-3-pro-preview:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Knees cave in." }] } }]
        })))
        .mount(&server)
        .await;

    let file: RemoteFile = serde_json::from_value(file_json("ACTIVE")).unwrap();
    let response = client(&server).generate(&file, "analyze").await.unwrap();
    assert_eq!(response.text().as_deref(), Some("Knees cave in."));
}

#[tokio::test]
async fn test_generate_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-3-pro-preview:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
        .mount(&server)
        .await;

    let file: RemoteFile = serde_json::from_value(file_json("ACTIVE")).unwrap();
    let err = client(&server).generate(&file, "analyze").await.unwrap_err();
    assert_eq!(err.http_status(), Some(429));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1beta/files/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1beta/files/abc123"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let client = client(&server);
    client.delete("files/abc123").await.unwrap();
    client.delete("files/abc123").await.unwrap();
}

#[tokio::test]
async fn test_delete_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(client(&server).delete("files/abc123").await.is_err());
}

#[tokio::test]
async fn test_analyzer_end_to_end() {
    let server = MockServer::start().await;
    mount_upload(&server, "PROCESSING").await;
    Mock::given(method("GET"))
        .and(path("/v1beta/files/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_json("ACTIVE")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-3-pro-preview:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Solid " }, { "text": "tempo." }] } }]
        })))
        .mount(&server)
        .await;

    let analyzer = Analyzer::new(client(&server), Duration::from_millis(5), Duration::from_secs(5));
    let video = scratch_video();
    let report = analyzer
        .analyze(video.path(), "analyze", &CancellationToken::new(), |_| {})
        .await;

    assert_eq!(report.asset.as_deref(), Some("files/abc123"));
    assert_eq!(report.result.unwrap(), "Solid tempo.");
}
