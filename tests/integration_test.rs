//! End-to-end tests for the fal-hidream-mcp server.
//!
//! The fal.ai API is mocked with wiremock; no credentials or network access
//! are required. Downloaded images land in a per-test temporary directory.

use fal_hidream_mcp::download::ImageFetcher;
use fal_hidream_mcp::fal::{FalClient, MODEL_ID};
use fal_hidream_mcp::handler::{QueueStatusParams, QueueSubmitParams};
use fal_hidream_mcp::{GenerateParams, HidreamHandler, HidreamServer};
use rmcp::model::CallToolResult;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn server_for(upstream: &MockServer, dir: &std::path::Path) -> HidreamServer {
    HidreamServer::with_handler(HidreamHandler::with_deps(
        FalClient::with_base_urls("test-key", upstream.uri(), upstream.uri()),
        ImageFetcher::new(dir),
    ))
}

fn response_text(result: &CallToolResult) -> String {
    let raw = serde_json::to_value(&result.content).expect("content serializes");
    raw[0]["text"].as_str().unwrap_or_default().to_string()
}

/// Mount the full sync generation flow: submit, status, result, image bytes.
async fn mount_two_image_generation(upstream: &MockServer, request_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/{}", MODEL_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "request_id": request_id,
        })))
        .mount(upstream)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/requests/{}/status", MODEL_ID, request_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "COMPLETED"
        })))
        .mount(upstream)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/requests/{}", MODEL_ID, request_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "images": [
                {
                    "url": format!("{}/files/cube_1.jpg", upstream.uri()),
                    "width": 1024,
                    "height": 1024,
                    "content_type": "image/jpeg"
                },
                {
                    "url": format!("{}/files/cube_2.jpg", upstream.uri()),
                    "width": 1024,
                    "height": 1024,
                    "content_type": "image/jpeg"
                }
            ],
            "seed": 987654
        })))
        .mount(upstream)
        .await;
    for name in ["cube_1.jpg", "cube_2.jpg"] {
        Mock::given(method("GET"))
            .and(path(format!("/files/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff]))
            .mount(upstream)
            .await;
    }
}

#[tokio::test]
async fn generate_red_cube_end_to_end() {
    let upstream = MockServer::start().await;
    mount_two_image_generation(&upstream, "req-cube").await;

    let dir = tempfile::tempdir().unwrap();
    let server = server_for(&upstream, dir.path());

    let params: GenerateParams =
        serde_json::from_str(r#"{"prompt": "a red cube on a white table"}"#).unwrap();
    let result = server.generate(params).await;

    assert_ne!(result.is_error, Some(true));
    let text = response_text(&result);
    assert!(text.contains("Successfully generated 2 image(s)"));
    assert!(text.contains("Image 1:"));
    assert!(text.contains("Image 2:"));
    assert!(text.contains("Seed: 987654"));
    assert!(text.contains("Prompt: \"a red cube on a white table\""));
    assert!(text.contains("Request ID: req-cube"));

    // Every record carries a non-empty filename and both files were written.
    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 2);
    for entry in entries {
        let name = entry.unwrap().file_name().into_string().unwrap();
        assert!(name.starts_with("hidream_i1_full_a_red_cube_on_a_white_table"));
        assert!(name.ends_with(".jpg"));
    }
}

#[tokio::test]
async fn one_failed_download_degrades_only_that_record() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{}", MODEL_ID)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"request_id": "req-d"})),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/requests/req-d/status", MODEL_ID)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "COMPLETED"})),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/requests/req-d", MODEL_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "images": [
                {"url": format!("{}/files/ok.jpg", upstream.uri())},
                {"url": format!("{}/files/missing.jpg", upstream.uri())}
            ],
            "seed": 1
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/ok.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8]))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let server = server_for(&upstream, dir.path());

    let params: GenerateParams = serde_json::from_str(r#"{"prompt": "a cat"}"#).unwrap();
    let result = server.generate(params).await;

    // The call still succeeds; both images are reported, one without a path.
    assert_ne!(result.is_error, Some(true));
    let text = response_text(&result);
    assert!(text.contains("Successfully generated 2 image(s)"));
    assert!(text.contains("Image 1:"));
    assert!(text.contains("Image 2:"));
    assert_eq!(text.matches("Local Path:").count(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn queue_submit_then_status_references_same_request_id() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{}", MODEL_ID)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"request_id": "req-q9"})),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/requests/req-q9/status", MODEL_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "IN_PROGRESS",
            "logs": [{"message": "rendering", "timestamp": "2024-06-01T00:00:00Z"}]
        })))
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let server = server_for(&upstream, dir.path());

    let submit: QueueSubmitParams = serde_json::from_str(r#"{"prompt": "a cat"}"#).unwrap();
    let result = server.generate_queue(submit).await;
    assert_ne!(result.is_error, Some(true));
    let text = response_text(&result);
    assert!(text.contains("Request ID: req-q9"));
    assert!(text.contains("hidream_i1_full_queue_status"));

    let result = server
        .queue_status(QueueStatusParams {
            request_id: "req-q9".to_string(),
            logs: true,
        })
        .await;
    assert_ne!(result.is_error, Some(true));
    let text = response_text(&result);
    assert!(text.contains("Queue Status for Request req-q9"));
    assert!(text.contains("Status: IN_PROGRESS"));
    assert!(text.contains("rendering"));
}

#[tokio::test]
async fn unknown_request_id_surfaces_error_response() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{}/requests/ghost/status", MODEL_ID)))
        .respond_with(ResponseTemplate::new(404).set_body_string("request not found"))
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let server = server_for(&upstream, dir.path());

    let result = server
        .queue_status(QueueStatusParams {
            request_id: "ghost".to_string(),
            logs: true,
        })
        .await;
    assert_eq!(result.is_error, Some(true));
    let text = response_text(&result);
    assert!(text.contains("Failed to check queue status"));
    assert!(text.contains("request not found"));
}
