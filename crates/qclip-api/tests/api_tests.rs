//! Router tests over in-memory adapters.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use qclip_api::{create_router, ApiConfig, AppState};
use qclip_models::{input_key, result_key, JobId, JobResult};
use qclip_queue::MemoryQueue;
use qclip_storage::{publish_result, MemoryStore};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "qclip-test-boundary";

struct TestApp {
    router: Router,
    store: MemoryStore,
    queue: MemoryQueue,
    _spool: tempfile::TempDir,
}

fn app_with(config: ApiConfig) -> TestApp {
    let store = MemoryStore::new();
    let queue = MemoryQueue::default();
    let spool = tempfile::tempdir().unwrap();
    let config = ApiConfig {
        spool_dir: spool.path().to_path_buf(),
        ..config
    };
    let state = AppState::new(config, Arc::new(store.clone()), Arc::new(queue.clone()));
    TestApp {
        router: create_router(state, None),
        store,
        queue,
        _spool: spool,
    }
}

fn app() -> TestApp {
    app_with(ApiConfig::default())
}

/// (field name, file name, content)
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: video/mp4\r\n\r\n",
                    name, f
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = app();

    let response = app.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_root_endpoint() {
    let response = app().router.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["msg"], "QuickClip Upload API");
}

#[tokio::test]
async fn test_request_id_is_echoed_or_minted() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "abc-123");

    let response = app.router.oneshot(get("/health")).await.unwrap();
    let minted = response.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(minted).is_ok());
}

#[tokio::test]
async fn test_upload_then_status_is_processing() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(upload_request(multipart_body(&[(
            "video",
            Some("clip.mp4"),
            b"fake video bytes",
        )])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "queued");
    let job_id = JobId::parse(body["jobId"].as_str().unwrap()).unwrap();
    assert!(uuid::Uuid::parse_str(job_id.as_str()).is_ok());

    assert_eq!(app.store.get(&input_key(&job_id)).unwrap(), b"fake video bytes");
    let enqueued = app.queue.enqueued();
    assert_eq!(enqueued.len(), 1);
    assert_eq!(enqueued[0].job_id, job_id);

    let response = app
        .router
        .oneshot(get(&format!("/jobs/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body, serde_json::json!({"status": "processing"}));
}

#[tokio::test]
async fn test_upload_accepts_other_file_field_and_skips_text() {
    let app = app();

    let response = app
        .router
        .oneshot(upload_request(multipart_body(&[
            ("title", None, b"my clip"),
            ("file", Some("clip.mov"), b"movie"),
        ])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let enqueued = app.queue.enqueued();
    assert_eq!(enqueued.len(), 1);
    assert_eq!(app.store.get(&enqueued[0].input_ref).unwrap(), b"movie");
}

#[tokio::test]
async fn test_upload_without_file_is_rejected() {
    let app = app();

    let response = app
        .router
        .oneshot(upload_request(multipart_body(&[("title", None, b"no file")])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "video required");
    assert!(app.queue.enqueued().is_empty());
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_upload_with_empty_file_is_rejected() {
    let app = app();

    let response = app
        .router
        .oneshot(upload_request(multipart_body(&[("video", Some("empty.mp4"), b"")])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.queue.enqueued().is_empty());
}

#[tokio::test]
async fn test_upload_over_limit_is_413() {
    let app = app_with(ApiConfig {
        max_upload_bytes: 8,
        ..ApiConfig::default()
    });

    let response = app
        .router
        .oneshot(upload_request(multipart_body(&[(
            "video",
            Some("big.mp4"),
            b"this is more than eight bytes",
        )])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("exceeds"));
    assert!(app.queue.enqueued().is_empty());
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_non_multipart_upload_is_400() {
    let app = app();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_storage_failure_is_500() {
    let app = app();
    app.store.fail_puts("inputs/");

    let response = app
        .router
        .oneshot(upload_request(multipart_body(&[("video", Some("a.mp4"), b"data")])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"].is_string());
    assert!(app.queue.enqueued().is_empty());
}

#[tokio::test]
async fn test_upload_enqueue_failure_is_500() {
    let app = app();
    app.queue.set_fail_enqueue(true);

    let response = app
        .router
        .oneshot(upload_request(multipart_body(&[("video", Some("a.mp4"), b"data")])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.store.len(), 1);
}

#[tokio::test]
async fn test_completed_status_returns_result() {
    let app = app();
    let job_id = JobId::new();
    let result = JobResult::new("hello").with_summary("greeting");
    publish_result(&app.store, &job_id, &result).await.unwrap();

    let response = app
        .router
        .oneshot(get(&format!("/jobs/{}", job_id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["transcription"], "hello");
    assert_eq!(body["result"]["summary"], "greeting");
    assert!(body["result"].get("keyPoints").is_none());
}

#[tokio::test]
async fn test_malformed_result_is_returned_raw() {
    let app = app();
    let job_id = JobId::new();
    app.store.insert(result_key(&job_id), b"not json".to_vec());

    let response = app
        .router
        .oneshot(get(&format!("/jobs/{}", job_id)))
        .await
        .unwrap();

    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["raw"], "not json");
}

#[tokio::test]
async fn test_invalid_job_id_is_400() {
    let response = app().router.oneshot(get("/jobs/not-a-uuid")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_status_store_error_is_500() {
    let app = app();
    app.store.fail_gets("results/");

    let response = app
        .router
        .oneshot(get(&format!("/jobs/{}", JobId::new())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_metrics_route_absent_without_handle() {
    let response = app().router.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
