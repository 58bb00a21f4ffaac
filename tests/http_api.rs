//! HTTP contract tests: the router is driven in-process with
//! `tower::ServiceExt::oneshot`, no socket involved.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use pdf2md_queue::engine::{from_fn, ConvertedDocument};
use pdf2md_queue::server::{create_router, AppState};
use pdf2md_queue::{ConversionEngine, ConversionError, QueueConfig, QueueManager};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "pdf2md-test-boundary";

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Echoes the document as Markdown; documents starting with `fail` fail and
/// documents starting with `wait` block until `release` is set.
fn engine(release: Arc<AtomicBool>) -> Arc<dyn ConversionEngine> {
    Arc::new(from_fn("test", move |bytes: &[u8]| {
        if bytes.starts_with(b"fail") {
            return Err(ConversionError::Corrupt("broken trailer".into()));
        }
        if bytes.starts_with(b"wait") {
            while !release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(ConvertedDocument::from_markdown(String::from_utf8_lossy(bytes)))
    }))
}

struct Harness {
    app: Router,
    manager: Arc<QueueManager>,
    release: Arc<AtomicBool>,
}

impl Harness {
    fn new() -> Self {
        let release = Arc::new(AtomicBool::new(false));
        let config = QueueConfig::builder().workers(2).build().unwrap();
        let manager =
            Arc::new(QueueManager::start(engine(Arc::clone(&release)), config).unwrap());
        let app = create_router(AppState::new(Arc::clone(&manager), 1));
        Self {
            app,
            manager,
            release,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn upload(&self, parts: &[(&str, &str, &[u8])]) -> (StatusCode, Value) {
        self.send(multipart_request(parts)).await
    }

    async fn wait_terminal(&self, job_id: &str) -> Value {
        for _ in 0..500 {
            let (status, body) = self.get(&format!("/status/{job_id}")).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "completed" || body["status"] == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never finished");
    }
}

/// `(field name, file name, content)` triples as a multipart/form-data body.
fn multipart_request(parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (field, filename, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/submit")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(Bytes::from(body)))
        .unwrap()
}

fn json_request(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ── Service endpoints ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_service() {
    let h = Harness::new();
    let (status, body) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "PDF to Markdown Converter");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    h.manager.shutdown().await;
}

#[tokio::test]
async fn stats_start_empty() {
    let h = Harness::new();
    let (status, body) = h.get("/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"queue_size": 0, "total_jobs": 0, "queued": 0, "processing": 0, "completed": 0, "failed": 0})
    );
    h.manager.shutdown().await;
}

// ── Submit → status → result ────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn title_document_round_trip() {
    let h = Harness::new();
    let (status, body) = h.upload(&[("file", "title.pdf", b"# Title")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "title.pdf");
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let done = h.wait_terminal(&job_id).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["has_result"], true);
    assert!(done["error"].is_null());
    assert!(done["started_at"].is_string());
    assert!(done["completed_at"].is_string());

    let (status, result) = h.get(&format!("/result/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["markdown"], "# Title");
    assert_eq!(result["image_count"], 0);
    assert_eq!(result["filename"], "title.pdf");
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unfinished_job_result_is_accepted_not_ready() {
    let h = Harness::new();
    let (_, body) = h.upload(&[("file", "slow.pdf", b"wait for me")]).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, pending) = h.get(&format!("/result/{job_id}")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(pending["message"], "Job not completed yet");
    assert!(pending["status"] == "queued" || pending["status"] == "processing");

    h.release.store(true, Ordering::SeqCst);
    assert_eq!(h.wait_terminal(&job_id).await["status"], "completed");
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_job_result_is_unprocessable() {
    let h = Harness::new();
    let (_, body) = h.upload(&[("file", "bad.pdf", b"fail please")]).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let done = h.wait_terminal(&job_id).await;
    assert_eq!(done["status"], "failed");
    assert_eq!(done["has_result"], false);

    let (status, failed) = h.get(&format!("/result/{job_id}")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(failed["status"], "failed");
    assert!(failed["error"].as_str().unwrap().contains("broken trailer"));
    assert!(failed.get("markdown").is_none());
    h.manager.shutdown().await;
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let h = Harness::new();
    for uri in [
        "/status/7b1c6c3e-2b0c-4d8e-9a55-5d9f7c1f2a10",
        "/status/not-a-uuid",
        "/result/7b1c6c3e-2b0c-4d8e-9a55-5d9f7c1f2a10",
        "/result/%2E%2E%2Fetc",
    ] {
        let (status, body) = h.get(uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"], "Job not found", "{uri}");
    }
    h.manager.shutdown().await;
}

// ── Submission validation ───────────────────────────────────────────────────

#[tokio::test]
async fn upload_validation_errors() {
    let h = Harness::new();

    let (status, body) = h.upload(&[("other", "x.pdf", b"%PDF")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file provided");

    let (status, body) = h.upload(&[("file", "", b"%PDF")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file selected");

    let (status, body) = h.upload(&[("file", "notes.txt", b"hello")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Only PDF files are accepted");

    let (status, _) = h
        .send(
            Request::post("/submit")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("not multipart"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.manager.stats().total_jobs, 0);
    h.manager.shutdown().await;
}

#[tokio::test]
async fn oversized_upload_is_rejected_with_limit() {
    let h = Harness::new();
    let big = vec![b'x'; 1024 * 1024 + 10];
    let (status, body) = h.upload(&[("file", "big.pdf", &big)]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "File too large");
    assert_eq!(body["max_size_mb"], 1);
    assert_eq!(h.manager.stats().total_jobs, 0);
    h.manager.shutdown().await;
}

#[tokio::test]
async fn client_path_components_are_stripped() {
    let h = Harness::new();
    let (status, body) = h
        .upload(&[("file", "../../secret/report 1.pdf", b"# R")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "report_1.pdf");
    h.manager.shutdown().await;
}

#[tokio::test]
async fn submit_after_shutdown_is_unavailable() {
    let h = Harness::new();
    h.manager.shutdown().await;
    let (status, _) = h.upload(&[("file", "late.pdf", b"# Late")]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ── Batch endpoints ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_submit_and_batch_status() {
    let h = Harness::new();
    let (status, body) = h
        .upload(&[
            ("files[]", "a.pdf", b"# A"),
            ("files[]", "b.txt", b"plain"),
            ("files[]", "c.PDF", b"# C"),
        ])
        .await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0]["status"], "queued");
    assert_eq!(jobs[1]["status"], "rejected");
    assert!(jobs[1].get("job_id").is_none());
    assert_eq!(jobs[2]["status"], "queued");

    let a = jobs[0]["job_id"].as_str().unwrap().to_string();
    let c = jobs[2]["job_id"].as_str().unwrap().to_string();
    h.wait_terminal(&a).await;
    h.wait_terminal(&c).await;

    let request = json!({ "job_ids": [a, "missing", c] }).to_string();
    let (status, body) = h.send(json_request("/batch/status", &request)).await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["status"], "completed");
    assert_eq!(results[1], json!({"job_id": "missing", "error": "Job not found"}));
    assert_eq!(results[2]["filename"], "c.PDF");
    h.manager.shutdown().await;
}

#[tokio::test]
async fn malformed_batch_status_body_is_bad_request() {
    let h = Harness::new();
    let (status, body) = h.send(json_request("/batch/status", "{\"ids\": 3}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    h.manager.shutdown().await;
}
