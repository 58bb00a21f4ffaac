//! Client ↔ server end-to-end: a real axum server on an ephemeral port,
//! driven by the reqwest polling client.

use pdf2md_queue::client::{collect_inputs, run_batch, BatchOptions, ConversionClient};
use pdf2md_queue::engine::{from_fn, ConvertedDocument};
use pdf2md_queue::server::{self, AppState};
use pdf2md_queue::{
    ClientConfig, ClientError, ConversionEngine, ConversionError, NoopProgressCallback,
    QueueConfig, QueueManager,
};
use std::fs;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ── Test helpers ─────────────────────────────────────────────────────────────

struct LiveServer {
    addr: SocketAddr,
    manager: Arc<QueueManager>,
    release: Arc<AtomicBool>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl LiveServer {
    /// Documents starting with `fail` fail; documents starting with `wait`
    /// block until `release` is set; everything else is echoed back.
    async fn start() -> Self {
        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        let engine: Arc<dyn ConversionEngine> = Arc::new(from_fn("test", move |bytes: &[u8]| {
            if bytes.starts_with(b"fail") {
                return Err(ConversionError::PasswordRequired);
            }
            if bytes.starts_with(b"wait") {
                while !gate.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            Ok(ConvertedDocument::from_markdown(String::from_utf8_lossy(bytes)))
        }));

        let config = QueueConfig::builder().workers(2).build().unwrap();
        let manager = Arc::new(QueueManager::start(engine, config).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let state = AppState::new(Arc::clone(&manager), 10);
        let task = tokio::spawn(server::serve(listener, state, async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            manager,
            release,
            stop,
            task,
        }
    }

    fn client(&self, timeout: Duration) -> ConversionClient {
        let config = ClientConfig::builder()
            .server_url(format!("http://{}/", self.addr))
            .poll_interval(Duration::from_millis(20))
            .timeout(timeout)
            .connect_timeout_secs(2)
            .build()
            .unwrap();
        ConversionClient::new(config).unwrap()
    }

    async fn stop(self) {
        self.release.store(true, Ordering::SeqCst);
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
        self.manager.shutdown().await;
    }
}

// ── Single file ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_check_reaches_the_server() {
    let server = LiveServer::start().await;
    let health = server.client(Duration::from_secs(10)).health().await.unwrap();
    assert_eq!(health.status, "healthy");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn convert_file_writes_markdown_next_to_input() {
    let server = LiveServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("title.pdf");
    fs::write(&pdf, "# Title\n").unwrap();

    let client = server.client(Duration::from_secs(10));
    let written = client.convert_file(&pdf).await.unwrap();

    assert_eq!(written, dir.path().join("title.md"));
    assert_eq!(fs::read_to_string(&written).unwrap(), "# Title\n");
    assert!(!dir.path().join("title.md.tmp").exists());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_job_surfaces_server_cause() {
    let server = LiveServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("locked.pdf");
    fs::write(&pdf, "fail: encrypted").unwrap();

    let err = server
        .client(Duration::from_secs(10))
        .convert_file(&pdf)
        .await
        .unwrap_err();
    match err {
        ClientError::JobFailed { error, .. } => assert!(error.contains("password"), "{error}"),
        other => panic!("expected JobFailed, got {other:?}"),
    }
    assert!(!dir.path().join("locked.md").exists());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_job_is_reported_not_found() {
    let server = LiveServer::start().await;
    let err = server
        .client(Duration::from_secs(10))
        .status("7b1c6c3e-2b0c-4d8e-9a55-5d9f7c1f2a10")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::JobNotFound(_)));
    assert!(!err.is_transient());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_budget_exhaustion_is_a_timeout() {
    let server = LiveServer::start().await;
    let client = server.client(Duration::ZERO);
    let job_id = client.submit_bytes("slow.pdf", b"wait".to_vec()).await.unwrap();

    let err = client.wait_for_completion(&job_id).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }), "{err:?}");

    // The server still owns the job and finishes it once unblocked.
    server.release.store(true, Ordering::SeqCst);
    let patient = server.client(Duration::from_secs(10));
    let status = patient.wait_for_completion(&job_id).await.unwrap();
    assert_eq!(status.status.as_str(), "completed");
    server.stop().await;
}

// ── Batch ───────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_aggregates_skip_success_and_failure() {
    let server = LiveServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("one.pdf"), "# One").unwrap();
    fs::write(root.join("two.pdf"), "# Two").unwrap();
    fs::write(root.join("broken.pdf"), "fail").unwrap();
    fs::write(root.join("done.pdf"), "# Done").unwrap();
    fs::write(root.join("done.md"), "kept as is").unwrap();

    let inputs = collect_inputs(&[root.to_path_buf()], false).unwrap();
    assert_eq!(inputs.len(), 4);

    let client = server.client(Duration::from_secs(10));
    let options = BatchOptions {
        parallelism: 2,
        skip_existing: true,
    };
    let report = run_batch(&client, inputs, &options, Arc::new(NoopProgressCallback)).await;

    assert_eq!(report.found, 4);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.submitted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, root.join("broken.pdf"));
    assert!((report.success_rate() - 200.0 / 3.0).abs() < 1e-9);

    assert_eq!(fs::read_to_string(root.join("one.md")).unwrap(), "# One");
    assert_eq!(fs::read_to_string(root.join("two.md")).unwrap(), "# Two");
    assert_eq!(fs::read_to_string(root.join("done.md")).unwrap(), "kept as is");
    assert!(!root.join("broken.md").exists());

    let stats = server.manager.stats();
    assert_eq!((stats.completed, stats.failed), (2, 1));
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_counts_timeouts_as_submitted_failures() {
    let server = LiveServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fast = dir.path().join("fast.pdf");
    let stuck = dir.path().join("stuck.pdf");
    fs::write(&fast, "# Fast").unwrap();
    fs::write(&stuck, "wait forever").unwrap();

    let client = server.client(Duration::from_secs(1));
    let options = BatchOptions {
        parallelism: 2,
        skip_existing: false,
    };
    let report = run_batch(
        &client,
        vec![fast.clone(), stuck.clone()],
        &options,
        Arc::new(NoopProgressCallback),
    )
    .await;

    assert_eq!(report.submitted, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].path, stuck);
    assert!(report.errors[0].error.contains("Timed out"), "{}", report.errors[0].error);
    assert_eq!(report.success_rate(), 50.0);
    assert!(fast.with_extension("md").exists());
    server.stop().await;
}
