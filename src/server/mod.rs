//! HTTP surface over the [`QueueManager`] (feature `server`).
//!
//! | Method | Path                  | Handler                       |
//! |--------|-----------------------|-------------------------------|
//! | GET    | `/health`             | [`handlers::health`]          |
//! | GET    | `/stats`              | [`handlers::stats`]           |
//! | POST   | `/submit`             | [`handlers::submit`]          |
//! | GET    | `/status/{job_id}`    | [`handlers::status`]          |
//! | GET    | `/result/{job_id}`    | [`handlers::result`]          |
//! | POST   | `/batch/status`       | [`handlers::batch_status`]    |

pub mod handlers;

use crate::manager::QueueManager;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<QueueManager>,
    pub max_upload_mb: u64,
}

impl AppState {
    pub fn new(manager: Arc<QueueManager>, max_upload_mb: u64) -> Self {
        Self {
            manager,
            max_upload_mb,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/submit", post(handlers::submit))
        .route("/status/{job_id}", get(handlers::status))
        .route("/result/{job_id}", get(handlers::result))
        .route("/batch/status", post(handlers::batch_status))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(trace_layer)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then stop accepting connections and
/// let in-flight requests finish.
///
/// The queue manager is not shut down here; its owner decides when.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
