//! HTTP server binary for pdf2md-queue.
//!
//! Loads `config.json` (if present), lets CLI flags override it, starts the
//! queue manager and serves the HTTP API until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use pdf2md_queue::config::DEFAULT_CONFIG_FILE;
use pdf2md_queue::engine;
use pdf2md_queue::server::{self, AppState};
use pdf2md_queue::{EngineKind, QueueManager, ServerConfig, ShutdownPolicy};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Defaults (0.0.0.0:5000, one worker, text engine)
  pdf2md-server

  # Four workers on a custom port
  pdf2md-server --workers 4 --port 8080

  # Vision engine (needs an LLM API key)
  OPENAI_API_KEY=sk-... pdf2md-server --engine vision

CONFIG FILE (config.json, all keys optional):
  {
    "host": "0.0.0.0",
    "port": 5000,
    "max_upload_mb": 500,
    "queue":  { "workers": 2, "shutdown_policy": "drain", "retention_secs": 86400 },
    "engine": { "kind": "text", "pdfium_lib_path": "/opt/pdfium/lib" }
  }

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  OPENAI_API_KEY          API key for the vision engine
  EDGEQUAKE_LLM_PROVIDER  Override vision provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override vision model ID
  RUST_LOG                Log filter, wins over --verbose / --quiet
"#;

/// Serve the asynchronous PDF → Markdown conversion API.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md-server",
    version,
    about = "Asynchronous PDF to Markdown conversion server",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JSON config file. Missing file means defaults.
    #[arg(short, long, env = "PDF2MD_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Interface to bind.
    #[arg(long, env = "PDF2MD_HOST")]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "PDF2MD_PORT")]
    port: Option<u16>,

    /// Number of conversion workers.
    #[arg(short, long, env = "PDF2MD_WORKERS",
          value_parser = clap::value_parser!(u32).range(1..=256))]
    workers: Option<u32>,

    /// Conversion engine: text or vision.
    #[arg(short, long, env = "PDF2MD_ENGINE")]
    engine: Option<EngineKind>,

    /// Upload size limit in megabytes.
    #[arg(long, env = "PDF2MD_MAX_UPLOAD_MB")]
    max_upload_mb: Option<u64>,

    /// On shutdown, drop queued jobs instead of converting them.
    #[arg(long, env = "PDF2MD_ABANDON_ON_SHUTDOWN")]
    abandon_on_shutdown: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(workers) = self.workers {
            config.queue.workers = workers as usize;
        }
        if let Some(kind) = self.engine {
            config.engine.kind = kind;
        }
        if let Some(mb) = self.max_upload_mb {
            config.max_upload_mb = mb;
        }
        if self.abandon_on_shutdown {
            config.queue.shutdown_policy = ShutdownPolicy::Abandon;
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let mut config = ServerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    cli.apply(&mut config);
    config
        .queue
        .validate()
        .context("Invalid queue configuration")?;

    // ── Engine + queue ───────────────────────────────────────────────────
    let engine = engine::from_config(&config.engine).context("Failed to initialise engine")?;
    info!(engine = engine.name(), "conversion engine ready");

    let manager = Arc::new(
        QueueManager::start(engine, config.queue.clone()).context("Failed to start queue")?,
    );

    // ── HTTP ─────────────────────────────────────────────────────────────
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        addr = %listener.local_addr().context("Failed to read bound address")?,
        workers = manager.worker_count(),
        max_upload_mb = config.max_upload_mb,
        "{} listening",
        pdf2md_queue::wire::SERVICE_NAME
    );

    let state = AppState::new(Arc::clone(&manager), config.max_upload_mb);
    let served = server::serve(listener, state, shutdown_signal()).await;

    manager.shutdown().await;
    served.context("HTTP server failed")?;
    Ok(())
}
