//! Configuration for the queue, the server and the polling client.
//!
//! [`QueueConfig`] is built via its validating builder; [`ServerConfig`]
//! and [`ClientConfig`] are plain serde structs loaded from an optional
//! JSON file (a missing file means defaults, unknown keys such as
//! `_comment` are ignored). Command-line flags override file values.
//!
//! # Example
//! ```rust
//! use pdf2md_queue::config::{QueueConfig, ShutdownPolicy};
//! use std::time::Duration;
//!
//! let config = QueueConfig::builder()
//!     .workers(4)
//!     .shutdown_policy(ShutdownPolicy::Abandon)
//!     .retention(Some(Duration::from_secs(3600)))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.workers, 4);
//! ```

use crate::error::QueueError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default config file looked up by both binaries.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Longest accepted gap between two status polls.
pub const MAX_POLL_INTERVAL_SECS: f64 = 3600.0;

// ── Queue ────────────────────────────────────────────────────────────────

/// What the worker pool does with still-queued jobs on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Finish every job already in the queue, then exit. (default)
    #[default]
    Drain,
    /// Finish the job in hand, then exit. Remaining jobs stay QUEUED.
    Abandon,
}

/// Worker pool and retention settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of workers, fixed for the life of the pool. Default: 1.
    ///
    /// A single worker keeps one conversion in flight at a time, which is
    /// what a GPU- or memory-bound engine usually wants.
    #[serde(alias = "num_workers")]
    pub workers: usize,

    pub shutdown_policy: ShutdownPolicy,

    /// Seconds a terminal job is kept after completion. `null` keeps
    /// jobs forever. Default: 86 400 (24 h).
    pub retention_secs: Option<u64>,

    /// Seconds between retention sweeps. Default: 300.
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            shutdown_policy: ShutdownPolicy::Drain,
            retention_secs: Some(24 * 60 * 60),
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.workers == 0 {
            return Err(QueueError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(QueueError::InvalidConfig(
                "sweep_interval_secs must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`QueueConfig`].
#[derive(Debug)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.config.shutdown_policy = policy;
        self
    }

    /// `None` disables eviction. Sub-second values round down to whole seconds.
    pub fn retention(mut self, ttl: Option<Duration>) -> Self {
        self.config.retention_secs = ttl.map(|d| d.as_secs());
        self
    }

    pub fn sweep_interval(mut self, every: Duration) -> Self {
        self.config.sweep_interval_secs = every.as_secs().max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<QueueConfig, QueueError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

/// Which bundled conversion engine the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// pdfium text layer + embedded images. (default)
    #[default]
    Text,
    /// Page rasterisation + vision LLM transcription.
    Vision,
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pdfium" => Ok(EngineKind::Text),
            "vision" | "vlm" | "llm" => Ok(EngineKind::Vision),
            other => Err(format!("Unknown engine '{other}'. Use text or vision")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,

    /// pdfium shared library (file or directory). `PDFIUM_LIB_PATH` wins.
    pub pdfium_lib_path: Option<PathBuf>,

    /// LLM provider name, e.g. "openai", "anthropic", "ollama". When unset
    /// the provider is auto-detected from the environment.
    pub provider: Option<String>,

    pub model: Option<String>,

    /// Longest rendered page edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Concurrent VLM calls per document. Default: 10.
    pub concurrency: usize,

    pub temperature: f32,

    pub max_tokens: usize,

    /// Retries per page on a failed VLM call. Default: 3.
    pub max_retries: u32,

    /// First retry delay; doubles on every further attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Overrides the built-in transcription prompt.
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Text,
            pdfium_lib_path: None,
            provider: None,
            model: None,
            max_rendered_pixels: 2000,
            concurrency: 10,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

// ── Server ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upload size limit in megabytes. Default: 500.
    pub max_upload_mb: u64,
    pub queue: QueueConfig,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            max_upload_mb: 500,
            queue: QueueConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, QueueError> {
        let config: Self = load_json(path)?;
        config.queue.validate()?;
        if config.max_upload_mb == 0 {
            return Err(QueueError::InvalidConfig("max_upload_mb must be ≥ 1".into()));
        }
        Ok(config)
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Client ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    /// Seconds between status polls. Default: 2.
    pub poll_interval_secs: f64,
    /// Wait budget per job in seconds, counted from submission. Default: 300.
    pub timeout_secs: u64,
    /// Files submitted and polled concurrently. Default: 1.
    pub workers: usize,
    pub connect_timeout_secs: u64,
    /// Upload timeout = base + per_mb × size in MB. Defaults: 60 + 15/MB.
    pub upload_timeout_base_secs: u64,
    pub upload_timeout_per_mb_secs: u64,
    pub status_timeout_secs: u64,
    pub result_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".into(),
            poll_interval_secs: 2.0,
            timeout_secs: 300,
            workers: 1,
            connect_timeout_secs: 30,
            upload_timeout_base_secs: 60,
            upload_timeout_per_mb_secs: 15,
            status_timeout_secs: 5,
            result_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, QueueError> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.workers == 0 {
            return Err(QueueError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if !(self.poll_interval_secs > 0.0 && self.poll_interval_secs <= MAX_POLL_INTERVAL_SECS) {
            return Err(QueueError::InvalidConfig(format!(
                "poll_interval_secs must be in (0, {MAX_POLL_INTERVAL_SECS}], got {}",
                self.poll_interval_secs
            )));
        }
        if self.server_url.trim().is_empty() {
            return Err(QueueError::InvalidConfig("server_url is empty".into()));
        }
        Ok(())
    }

    /// Out-of-range values (an unvalidated config) fall back to the bound.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs.min(MAX_POLL_INTERVAL_SECS))
            .unwrap_or(Duration::from_secs_f64(MAX_POLL_INTERVAL_SECS))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Server URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into();
        self
    }

    pub fn poll_interval(mut self, every: Duration) -> Self {
        self.config.poll_interval_secs = every.as_secs_f64();
        self
    }

    pub fn timeout(mut self, budget: Duration) -> Self {
        self.config.timeout_secs = budget.as_secs();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn upload_timeout(mut self, base_secs: u64, per_mb_secs: u64) -> Self {
        self.config.upload_timeout_base_secs = base_secs;
        self.config.upload_timeout_per_mb_secs = per_mb_secs;
        self
    }

    pub fn build(self) -> Result<ClientConfig, QueueError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, QueueError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(T::default());
        }
        Err(source) => {
            return Err(QueueError::ConfigRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw).map_err(|source| QueueError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}
