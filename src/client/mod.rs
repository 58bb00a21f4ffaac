//! Polling client for the conversion server (feature `client`).
//!
//! One [`ConversionClient`] per server; it is cheap to share by reference
//! across concurrent tasks. The protocol per file:
//!
//! ```text
//! POST /submit ─▶ GET /status/{id} every poll_interval ─▶ terminal?
//!                                   │                      ├─ completed ─▶ GET /result ─▶ <stem>.md
//!                                   └─ budget exceeded     └─ failed    ─▶ ClientError::JobFailed
//!                                      ─▶ ClientError::Timeout
//! ```

pub mod batch;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::job::JobState;
use crate::wire::{
    FailedResponse, HealthResponse, PendingResponse, ResultResponse, StatusResponse,
    SubmitResponse,
};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use batch::{collect_inputs, output_path_for, run_batch, BatchOptions, BatchReport, FileError};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// What `GET /result/{id}` returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Ready(ResultResponse),
    Pending(PendingResponse),
    Failed(FailedResponse),
}

/// Upload timeout for a file of `size` bytes: `base + per_mb × size_in_MB`.
pub fn upload_timeout(size: u64, base_secs: u64, per_mb_secs: u64) -> Duration {
    let mb = size as f64 / BYTES_PER_MB;
    Duration::from_secs(base_secs) + Duration::from_secs_f64(per_mb_secs as f64 * mb)
}

pub struct ConversionClient {
    http: reqwest::Client,
    config: ClientConfig,
}

fn transport(url: &str) -> impl FnOnce(reqwest::Error) -> ClientError + '_ {
    move |source| ClientError::Http {
        url: url.to_string(),
        source,
    }
}

async fn unexpected(url: &str, response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClientError::UnexpectedStatus {
        url: url.to_string(),
        status,
        body,
    }
}

impl ConversionClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(transport(config.base_url()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    /// `GET /health`. Used as a pre-flight check before a batch.
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let url = self.url("/health");
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(self.config.status_timeout_secs))
            .send()
            .await
            .map_err(transport(&url))?;
        if response.status() != StatusCode::OK {
            return Err(unexpected(&url, response).await);
        }
        response.json().await.map_err(transport(&url))
    }

    /// Upload `data` as `filename`. Returns the job id.
    pub async fn submit_bytes(&self, filename: &str, data: Vec<u8>) -> Result<String, ClientError> {
        let url = self.url("/submit");
        let timeout = upload_timeout(
            data.len() as u64,
            self.config.upload_timeout_base_secs,
            self.config.upload_timeout_per_mb_secs,
        );
        let part = Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(transport(&url))?;
        let form = Form::new().part("file", part);

        debug!(filename, ?timeout, "uploading");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport(&url))?;
        if response.status() != StatusCode::OK {
            return Err(unexpected(&url, response).await);
        }
        let body: SubmitResponse = response.json().await.map_err(transport(&url))?;
        Ok(body.job_id)
    }

    /// Read `path` and upload it under its file name.
    pub async fn submit_file(&self, path: &Path) -> Result<String, ClientError> {
        let data = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".into());
        self.submit_bytes(&filename, data).await
    }

    /// `GET /status/{id}`; a 404 becomes [`ClientError::JobNotFound`].
    pub async fn status(&self, job_id: &str) -> Result<StatusResponse, ClientError> {
        let url = self.url(&format!("/status/{job_id}"));
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(self.config.status_timeout_secs))
            .send()
            .await
            .map_err(transport(&url))?;
        match response.status() {
            StatusCode::OK => response.json().await.map_err(transport(&url)),
            StatusCode::NOT_FOUND => Err(ClientError::JobNotFound(job_id.to_string())),
            _ => Err(unexpected(&url, response).await),
        }
    }

    /// `GET /result/{id}`: 200 ready, 202 pending, 422 failed, 404 unknown.
    pub async fn result(&self, job_id: &str) -> Result<ResultPayload, ClientError> {
        let url = self.url(&format!("/result/{job_id}"));
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(self.config.result_timeout_secs))
            .send()
            .await
            .map_err(transport(&url))?;
        match response.status() {
            StatusCode::OK => Ok(ResultPayload::Ready(
                response.json().await.map_err(transport(&url))?,
            )),
            StatusCode::ACCEPTED => Ok(ResultPayload::Pending(
                response.json().await.map_err(transport(&url))?,
            )),
            StatusCode::UNPROCESSABLE_ENTITY => Ok(ResultPayload::Failed(
                response.json().await.map_err(transport(&url))?,
            )),
            StatusCode::NOT_FOUND => Err(ClientError::JobNotFound(job_id.to_string())),
            _ => Err(unexpected(&url, response).await),
        }
    }

    /// Poll until the job is terminal or the wait budget runs out.
    ///
    /// Transient failures of individual polls are retried; a 404 is not.
    /// Timing out leaves the job alone on the server.
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<StatusResponse, ClientError> {
        let started = Instant::now();
        let budget = self.config.timeout();
        let every = self.config.poll_interval();

        loop {
            match self.status(job_id).await {
                Ok(status) if status.status.is_terminal() => return Ok(status),
                Ok(status) => debug!(job_id, state = %status.status, "still waiting"),
                Err(e) if e.is_transient() => warn!(job_id, "status poll failed, retrying: {e}"),
                Err(e) => return Err(e),
            }

            let elapsed = started.elapsed();
            if elapsed >= budget {
                return Err(ClientError::Timeout {
                    job_id: job_id.to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }
            tokio::time::sleep(every.min(budget - elapsed)).await;
        }
    }

    /// Wait for `job_id`, then write its Markdown to `output`.
    pub async fn finish_job(&self, job_id: &str, output: &Path) -> Result<PathBuf, ClientError> {
        let status = self.wait_for_completion(job_id).await?;
        if status.status == JobState::Failed {
            return Err(ClientError::JobFailed {
                job_id: job_id.to_string(),
                error: status.error.unwrap_or_else(|| "unknown error".into()),
            });
        }

        let url = self.url(&format!("/result/{job_id}"));
        match self.result(job_id).await? {
            ResultPayload::Ready(result) => {
                write_atomically(output, &result.markdown).await?;
                info!(
                    job_id,
                    output = %output.display(),
                    images = result.image_count,
                    "saved"
                );
                Ok(output.to_path_buf())
            }
            ResultPayload::Failed(failed) => Err(ClientError::JobFailed {
                job_id: job_id.to_string(),
                error: failed.error,
            }),
            ResultPayload::Pending(pending) => Err(ClientError::UnexpectedStatus {
                url,
                status: StatusCode::ACCEPTED.as_u16(),
                body: format!("job reported {} after reaching a terminal state", pending.status),
            }),
        }
    }

    /// Submit one PDF, wait for it and save `<stem>.md` next to it.
    pub async fn convert_file(&self, pdf: &Path) -> Result<PathBuf, ClientError> {
        let job_id = self.submit_file(pdf).await?;
        self.finish_job(&job_id, &output_path_for(pdf)).await
    }
}

/// Write through a `.md.tmp` sibling and rename, so a crash never leaves a
/// half-written output that the next run would skip.
async fn write_atomically(path: &Path, contents: &str) -> Result<(), ClientError> {
    let io = |source| ClientError::Io {
        path: path.to_path_buf(),
        source,
    };
    let tmp = path.with_extension("md.tmp");
    tokio::fs::write(&tmp, contents).await.map_err(io)?;
    tokio::fs::rename(&tmp, path).await.map_err(io)
}
