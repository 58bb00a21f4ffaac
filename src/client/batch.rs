//! Many files through one server: input discovery, bounded concurrency and
//! the aggregate report.

use super::ConversionClient;
use crate::error::ClientError;
use crate::progress::{BatchProgressCallback, ProgressCallback};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Where the Markdown for `pdf` goes: `<stem>.md` next to it.
pub fn output_path_for(pdf: &Path) -> PathBuf {
    pdf.with_extension("md")
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Expand `paths` into a sorted, de-duplicated list of PDF files.
///
/// Files are taken as given but must end in `.pdf` (any case). Directories
/// contribute their `*.pdf` entries, descending into subdirectories only
/// when `recursive` is set.
pub fn collect_inputs(paths: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>, ClientError> {
    let mut found = Vec::new();
    for path in paths {
        let meta = std::fs::metadata(path).map_err(|source| ClientError::Io {
            path: path.clone(),
            source,
        })?;
        if meta.is_dir() {
            scan_dir(path, recursive, &mut found)?;
        } else if is_pdf(path) {
            found.push(path.clone());
        } else {
            return Err(ClientError::InvalidInput(path.clone()));
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn scan_dir(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<(), ClientError> {
    let io = |source| ClientError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_dir() {
            if recursive {
                scan_dir(&path, recursive, out)?;
            }
        } else if is_pdf(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Files in flight at once.
    pub parallelism: usize,
    /// Skip inputs whose `<stem>.md` already exists.
    pub skip_existing: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            skip_existing: true,
        }
    }
}

/// Why one file did not produce Markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// PDFs handed to the run.
    pub found: usize,
    pub skipped: usize,
    /// Accepted by the server.
    pub submitted: usize,
    pub succeeded: usize,
    /// Rejected at submission or failed afterwards.
    pub failed: usize,
    pub errors: Vec<FileError>,
    pub elapsed: Duration,
}

impl BatchReport {
    /// `succeeded / submitted × 100`; 0 when nothing was submitted.
    pub fn success_rate(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.submitted as f64 * 100.0
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Files found:      {}", self.found)?;
        writeln!(f, "Skipped:          {}", self.skipped)?;
        writeln!(f, "Submitted:        {}", self.submitted)?;
        writeln!(f, "Succeeded:        {}", self.succeeded)?;
        writeln!(f, "Failed:           {}", self.failed)?;
        writeln!(f, "Success rate:     {:.1}%", self.success_rate())?;
        write!(f, "Elapsed:          {:.1}s", self.elapsed.as_secs_f64())
    }
}

enum FileOutcome {
    Converted,
    /// Never got a job id.
    Rejected(FileError),
    /// Had a job id, then failed, timed out or could not be saved.
    Failed(FileError),
}

async fn process_one(
    client: &ConversionClient,
    pdf: PathBuf,
    progress: &dyn BatchProgressCallback,
) -> FileOutcome {
    progress.on_file_start(&pdf);

    let job_id = match client.submit_file(&pdf).await {
        Ok(id) => id,
        Err(e) => {
            warn!(file = %pdf.display(), "submission failed: {e}");
            let error = e.to_string();
            progress.on_file_error(&pdf, &error);
            return FileOutcome::Rejected(FileError { path: pdf, error });
        }
    };
    progress.on_file_submitted(&pdf, &job_id);

    let output = output_path_for(&pdf);
    match client.finish_job(&job_id, &output).await {
        Ok(written) => {
            progress.on_file_complete(&pdf, &written);
            FileOutcome::Converted
        }
        Err(e) => {
            warn!(file = %pdf.display(), job_id = %job_id, "conversion failed: {e}");
            let error = e.to_string();
            progress.on_file_error(&pdf, &error);
            FileOutcome::Failed(FileError { path: pdf, error })
        }
    }
}

/// Convert `inputs` through `client`, at most `options.parallelism` at a
/// time. Per-file failures are collected in the report, never propagated.
pub async fn run_batch(
    client: &ConversionClient,
    inputs: Vec<PathBuf>,
    options: &BatchOptions,
    progress: ProgressCallback,
) -> BatchReport {
    let started = Instant::now();
    let found = inputs.len();

    let (skipped, todo): (Vec<PathBuf>, Vec<PathBuf>) = inputs
        .into_iter()
        .partition(|pdf| options.skip_existing && output_path_for(pdf).exists());

    info!(
        found,
        skipped = skipped.len(),
        parallelism = options.parallelism,
        "starting batch"
    );
    progress.on_batch_start(todo.len(), skipped.len());
    for pdf in &skipped {
        progress.on_file_skipped(pdf);
    }

    let outcomes: Vec<FileOutcome> = stream::iter(todo)
        .map(|pdf| process_one(client, pdf, progress.as_ref()))
        .buffer_unordered(options.parallelism.max(1))
        .collect()
        .await;

    let mut report = BatchReport {
        found,
        skipped: skipped.len(),
        ..BatchReport::default()
    };
    for outcome in outcomes {
        match outcome {
            FileOutcome::Converted => {
                report.submitted += 1;
                report.succeeded += 1;
            }
            FileOutcome::Rejected(e) => {
                report.failed += 1;
                report.errors.push(e);
            }
            FileOutcome::Failed(e) => {
                report.submitted += 1;
                report.failed += 1;
                report.errors.push(e);
            }
        }
    }
    report.errors.sort_by(|a, b| a.path.cmp(&b.path));
    report.elapsed = started.elapsed();

    progress.on_batch_complete(report.succeeded, report.failed, report.elapsed);
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "batch finished"
    );
    report
}
