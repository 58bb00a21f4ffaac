//! Batch client binary for pdf2md-queue.
//!
//! Finds PDFs, uploads them to a running `pdf2md-server`, polls until each
//! job is done and writes `<stem>.md` next to every input.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2md_queue::client::{collect_inputs, run_batch, BatchOptions, ConversionClient};
use pdf2md_queue::config::DEFAULT_CONFIG_FILE;
use pdf2md_queue::{BatchProgressCallback, ClientConfig, NoopProgressCallback, ProgressCallback};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole batch; per-file outcomes are printed above it as
/// they arrive, in completion order.
struct CliProgressCallback {
    bar: ProgressBar,
    in_flight: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            in_flight: AtomicUsize::new(0),
        })
    }

    fn finish_one(&self) {
        let left = self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        self.bar.set_message(format!("{left} in flight"));
        self.bar.inc(1);
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize, skipped: usize) {
        self.bar.set_length(total as u64);
        let note = if skipped > 0 {
            dim(&format!("  ({skipped} already converted)"))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} {}{note}",
            cyan("◆"),
            bold(&format!("Converting {total} files…"))
        ));
    }

    fn on_file_skipped(&self, input: &Path) {
        self.bar
            .println(format!("  {} {}", dim("↷"), dim(&display_name(input))));
    }

    fn on_file_start(&self, _input: &Path) {
        let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar.set_message(format!("{n} in flight"));
    }

    fn on_file_complete(&self, input: &Path, output: &Path) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            display_name(input),
            dim(&format!("→ {}", display_name(output))),
        ));
        self.finish_one();
    }

    fn on_file_error(&self, input: &Path, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            display_name(input),
            red(&msg)
        ));
        self.finish_one();
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, elapsed: Duration) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} files converted in {:.1}s",
                green("✔"),
                bold(&succeeded.to_string()),
                elapsed.as_secs_f64()
            );
        } else {
            eprintln!(
                "{} {} converted, {} failed  {}",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                red(&failed.to_string()),
                dim(&format!("{:.1}s", elapsed.as_secs_f64())),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF in a folder
  pdf2md-client ./papers

  # Walk subfolders, four files at a time
  pdf2md-client -r -w 4 ./archive

  # Redo files that already have a .md
  pdf2md-client --force report.pdf

  # Talk to a remote server with a longer wait budget
  pdf2md-client --server http://conv.internal:5000 --timeout 900 big.pdf

OUTPUT:
  Each input.pdf produces input.md in the same directory. Inputs whose .md
  already exists are skipped unless --force is given. The exit code is 1
  when any file failed.
"#;

/// Convert PDFs to Markdown through a pdf2md-server.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md-client",
    version,
    about = "Batch client for the pdf2md conversion server",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files and/or directories containing PDFs.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Descend into subdirectories.
    #[arg(short, long)]
    recursive: bool,

    /// Files converted concurrently.
    #[arg(short, long, env = "PDF2MD_CLIENT_WORKERS",
          value_parser = clap::value_parser!(u32).range(1..=64))]
    workers: Option<u32>,

    /// Server base URL.
    #[arg(short, long, env = "PDF2MD_SERVER")]
    server: Option<String>,

    /// JSON config file. Missing file means defaults.
    #[arg(short, long, env = "PDF2MD_CLIENT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Wait budget per file in seconds.
    #[arg(short, long, env = "PDF2MD_TIMEOUT")]
    timeout: Option<u64>,

    /// Seconds between status polls.
    #[arg(long, env = "PDF2MD_POLL_INTERVAL")]
    poll_interval: Option<f64>,

    /// Convert even if the .md output already exists.
    #[arg(short, long)]
    force: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Print the summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,
}

impl Cli {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(ref url) = self.server {
            config.server_url = url.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers as usize;
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = secs;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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
    let mut config = ClientConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    cli.apply(&mut config);
    config.validate().context("Invalid client configuration")?;

    let inputs = collect_inputs(&cli.inputs, cli.recursive).context("Failed to collect inputs")?;
    if inputs.is_empty() {
        bail!("No PDF files found");
    }

    let client = ConversionClient::new(config.clone()).context("Failed to build HTTP client")?;
    let health = client
        .health()
        .await
        .with_context(|| format!("Server at {} is not reachable", config.base_url()))?;
    if !cli.quiet {
        eprintln!(
            "{} {} {}",
            cyan("◆"),
            bold(&health.service),
            dim(&format!("v{} at {}", health.version, config.base_url()))
        );
    }

    let options = BatchOptions {
        parallelism: config.workers,
        skip_existing: !cli.force,
    };
    let progress: ProgressCallback = if show_progress {
        CliProgressCallback::new()
    } else {
        Arc::new(NoopProgressCallback)
    };

    let report = run_batch(&client, inputs, &options, progress).await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else if !cli.quiet {
        eprintln!("\n{report}");
        for failure in &report.errors {
            eprintln!("  {} {}: {}", red("✗"), failure.path.display(), failure.error);
        }
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
