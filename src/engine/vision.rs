//! Vision-LLM engine: rasterise every page with pdfium, transcribe each
//! page image to Markdown with a vision model via edgequake-llm.
//!
//! ```text
//! bytes ─▶ render (pdfium, serialised) ─▶ PNG/base64 ─▶ VLM × N (bounded) ─▶ clean ─▶ join
//! ```
//!
//! `convert` is synchronous like every engine, but page calls are network
//! bound, so it drives them on the tokio runtime captured at construction
//! with `Handle::block_on`. The pool invokes engines from the blocking
//! thread pool, where that is allowed.
//!
//! ## Retry strategy
//!
//! A failed page call is retried `max_retries` times with exponential
//! backoff (`retry_backoff_ms * 2^(attempt-1)`): 500 ms → 1 s → 2 s with
//! the defaults. A page that still fails is replaced by an HTML comment;
//! the document fails only when every page does.

use super::pdfium::{bind, load_error, resolve_library};
use super::{check_pdf_magic, ConversionEngine, ConvertedDocument};
use crate::config::EngineConfig;
use crate::error::{ConversionError, QueueError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

const TRANSCRIBE_PROMPT: &str = "Transcribe this PDF page image into GitHub-flavoured Markdown. \
Keep every piece of text in reading order. Use # headings for titles and sections, \
- and 1. for lists, pipe tables for tables, and fenced blocks for code. \
Do not describe the page, do not add commentary and do not wrap the answer in a code fence.";

pub struct VisionEngine {
    provider: Arc<dyn LLMProvider>,
    settings: EngineConfig,
    library: Option<PathBuf>,
    runtime: Handle,
    render_lock: Mutex<()>,
}

impl VisionEngine {
    /// Build from config. Must be called from within a tokio runtime.
    pub fn from_config(config: &EngineConfig) -> Result<Self, QueueError> {
        let runtime = Handle::try_current().map_err(|e| {
            QueueError::EngineUnavailable(format!("vision engine needs a tokio runtime: {e}"))
        })?;
        let provider = resolve_provider(config)?;
        Ok(Self::with_provider(provider, config.clone(), runtime))
    }

    /// Build around an already-constructed provider.
    pub fn with_provider(
        provider: Arc<dyn LLMProvider>,
        settings: EngineConfig,
        runtime: Handle,
    ) -> Self {
        let library = resolve_library(settings.pdfium_lib_path.as_deref());
        info!(
            model = settings.model.as_deref().unwrap_or("<provider default>"),
            concurrency = settings.concurrency,
            "vision engine ready"
        );
        Self {
            provider,
            settings,
            library,
            runtime,
            render_lock: Mutex::new(()),
        }
    }

    fn render(&self, document: &[u8]) -> Result<Vec<(usize, DynamicImage)>, ConversionError> {
        // pdfium keeps process-wide state; only one render at a time.
        let _guard = self.render_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let pdfium = bind(self.library.as_deref())
            .map_err(|e| ConversionError::Engine(format!("pdfium unavailable: {e:?}")))?;
        let pdf = pdfium
            .load_pdf_from_byte_slice(document, None)
            .map_err(load_error)?;

        let max = self.settings.max_rendered_pixels as i32;
        let render_config = PdfRenderConfig::new()
            .set_target_width(max)
            .set_maximum_height(max);

        let mut images = Vec::new();
        for (idx, page) in pdf.pages().iter().enumerate() {
            match page.render_with_config(&render_config) {
                Ok(bitmap) => images.push((idx, bitmap.as_image())),
                Err(e) => warn!(page = idx + 1, "rasterisation failed: {e:?}"),
            }
        }
        debug!(pages = images.len(), "pages rendered");
        Ok(images)
    }
}

impl ConversionEngine for VisionEngine {
    fn convert(&self, document: &[u8]) -> Result<ConvertedDocument, ConversionError> {
        check_pdf_magic(document)?;
        let rendered = self.render(document)?;
        if rendered.is_empty() {
            return Ok(ConvertedDocument::default());
        }

        let mut encoded = Vec::with_capacity(rendered.len());
        for (idx, img) in &rendered {
            let data = encode_page(img).map_err(|e| ConversionError::PageFailed {
                page: idx + 1,
                detail: format!("PNG encoding failed: {e}"),
            })?;
            encoded.push((*idx, data));
        }
        drop(rendered);

        let provider = Arc::clone(&self.provider);
        let settings = &self.settings;
        let concurrency = settings.concurrency.max(1);

        let mut pages: Vec<(usize, Result<String, ConversionError>)> =
            self.runtime.block_on(async {
                stream::iter(encoded.into_iter().map(|(idx, data)| {
                    let provider = Arc::clone(&provider);
                    async move { (idx, transcribe_page(&provider, idx + 1, data, settings).await) }
                }))
                .buffer_unordered(concurrency)
                .collect()
                .await
            });
        pages.sort_by_key(|(idx, _)| *idx);

        assemble(pages)
    }

    fn name(&self) -> &str {
        "vision"
    }
}

fn resolve_provider(config: &EngineConfig) -> Result<Arc<dyn LLMProvider>, QueueError> {
    let create = |name: &str, model: &str| {
        ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            QueueError::EngineUnavailable(format!("LLM provider '{name}' not configured: {e}"))
        })
    };

    if let Some(name) = config.provider.as_deref() {
        return create(name, config.model.as_deref().unwrap_or(DEFAULT_MODEL));
    }

    if let (Ok(name), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !name.is_empty() && !model.is_empty() {
            return create(&name, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create("openai", config.model.as_deref().unwrap_or(DEFAULT_MODEL));
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
        QueueError::EngineUnavailable(format!(
            "no LLM provider could be detected from the environment \
             (set OPENAI_API_KEY, ANTHROPIC_API_KEY, or engine.provider): {e}"
        ))
    })?;
    Ok(llm)
}

fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}

fn backoff(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))))
}

async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page: usize,
    image: ImageData,
    settings: &EngineConfig,
) -> Result<String, ConversionError> {
    let prompt = settings.system_prompt.as_deref().unwrap_or(TRANSCRIBE_PROMPT);
    let messages = vec![
        ChatMessage::system(prompt),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    };

    let mut last_err = String::from("no attempt made");
    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let wait = backoff(settings.retry_backoff_ms, attempt);
            warn!(page, attempt, "retrying after {:?}", wait);
            sleep(wait).await;
        }
        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    page,
                    input_tokens = response.prompt_tokens,
                    output_tokens = response.completion_tokens,
                    "page transcribed"
                );
                return Ok(clean_markdown(&response.content));
            }
            Err(e) => {
                last_err = e.to_string();
                warn!(page, attempt = attempt + 1, "VLM call failed: {last_err}");
            }
        }
    }

    Err(ConversionError::PageFailed {
        page,
        detail: format!("gave up after {} retries: {last_err}", settings.max_retries),
    })
}

fn assemble(
    pages: Vec<(usize, Result<String, ConversionError>)>,
) -> Result<ConvertedDocument, ConversionError> {
    let total = pages.len();
    let mut first_error = None;
    let mut failed = 0usize;
    let mut sections = Vec::with_capacity(total);

    for (idx, outcome) in pages {
        match outcome {
            Ok(md) => sections.push(md),
            Err(e) => {
                sections.push(format!("<!-- page {} failed: {e} -->", idx + 1));
                first_error.get_or_insert(e.to_string());
                failed += 1;
            }
        }
    }

    if total > 0 && failed == total {
        return Err(ConversionError::AllPagesFailed {
            total,
            first_error: first_error.unwrap_or_default(),
        });
    }
    Ok(ConvertedDocument::from_markdown(sections.join("\n\n---\n\n")))
}

// ── Output clean-up ──────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*)\n```[ \t]*$").unwrap());

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip a wrapping code fence, normalise line endings, trim trailing
/// whitespace and collapse runs of blank lines to one.
pub fn clean_markdown(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n");
    let trimmed = unified.trim();
    let body = match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    };
    let lines: Vec<&str> = body.lines().map(str::trim_end).collect();
    RE_BLANK_RUNS
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}
