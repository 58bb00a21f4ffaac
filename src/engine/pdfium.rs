//! Text-layer engine backed by pdfium.
//!
//! Loads the PDF from memory, emits each page's text layer as Markdown
//! paragraphs and pulls embedded raster images out as PNG assets. Pages
//! are separated by a horizontal rule; figures are numbered across the
//! whole document and referenced right after the page they appear on.
//!
//! ## Library resolution
//!
//! 1. `PDFIUM_LIB_PATH` (file or directory)
//! 2. `EngineConfig::pdfium_lib_path` (file or directory)
//! 3. the system library search path
//!
//! pdfium keeps global state, so this engine reports itself as
//! non-reentrant and the pool serialises calls into it.

use super::{check_pdf_magic, ConversionEngine, ConvertedDocument, ExtractedAsset};
use crate::error::{ConversionError, QueueError};
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What one page contributes to the output.
#[derive(Debug, Default)]
struct PageContent {
    text: Option<String>,
    figures: Vec<String>,
}

pub struct PdfiumTextEngine {
    library: Option<PathBuf>,
}

impl PdfiumTextEngine {
    /// Resolve and probe the pdfium library once so a missing library fails
    /// at startup rather than on the first job.
    pub fn new(configured: Option<&Path>) -> Result<Self, QueueError> {
        let library = resolve_library(configured);

        bind(library.as_deref()).map_err(|e| {
            QueueError::EngineUnavailable(format!(
                "cannot load pdfium ({}): {e:?}",
                library
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "system library".into())
            ))
        })?;

        info!(library = ?library, "pdfium text engine ready");
        Ok(Self { library })
    }
}

/// Where to load pdfium from, or `None` for the system search path.
pub(super) fn resolve_library(configured: Option<&Path>) -> Option<PathBuf> {
    choose_library(std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from), configured)
}

fn choose_library(from_env: Option<PathBuf>, configured: Option<&Path>) -> Option<PathBuf> {
    from_env
        .or_else(|| configured.map(Path::to_path_buf))
        .map(|p| library_file(&p))
}

fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

pub(super) fn bind(library: Option<&Path>) -> Result<Pdfium, PdfiumError> {
    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path)?,
        None => Pdfium::bind_to_system_library()?,
    };
    Ok(Pdfium::new(bindings))
}

/// Classify a load failure; encrypted documents get their own variant.
pub(super) fn load_error(e: PdfiumError) -> ConversionError {
    let detail = format!("{e:?}");
    if detail.contains("Password") || detail.contains("password") {
        ConversionError::PasswordRequired
    } else {
        ConversionError::Corrupt(detail)
    }
}

impl ConversionEngine for PdfiumTextEngine {
    fn convert(&self, document: &[u8]) -> Result<ConvertedDocument, ConversionError> {
        check_pdf_magic(document)?;

        let pdfium = bind(self.library.as_deref())
            .map_err(|e| ConversionError::Engine(format!("pdfium unavailable: {e:?}")))?;
        let pdf = pdfium
            .load_pdf_from_byte_slice(document, None)
            .map_err(load_error)?;

        let pages = pdf.pages();
        let total = pages.len() as usize;
        debug!(pages = total, "PDF loaded");

        let mut contents = Vec::with_capacity(total);
        let mut assets = Vec::new();
        let mut first_error: Option<String> = None;
        let mut failed = 0usize;

        for (idx, page) in pages.iter().enumerate() {
            let mut content = PageContent::default();

            match page.text() {
                Ok(text) => content.text = Some(text.all()),
                Err(e) => {
                    let err = ConversionError::PageFailed {
                        page: idx + 1,
                        detail: format!("{e:?}"),
                    };
                    warn!("{err}");
                    failed += 1;
                    first_error.get_or_insert_with(|| err.to_string());
                }
            }

            for object in page.objects().iter() {
                let Some(image) = object.as_image_object() else {
                    continue;
                };
                let raw = match image.get_raw_image() {
                    Ok(raw) => raw,
                    Err(e) => {
                        debug!(page = idx + 1, "skipping unreadable image: {e:?}");
                        continue;
                    }
                };
                let mut png = Vec::new();
                if let Err(e) = raw.write_to(&mut Cursor::new(&mut png), ImageFormat::Png) {
                    debug!(page = idx + 1, "skipping image that failed to encode: {e}");
                    continue;
                }
                let name = format!("figure-{}.png", assets.len() + 1);
                content.figures.push(name.clone());
                assets.push(ExtractedAsset {
                    name,
                    media_type: "image/png".into(),
                    data: png,
                });
            }

            contents.push(content);
        }

        if total > 0 && failed == total {
            return Err(ConversionError::AllPagesFailed {
                total,
                first_error: first_error.unwrap_or_default(),
            });
        }

        Ok(ConvertedDocument {
            markdown: assemble(&contents),
            assets,
        })
    }

    fn name(&self) -> &str {
        "pdfium-text"
    }

    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Turn raw page text into paragraphs: CRLF normalised, trailing spaces
/// trimmed, runs of blank lines collapsed to one.
fn paragraphs(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = true;
    for line in raw.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            if !blank_run {
                out.push('\n');
            }
            blank_run = true;
        } else {
            out.push_str(line);
            out.push('\n');
            blank_run = false;
        }
    }
    out.trim_end().to_string()
}

fn assemble(pages: &[PageContent]) -> String {
    let mut sections = Vec::with_capacity(pages.len());
    for (idx, page) in pages.iter().enumerate() {
        let mut section = match &page.text {
            Some(text) => paragraphs(text),
            None => format!("<!-- page {} could not be extracted -->", idx + 1),
        };
        for name in &page.figures {
            let n = name
                .trim_start_matches("figure-")
                .trim_end_matches(".png");
            if !section.is_empty() {
                section.push_str("\n\n");
            }
            section.push_str(&format!("![Figure {n}]({name})"));
        }
        sections.push(section);
    }
    sections.join("\n\n---\n\n")
}
