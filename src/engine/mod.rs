//! Conversion engines: document bytes → Markdown + extracted assets.
//!
//! The worker pool only knows the [`ConversionEngine`] trait. Engines are
//! synchronous and may be slow; the pool always calls them from the
//! blocking thread pool.
//!
//! ```text
//! ┌──────────────┐  &[u8]   ┌──────────────────┐  ConvertedDocument
//! │ WorkerPool   │ ───────▶ │ ConversionEngine │ ───────────────────▶
//! └──────────────┘          └──────────────────┘
//!                            ├─ PdfiumTextEngine  (feature "pdfium")
//!                            ├─ VisionEngine      (feature "vision")
//!                            └─ FnEngine          (from_fn)
//! ```

#[cfg(feature = "pdfium")]
pub mod pdfium;
#[cfg(feature = "vision")]
pub mod vision;

use crate::config::{EngineConfig, EngineKind};
use crate::error::{ConversionError, QueueError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A binary artefact pulled out of a document (figure, embedded image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedAsset {
    /// File name the Markdown refers to, e.g. `figure-1.png`.
    pub name: String,
    pub media_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// The output of one successful conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedDocument {
    pub markdown: String,
    pub assets: Vec<ExtractedAsset>,
}

impl ConvertedDocument {
    pub fn from_markdown(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            assets: Vec::new(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.assets.len()
    }
}

/// Something that turns PDF bytes into Markdown.
///
/// `convert` must not assume it runs on an async executor thread; the pool
/// calls it via `spawn_blocking`. A panic inside `convert` fails the job,
/// not the worker.
pub trait ConversionEngine: Send + Sync + 'static {
    fn convert(&self, document: &[u8]) -> Result<ConvertedDocument, ConversionError>;

    /// Short name for logs.
    fn name(&self) -> &str;

    /// Whether `convert` may run on several threads at once. Engines that
    /// return `false` are serialised by the pool.
    fn is_reentrant(&self) -> bool {
        true
    }
}

/// Engine backed by a closure. See [`from_fn`].
pub struct FnEngine<F> {
    name: String,
    f: F,
}

impl<F> ConversionEngine for FnEngine<F>
where
    F: Fn(&[u8]) -> Result<ConvertedDocument, ConversionError> + Send + Sync + 'static,
{
    fn convert(&self, document: &[u8]) -> Result<ConvertedDocument, ConversionError> {
        (self.f)(document)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a reentrant engine.
///
/// ```
/// use pdf2md_queue::engine::{from_fn, ConvertedDocument};
/// let engine = from_fn("echo", |bytes| {
///     Ok(ConvertedDocument::from_markdown(String::from_utf8_lossy(bytes)))
/// });
/// ```
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnEngine<F>
where
    F: Fn(&[u8]) -> Result<ConvertedDocument, ConversionError> + Send + Sync + 'static,
{
    FnEngine {
        name: name.into(),
        f,
    }
}

/// Reject input that does not carry the `%PDF` magic.
pub fn check_pdf_magic(document: &[u8]) -> Result<(), ConversionError> {
    if document.starts_with(b"%PDF") {
        Ok(())
    } else {
        Err(ConversionError::NotAPdf {
            magic: document.iter().take(4).copied().collect(),
        })
    }
}

/// Build the engine selected by `config`.
///
/// Fails with `EngineUnavailable` when the engine's feature is compiled out
/// or its backend (pdfium library, LLM provider) cannot be initialised.
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn ConversionEngine>, QueueError> {
    match config.kind {
        EngineKind::Text => text_engine(config),
        EngineKind::Vision => vision_engine(config),
    }
}

#[cfg(feature = "pdfium")]
fn text_engine(config: &EngineConfig) -> Result<Arc<dyn ConversionEngine>, QueueError> {
    let engine = pdfium::PdfiumTextEngine::new(config.pdfium_lib_path.as_deref())?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "pdfium"))]
fn text_engine(_config: &EngineConfig) -> Result<Arc<dyn ConversionEngine>, QueueError> {
    Err(QueueError::EngineUnavailable(
        "the text engine requires the `pdfium` feature".into(),
    ))
}

#[cfg(feature = "vision")]
fn vision_engine(config: &EngineConfig) -> Result<Arc<dyn ConversionEngine>, QueueError> {
    let engine = vision::VisionEngine::from_config(config)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "vision"))]
fn vision_engine(_config: &EngineConfig) -> Result<Arc<dyn ConversionEngine>, QueueError> {
    Err(QueueError::EngineUnavailable(
        "the vision engine requires the `vision` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_engine_converts() {
        let engine = from_fn("upper", |bytes| {
            Ok(ConvertedDocument::from_markdown(
                String::from_utf8_lossy(bytes).to_uppercase(),
            ))
        });
        let out = engine.convert(b"# title").unwrap();
        assert_eq!(out.markdown, "# TITLE");
        assert_eq!(out.image_count(), 0);
        assert_eq!(engine.name(), "upper");
        assert!(engine.is_reentrant());
    }

    #[test]
    fn magic_check() {
        assert!(check_pdf_magic(b"%PDF-1.7\n...").is_ok());
        let err = check_pdf_magic(b"PK\x03\x04zip").unwrap_err();
        assert_eq!(
            err,
            ConversionError::NotAPdf {
                magic: b"PK\x03\x04".to_vec()
            }
        );
        assert!(check_pdf_magic(b"").is_err());
    }
}
