//! Document loader: raw upload bytes → ordered pages.
//!
//! Two source kinds exist. PDFs yield one page per document page (text
//! plus a rendered PNG); images yield exactly one page carrying the image.
//! Safety limits (page cap, per-page text cap) are applied here and
//! reported as warnings rather than errors.

pub mod raster;
pub mod pdf;

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::FileType;
use pdf::PdfEngine;

pub const DEFAULT_MAX_PAGES_PER_RUN: usize = 40;
pub const DEFAULT_MAX_PAGE_CHARS: usize = 8000;
pub const MIN_PAGE_CHARS: usize = 500;

/// Loader failures. None of these improve on retry.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unable to open document: {0}")]
    Unreadable(String),

    #[error("PDF is password-protected and cannot be processed")]
    Encrypted,

    #[error("PDF engine unavailable: {0}")]
    Engine(String),

    #[error("Unsupported document: {0}")]
    Unsupported(String),

    #[error("No document pages were available for processing")]
    NoPages,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One page as handed to the model. Lives for a single run attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPage {
    /// 1-based.
    pub page_number: u32,
    pub text_content: Option<String>,
    pub images: Vec<PageImage>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedDocument {
    pub pages: Vec<DocumentPage>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderLimits {
    pub max_pages: usize,
    pub max_page_chars: usize,
    pub render_dpi: u32,
}

impl Default for LoaderLimits {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES_PER_RUN,
            max_page_chars: DEFAULT_MAX_PAGE_CHARS,
            render_dpi: pdf::DEFAULT_RENDER_DPI,
        }
    }
}

/// Closed set of document sources, picked from the project's file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl From<FileType> for DocumentKind {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::Pdf => Self::Pdf,
            FileType::Image => Self::Image,
        }
    }
}

/// The stored upload plus what the uploader told us about it.
#[derive(Debug, Clone, Copy)]
pub struct SourceFile<'a> {
    pub bytes: &'a [u8],
    pub original_name: &'a str,
    pub content_type: Option<&'a str>,
}

pub struct DocumentLoader {
    pdf: Arc<dyn PdfEngine>,
    limits: LoaderLimits,
}

impl DocumentLoader {
    pub fn new(pdf: Arc<dyn PdfEngine>, limits: LoaderLimits) -> Self {
        Self { pdf, limits }
    }

    pub fn limits(&self) -> &LoaderLimits {
        &self.limits
    }

    pub fn load(
        &self,
        kind: DocumentKind,
        source: &SourceFile<'_>,
    ) -> Result<LoadedDocument, LoadError> {
        let loaded = match kind {
            DocumentKind::Pdf => pdf::load_pdf(self.pdf.as_ref(), source, &self.limits)?,
            DocumentKind::Image => raster::load_image(source)?,
        };
        if loaded.pages.is_empty() {
            return Err(LoadError::NoPages);
        }
        tracing::debug!(
            kind = ?kind,
            pages = loaded.pages.len(),
            warnings = loaded.warnings.len(),
            "Document loaded"
        );
        Ok(loaded)
    }
}

/// Cap page text at `max_chars` characters, appending a marker with the
/// number of characters dropped. Returns whether truncation happened.
pub fn truncate_page_text(text: &str, max_chars: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text.to_string(), false);
    }
    let kept: String = text.chars().take(max_chars).collect();
    (
        format!("{kept}\n...[truncated {} characters]", total - max_chars),
        true,
    )
}

pub(crate) fn base_metadata(source: &SourceFile<'_>) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("originalName".into(), Value::String(source.original_name.into()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf::{MockPdfEngine, MockPdfPage};

    fn loader(engine: MockPdfEngine, limits: LoaderLimits) -> DocumentLoader {
        DocumentLoader::new(Arc::new(engine), limits)
    }

    fn source(bytes: &[u8]) -> SourceFile<'_> {
        SourceFile {
            bytes,
            original_name: "docs/report.pdf",
            content_type: Some("application/pdf"),
        }
    }

    #[test]
    fn truncation_appends_marker() {
        let (text, truncated) = truncate_page_text("abcdefghij", 4);
        assert!(truncated);
        assert_eq!(text, "abcd\n...[truncated 6 characters]");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let (text, truncated) = truncate_page_text("ééé", 3);
        assert!(!truncated);
        assert_eq!(text, "ééé");
    }

    #[test]
    fn pdf_pages_are_numbered_from_one() {
        let engine = MockPdfEngine::with_pages(vec![
            MockPdfPage::text("first page"),
            MockPdfPage::text("second page"),
        ]);
        let doc = loader(engine, LoaderLimits::default())
            .load(DocumentKind::Pdf, &source(b"%PDF-1.7"))
            .unwrap();

        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].page_number, 1);
        assert_eq!(doc.pages[1].text_content.as_deref(), Some("second page"));
        assert_eq!(doc.pages[0].images.len(), 1);
        assert_eq!(doc.pages[0].images[0].mime_type, "image/png");
        assert_eq!(doc.pages[0].metadata["originalName"], "docs/report.pdf");
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn page_cap_skips_remaining_pages_with_warning() {
        let pages = (0..5).map(|i| MockPdfPage::text(&format!("page {i}"))).collect();
        let limits = LoaderLimits {
            max_pages: 3,
            ..LoaderLimits::default()
        };
        let doc = loader(MockPdfEngine::with_pages(pages), limits)
            .load(DocumentKind::Pdf, &source(b"%PDF"))
            .unwrap();

        assert_eq!(doc.pages.len(), 3);
        assert!(doc.warnings.contains(
            &"Only the first 3 pages were processed due to safety limits. Remaining pages were skipped."
                .to_string()
        ));
    }

    #[test]
    fn long_page_text_is_truncated_with_warning() {
        let limits = LoaderLimits {
            max_page_chars: 500,
            ..LoaderLimits::default()
        };
        let long = "x".repeat(650);
        let doc = loader(MockPdfEngine::with_pages(vec![MockPdfPage::text(&long)]), limits)
            .load(DocumentKind::Pdf, &source(b"%PDF"))
            .unwrap();

        let text = doc.pages[0].text_content.as_deref().unwrap();
        assert!(text.ends_with("\n...[truncated 150 characters]"));
        assert_eq!(
            doc.warnings,
            vec!["Page 1 text was truncated to 500 characters for processing.".to_string()]
        );
    }

    #[test]
    fn blank_page_becomes_image_only() {
        let doc = loader(
            MockPdfEngine::with_pages(vec![MockPdfPage::text("   \n ")]),
            LoaderLimits::default(),
        )
        .load(DocumentKind::Pdf, &source(b"%PDF"))
        .unwrap();

        let page = &doc.pages[0];
        assert!(page.text_content.is_none());
        assert_eq!(page.images.len(), 1);
        assert!(page.metadata.contains_key("note"));
        assert_eq!(doc.warnings, vec!["Page 1 did not include extractable text.".to_string()]);
    }

    #[test]
    fn render_failure_keeps_text() {
        let doc = loader(
            MockPdfEngine::with_pages(vec![MockPdfPage::text("hello").without_render("boom")]),
            LoaderLimits::default(),
        )
        .load(DocumentKind::Pdf, &source(b"%PDF"))
        .unwrap();

        assert_eq!(doc.pages[0].text_content.as_deref(), Some("hello"));
        assert!(doc.pages[0].images.is_empty());
        assert_eq!(doc.warnings.len(), 1);
        assert!(doc.warnings[0].starts_with("Page 1 could not be rendered"));
    }

    #[test]
    fn zero_page_pdf_is_fatal() {
        let err = loader(MockPdfEngine::with_pages(vec![]), LoaderLimits::default())
            .load(DocumentKind::Pdf, &source(b"%PDF"))
            .unwrap_err();
        assert!(matches!(err, LoadError::NoPages));
    }

    #[test]
    fn unopenable_pdf_is_fatal() {
        let err = loader(MockPdfEngine::failing("corrupt xref"), LoaderLimits::default())
            .load(DocumentKind::Pdf, &source(b"garbage"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Unreadable(_)));
    }

    #[test]
    fn file_type_maps_to_document_kind() {
        assert_eq!(DocumentKind::from(FileType::Pdf), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from(FileType::Image), DocumentKind::Image);
    }
}
