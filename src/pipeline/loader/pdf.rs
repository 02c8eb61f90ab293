//! PDF source: per-page text extraction and PNG rendering via Google PDFium.
//!
//! `PdfiumEngine` is stateless (`Send + Sync`). Each extraction creates a
//! fresh `Pdfium` instance because the upstream type is `!Send`; the OS
//! caches the `dlopen`, so repeat loads are cheap.

use std::io::Cursor;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use serde_json::Value;
use tracing::{debug, warn};

use super::{base_metadata, truncate_page_text, DocumentPage, LoadError, LoadedDocument, LoaderLimits, PageImage, SourceFile};

/// Maximum dimension (width or height) for rendered page images.
const MAX_DIMENSION_PX: u32 = 4096;

/// Default rendering DPI. Enough for a vision model to read body text.
pub const DEFAULT_RENDER_DPI: u32 = 144;

/// PDF points per inch (standard PDF unit).
const POINTS_PER_INCH: f32 = 72.0;

/// What an engine produced for one page. Text and rendering fail independently.
#[derive(Debug, Clone)]
pub struct PdfPageContent {
    pub text: Result<String, String>,
    pub png: Result<Vec<u8>, String>,
}

#[derive(Debug, Clone)]
pub struct PdfExtraction {
    /// Page count of the whole document, even when fewer were extracted.
    pub total_pages: usize,
    pub pages: Vec<PdfPageContent>,
}

/// Opens a PDF once and yields the first `max_pages` pages.
pub trait PdfEngine: Send + Sync {
    fn extract(&self, bytes: &[u8], max_pages: usize, dpi: u32) -> Result<PdfExtraction, LoadError>;
}

/// Turn an engine extraction into loader pages, applying the text cap and
/// collecting warnings.
pub(crate) fn load_pdf(
    engine: &dyn PdfEngine,
    source: &SourceFile<'_>,
    limits: &LoaderLimits,
) -> Result<LoadedDocument, LoadError> {
    let extraction = engine.extract(source.bytes, limits.max_pages, limits.render_dpi)?;
    if extraction.total_pages == 0 {
        return Err(LoadError::NoPages);
    }

    let mut loaded = LoadedDocument::default();
    for (index, content) in extraction.pages.into_iter().take(limits.max_pages).enumerate() {
        let page_number = index as u32 + 1;
        let mut metadata = base_metadata(source);

        let raw_text = match content.text {
            Ok(text) => text,
            Err(reason) => {
                warn!(page = page_number, reason = %reason, "PDF text extraction failed");
                String::new()
            }
        };
        let trimmed = raw_text.trim();
        let text_content = if trimmed.is_empty() {
            loaded
                .warnings
                .push(format!("Page {page_number} did not include extractable text."));
            metadata.insert(
                "note".into(),
                Value::String("No extractable text returned by the PDF parser for this page.".into()),
            );
            None
        } else {
            let (value, truncated) = truncate_page_text(trimmed, limits.max_page_chars);
            if truncated {
                loaded.warnings.push(format!(
                    "Page {page_number} text was truncated to {} characters for processing.",
                    limits.max_page_chars
                ));
            }
            Some(value)
        };

        let images = match content.png {
            Ok(data) => vec![PageImage {
                mime_type: "image/png".into(),
                data,
            }],
            Err(reason) => {
                loaded.warnings.push(format!(
                    "Page {page_number} could not be rendered to an image: {reason}"
                ));
                Vec::new()
            }
        };

        loaded.pages.push(DocumentPage {
            page_number,
            text_content,
            images,
            metadata,
        });
    }

    if extraction.total_pages > limits.max_pages {
        loaded.warnings.push(format!(
            "Only the first {} pages were processed due to safety limits. Remaining pages were skipped.",
            limits.max_pages
        ));
    }

    Ok(loaded)
}

// ── PDFium ────────────────────────────────────────────────

pub struct PdfiumEngine;

impl PdfiumEngine {
    /// Create an engine, verifying the PDFium library is loadable.
    pub fn new() -> Result<Self, LoadError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

/// Load the PDFium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path)
/// 2. Alongside the running executable, or its `pdfium/lib` subdirectory
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, LoadError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| LoadError::Engine(format!("Failed to load PDFium from {path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [exe_dir.to_path_buf(), exe_dir.join("pdfium").join("lib")];
            for dir in &candidates {
                let lib_path =
                    Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        LoadError::Engine(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Map PDF load errors, detecting encrypted documents.
fn map_load_error(e: PdfiumError) -> LoadError {
    let msg = format!("{e}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        LoadError::Encrypted
    } else {
        LoadError::Unreadable(format!("Failed to parse PDF: {e}"))
    }
}

/// Pixel dimensions for rendering, both clamped to [1, MAX_DIMENSION_PX]
/// with the aspect ratio preserved.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

fn render_page_png(page: &PdfPage<'_>, page_number: usize, dpi: u32) -> Result<Vec<u8>, String> {
    let (target_w, target_h) =
        compute_render_dimensions(page.width().value, page.height().value, dpi);

    let config = PdfRenderConfig::new()
        .set_target_width(target_w as i32)
        .set_maximum_height(target_h as i32);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| format!("Rendering failed: {e}"))?;

    let mut cursor = Cursor::new(Vec::new());
    bitmap
        .as_image()
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {e}"))?;
    let png = cursor.into_inner();

    debug!(
        page = page_number,
        width = target_w,
        height = target_h,
        png_size = png.len(),
        "Rendered PDF page to PNG"
    );
    Ok(png)
}

impl PdfEngine for PdfiumEngine {
    fn extract(&self, bytes: &[u8], max_pages: usize, dpi: u32) -> Result<PdfExtraction, LoadError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(map_load_error)?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;

        let mut extracted = Vec::with_capacity(total_pages.min(max_pages));
        for (index, page) in pages.iter().take(max_pages).enumerate() {
            let page_number = index + 1;
            let text = page
                .text()
                .map(|t| t.all())
                .map_err(|e| format!("Text extraction failed: {e}"));
            let png = render_page_png(&page, page_number, dpi);
            extracted.push(PdfPageContent { text, png });
        }

        Ok(PdfExtraction {
            total_pages,
            pages: extracted,
        })
    }
}

/// Stand-in used when PDFium could not be loaded at startup. Image runs
/// still work; PDF runs fail with the original load error.
pub struct UnavailablePdfEngine {
    reason: String,
}

impl UnavailablePdfEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PdfEngine for UnavailablePdfEngine {
    fn extract(&self, _bytes: &[u8], _max_pages: usize, _dpi: u32) -> Result<PdfExtraction, LoadError> {
        Err(LoadError::Engine(self.reason.clone()))
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Scripted page for `MockPdfEngine`.
#[derive(Debug, Clone)]
pub struct MockPdfPage {
    text: Result<String, String>,
    png: Result<Vec<u8>, String>,
}

impl MockPdfPage {
    pub fn text(text: &str) -> Self {
        Self {
            text: Ok(text.to_string()),
            png: Ok(minimal_png()),
        }
    }

    pub fn without_render(mut self, reason: &str) -> Self {
        self.png = Err(reason.to_string());
        self
    }
}

/// PDF engine returning scripted pages, for tests that must not need PDFium.
pub struct MockPdfEngine {
    pages: Vec<MockPdfPage>,
    open_error: Option<String>,
}

impl MockPdfEngine {
    pub fn with_pages(pages: Vec<MockPdfPage>) -> Self {
        Self {
            pages,
            open_error: None,
        }
    }

    pub fn with_text_pages(texts: &[&str]) -> Self {
        Self::with_pages(texts.iter().map(|t| MockPdfPage::text(t)).collect())
    }

    /// Every extraction fails as an unreadable document.
    pub fn failing(reason: &str) -> Self {
        Self {
            pages: Vec::new(),
            open_error: Some(reason.to_string()),
        }
    }
}

impl PdfEngine for MockPdfEngine {
    fn extract(&self, _bytes: &[u8], max_pages: usize, _dpi: u32) -> Result<PdfExtraction, LoadError> {
        if let Some(reason) = &self.open_error {
            return Err(LoadError::Unreadable(reason.clone()));
        }
        Ok(PdfExtraction {
            total_pages: self.pages.len(),
            pages: self
                .pages
                .iter()
                .take(max_pages)
                .map(|p| PdfPageContent {
                    text: p.text.clone(),
                    png: p.png.clone(),
                })
                .collect(),
        })
    }
}

/// Minimal valid 1x1 white pixel PNG for mock testing.
pub fn minimal_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
        0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, // 8-bit RGB
        0xDE, // IHDR CRC
        0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, // IDAT chunk
        0x08, 0xD7, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, // compressed
        0x00, 0x02, 0x00, 0x01, 0xE2, 0x21, 0xBC, 0x33, // IDAT CRC
        0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, // IEND chunk
        0xAE, 0x42, 0x60, 0x82, // IEND CRC
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_at_default_dpi() {
        let (w, h) = compute_render_dimensions(595.0, 842.0, DEFAULT_RENDER_DPI);
        // 595 * 2 = 1190, 842 * 2 = 1684
        assert_eq!((w, h), (1190, 1684));
    }

    #[test]
    fn dimension_guard_caps_oversized() {
        let (w, h) = compute_render_dimensions(5000.0, 7000.0, 200);
        assert_eq!(h, MAX_DIMENSION_PX);
        assert!(w < MAX_DIMENSION_PX);
        let ratio = w as f32 / h as f32;
        assert!((ratio - 5000.0 / 7000.0).abs() < 0.01);
    }

    #[test]
    fn degenerate_page_is_at_least_one_pixel() {
        let (w, h) = compute_render_dimensions(0.0, 0.0, 144);
        assert_eq!((w, h), (1, 1));
    }

    #[test]
    fn mock_reports_total_pages_beyond_cap() {
        let engine = MockPdfEngine::with_text_pages(&["a", "b", "c"]);
        let extraction = engine.extract(b"%PDF", 2, 144).unwrap();
        assert_eq!(extraction.total_pages, 3);
        assert_eq!(extraction.pages.len(), 2);
    }

    #[test]
    fn unavailable_engine_reports_reason() {
        let engine = UnavailablePdfEngine::new("libpdfium.so not found");
        match engine.extract(b"%PDF", 1, 144) {
            Err(LoadError::Engine(reason)) => assert_eq!(reason, "libpdfium.so not found"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn minimal_png_has_signature() {
        assert_eq!(&minimal_png()[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }
}
