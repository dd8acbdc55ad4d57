//! Text extraction: native PDF text first, OCR for pages that have too little.
//!
//! Scanned pages carry no text layer, and some generators emit only a page
//! number or watermark. A page whose trimmed native text is at most
//! `min_text_chars` characters is therefore rasterised and sent to Tesseract.
//!
//! Extraction never fails as a whole. Per-page OCR problems and document-level
//! failures are written into the returned text as bracketed markers so the
//! caller always gets whatever could be recovered; downstream stages treat the
//! result as opaque text.
//!
//! pdfium and the Tesseract process are both blocking, so async callers go
//! through [`extract_text`], which runs on the blocking pool.

use crate::config::ExtractConfig;
use crate::error::Pdf2ExamError;
use crate::pipeline::ocr::{OcrError, Tesseract};
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Anything that can turn a PDF on disk into text.
///
/// Implementations may block; see [`extract_text`].
pub trait TextExtractor: Send + Sync {
    /// Best-effort text of every page, each prefixed with a page marker.
    fn text_of(&self, pdf_path: &Path) -> String;
}

/// Run `extractor` on the blocking thread pool.
pub async fn extract_text(
    extractor: Arc<dyn TextExtractor>,
    pdf_path: PathBuf,
) -> Result<String, Pdf2ExamError> {
    tokio::task::spawn_blocking(move || extractor.text_of(&pdf_path))
        .await
        .map_err(|e| Pdf2ExamError::Internal(format!("Extraction task panicked: {}", e)))
}

/// Marker inserted before each page's text (1-based page number).
pub fn page_marker(page_num: usize) -> String {
    format!("\n--- Page {} ---\n", page_num)
}

/// Whether a page's native text is too thin to trust.
pub fn needs_ocr(native_text: &str, min_text_chars: usize) -> bool {
    native_text.trim().chars().count() <= min_text_chars
}

/// pdfium + Tesseract implementation of [`TextExtractor`].
#[derive(Debug, Clone)]
pub struct PdfTextExtractor {
    config: ExtractConfig,
    ocr: Tesseract,
}

impl PdfTextExtractor {
    pub fn new(config: ExtractConfig) -> Self {
        let ocr = Tesseract::new(config.tesseract_cmd.clone(), config.ocr_languages.clone());
        Self { config, ocr }
    }

    /// Append every page to `out`; returns the page count.
    ///
    /// On error `out` keeps the pages processed so far.
    fn extract_into(&self, pdf_path: &Path, out: &mut String) -> Result<usize, String> {
        let pdfium = bind_pdfium(self.config.pdfium_lib.as_deref())
            .map_err(|e| format!("無法載入 pdfium: {:?}", e))?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, self.config.password.as_deref())
            .map_err(|e| format!("{:?}", e))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF has {} pages", total_pages);

        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            out.push_str(&page_marker(page_num));

            let native = match page.text() {
                Ok(text) => text.all(),
                Err(e) => {
                    warn!("Page {}: text layer unreadable ({:?}), trying OCR", page_num, e);
                    String::new()
                }
            };

            if needs_ocr(&native, self.config.min_text_chars) {
                debug!(
                    "Page {}: text length {} too short, attempting OCR",
                    page_num,
                    native.chars().count()
                );
                out.push_str(&self.ocr_page(&page, page_num));
            } else {
                debug!(
                    "Page {}: extracted text directly (length: {})",
                    page_num,
                    native.chars().count()
                );
                out.push_str(&native);
            }
        }

        Ok(total_pages)
    }

    /// OCR one page. Always returns text: either the recognised content or a
    /// bracketed failure marker.
    fn ocr_page(&self, page: &PdfPage, page_num: usize) -> String {
        let start = Instant::now();
        match self.render_and_recognise(page, page_num) {
            Ok(text) => {
                debug!(
                    "Page {}: OCR completed ({} chars, {:?})",
                    page_num,
                    text.chars().count(),
                    start.elapsed()
                );
                text
            }
            Err(OcrError::BackendNotAvailable(hint)) => {
                warn!("Page {}: {}", page_num, hint);
                format!("[OCR失敗於此頁：{}]\n", hint)
            }
            Err(e) => {
                warn!("OCR error on page {}: {}", page_num, e);
                format!("[OCR時發生錯誤於此頁：{}]\n", e)
            }
        }
    }

    fn render_and_recognise(&self, page: &PdfPage, page_num: usize) -> Result<String, OcrError> {
        let render_config =
            PdfRenderConfig::new().scale_page_by_factor(self.config.ocr_dpi as f32 / 72.0);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| OcrError::Failed(format!("rasterisation failed: {:?}", e)))?;
        let image = bitmap.as_image();

        // The directory and image are removed when `dir` drops.
        let dir = tempfile::tempdir()?;
        let image_path = dir.path().join(format!("page-{}.png", page_num));
        image
            .save_with_format(&image_path, ImageFormat::Png)
            .map_err(|e| OcrError::Failed(format!("could not write page image: {}", e)))?;

        self.ocr.image_to_string(&image_path)
    }
}

impl TextExtractor for PdfTextExtractor {
    fn text_of(&self, pdf_path: &Path) -> String {
        let start = Instant::now();
        let mut out = String::new();
        match self.extract_into(pdf_path, &mut out) {
            Ok(pages) => {
                info!(
                    "Extracted {} chars from {} pages in {:?}",
                    out.chars().count(),
                    pages,
                    start.elapsed()
                );
                out
            }
            Err(detail) => {
                warn!("Error processing PDF {}: {}", pdf_path.display(), detail);
                format!("[處理PDF時發生錯誤: {}]\n{}", detail, out)
            }
        }
    }
}

/// Bind to an explicit pdfium library, else one next to the binary, else the
/// system library.
fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, PdfiumError> {
    let bindings = match lib_path {
        Some(path) => Pdfium::bind_to_library(path)?,
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())?,
    };
    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedText(&'static str);

    impl TextExtractor for FixedText {
        fn text_of(&self, _pdf_path: &Path) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn marker_format() {
        assert_eq!(page_marker(1), "\n--- Page 1 ---\n");
        assert_eq!(page_marker(12), "\n--- Page 12 ---\n");
    }

    #[test]
    fn ocr_threshold_is_exclusive() {
        assert!(needs_ocr("", 200));
        assert!(needs_ocr(&"x".repeat(200), 200));
        assert!(!needs_ocr(&"x".repeat(201), 200));
        // Whitespace does not count.
        assert!(needs_ocr(&format!("  {}  \n\n", "x".repeat(200)), 200));
        // Characters, not bytes.
        assert!(needs_ocr(&"字".repeat(100), 200));
    }

    #[tokio::test]
    async fn extract_text_runs_on_blocking_pool() {
        let extractor: Arc<dyn TextExtractor> = Arc::new(FixedText("page text"));
        let text = extract_text(extractor, PathBuf::from("any.pdf")).await.unwrap();
        assert_eq!(text, "page text");
    }

    #[test]
    fn unreadable_document_is_reported_inline() {
        let extractor = PdfTextExtractor::new(ExtractConfig::default());
        let text = extractor.text_of(Path::new("/definitely/not/here.pdf"));
        assert!(text.starts_with("[處理PDF時發生錯誤: "), "got: {text}");
    }
}
