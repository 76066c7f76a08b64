use log::{error, info};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

use crate::error::CollaboratorError;
use crate::extractor::{OcrEngine, PageImage, PageRenderer};

/// Renders single pages with `pdftoppm` into a scratch directory owned by
/// this renderer. The directory is removed when the renderer is dropped.
pub struct PopplerRenderer {
    scratch: TempDir,
}

impl PopplerRenderer {
    pub fn new() -> Result<Self, CollaboratorError> {
        let scratch = tempfile::Builder::new()
            .prefix("pdf2dataset-render-")
            .tempdir()
            .map_err(|e| CollaboratorError::transient(format!("cannot create scratch dir: {}", e)))?;
        Ok(Self { scratch })
    }

    /// Render one page with the given output options; `extension` is the
    /// suffix pdftoppm appends for that format.
    fn pdftoppm(
        &self,
        pdf_path: &Path,
        page_index: u32,
        name: &str,
        options: &[String],
        extension: &str,
    ) -> Result<PageImage, CollaboratorError> {
        let prefix = self.scratch.path().join(format!("{}-{}", name, page_index));
        let page = page_index.to_string();

        let output = Command::new("pdftoppm")
            .arg("-f")
            .arg(&page)
            .arg("-l")
            .arg(&page)
            .args(options)
            .arg("-singlefile")
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .map_err(|e| CollaboratorError::from_spawn("pdftoppm", e))?;

        if !output.status.success() {
            return Err(CollaboratorError::new(format!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let image = PageImage::temporary(prefix.with_extension(extension));
        if !image.path().exists() {
            return Err(CollaboratorError::new("pdftoppm produced no image"));
        }
        Ok(image)
    }
}

impl PageRenderer for PopplerRenderer {
    fn render_page_to_image(
        &self,
        pdf_path: &Path,
        page_index: u32,
        resolution: u32,
    ) -> Result<PageImage, CollaboratorError> {
        let options = ["-r".to_string(), resolution.to_string(), "-png".to_string()];
        self.pdftoppm(pdf_path, page_index, "page", &options, "png")
    }

    fn render_thumbnail(&self, pdf_path: &Path, page_index: u32, size: u32) -> Result<Vec<u8>, CollaboratorError> {
        let options = [
            "-scale-to-x".to_string(),
            size.to_string(),
            "-scale-to-y".to_string(),
            size.to_string(),
            "-jpeg".to_string(),
        ];
        let image = self.pdftoppm(pdf_path, page_index, "thumb", &options, "jpg")?;
        std::fs::read(image.path())
            .map_err(|e| CollaboratorError::new(format!("cannot read thumbnail {}: {}", image.path().display(), e)))
    }
}

/// OCR through the `tesseract` command line tool.
pub struct TesseractOcr;

impl OcrEngine for TesseractOcr {
    fn ocr(&self, image: &PageImage, language: &str) -> Result<String, CollaboratorError> {
        let output = Command::new("tesseract")
            .arg(image.path())
            .arg("stdout")
            .arg("-l")
            .arg(language)
            // one core per worker
            .env("OMP_THREAD_LIMIT", "1")
            .output()
            .map_err(|e| CollaboratorError::from_spawn("tesseract", e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(CollaboratorError::new(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Check if OCR tools are available
pub async fn check_ocr_availability() -> bool {
    let tesseract_available = tokio::process::Command::new("tesseract")
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false);

    // pdftoppm -v exits 0 on poppler >= 0.90 and prints to stderr
    let pdftoppm_available = tokio::process::Command::new("pdftoppm")
        .arg("-v")
        .output()
        .await
        .is_ok();

    if !tesseract_available {
        error!("Tesseract not found. Install with: apt install tesseract-ocr");
    }

    if !pdftoppm_available {
        error!("pdftoppm not found. Install with: apt install poppler-utils");
    }

    if tesseract_available && pdftoppm_available {
        info!("OCR tools available");
    }

    tesseract_available && pdftoppm_available
}
