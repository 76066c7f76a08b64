use base64::{engine::general_purpose, Engine as _};
use log::debug;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{EngineConfig, ExtractionMode};
use crate::error::CollaboratorError;
use crate::task::{ErrorKind, ExtractionMethod, Task, TaskError, TaskResult};

/// Reads the embedded text layer of one page.
pub trait TextLayer: Send + Sync {
    fn extract_text_layer(&self, document: &Path, page_index: u32) -> Result<String, CollaboratorError>;
}

/// Rasterizes one page, for OCR or as a stored thumbnail.
pub trait PageRenderer: Send + Sync {
    fn render_page_to_image(
        &self,
        document: &Path,
        page_index: u32,
        resolution: u32,
    ) -> Result<PageImage, CollaboratorError>;

    /// JPEG bytes of the page scaled to `size` x `size`.
    fn render_thumbnail(&self, document: &Path, page_index: u32, size: u32) -> Result<Vec<u8>, CollaboratorError>;
}

pub trait OcrEngine: Send + Sync {
    fn ocr(&self, image: &PageImage, language: &str) -> Result<String, CollaboratorError>;
}

/// Decides whether direct text is good enough to skip OCR.
pub trait SufficiencyPolicy: Send + Sync {
    fn is_sufficient(&self, text: &str) -> bool;
}

impl<F> SufficiencyPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_sufficient(&self, text: &str) -> bool {
        self(text)
    }
}

/// Character-count and character-distribution floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextThreshold {
    pub min_chars: usize,
    pub min_alnum_ratio: f32,
}

impl TextThreshold {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            min_chars: config.min_chars,
            min_alnum_ratio: config.min_alnum_ratio,
        }
    }
}

impl SufficiencyPolicy for TextThreshold {
    fn is_sufficient(&self, text: &str) -> bool {
        let mut total = 0usize;
        let mut alnum = 0usize;
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            total += 1;
            if c.is_alphanumeric() {
                alnum += 1;
            }
        }

        if total == 0 || total < self.min_chars {
            return false;
        }
        (alnum as f32 / total as f32) >= self.min_alnum_ratio
    }
}

/// A rendered page on disk. Temporary images are removed on drop.
#[derive(Debug)]
pub struct PageImage {
    path: PathBuf,
    temporary: bool,
}

impl PageImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PageImage {
    fn drop(&mut self) {
        if self.temporary {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Turns one [`Task`] into one [`TaskResult`]: cheap text layer first, OCR
/// only when the text layer is missing or too thin.
pub struct ExtractionEngine {
    root: PathBuf,
    config: EngineConfig,
    text_layer: Box<dyn TextLayer>,
    renderer: Box<dyn PageRenderer>,
    ocr: Box<dyn OcrEngine>,
    policy: Box<dyn SufficiencyPolicy>,
}

impl ExtractionEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        text_layer: Box<dyn TextLayer>,
        renderer: Box<dyn PageRenderer>,
        ocr: Box<dyn OcrEngine>,
    ) -> Self {
        let policy = Box::new(TextThreshold::from_config(&config));
        Self {
            root: root.into(),
            config,
            text_layer,
            renderer,
            ocr,
            policy,
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn SufficiencyPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Never panics on collaborator errors; every failure ends up in
    /// `TaskResult::error`.
    pub fn extract(&self, task: &Task) -> TaskResult {
        let start = Instant::now();
        let document = self.root.join(&task.document_path);

        let mut result = self.extract_text(task, &document, start);
        if self.config.image_column && result.is_success() {
            match self.renderer.render_thumbnail(&document, task.page_index, self.config.image_size) {
                Ok(jpeg) => result.page_image = Some(general_purpose::STANDARD.encode(jpeg)),
                Err(e) => {
                    return TaskResult::failed(
                        task,
                        result.extraction_method,
                        task_error(ErrorKind::OcrFailure, e),
                        start.elapsed(),
                    )
                }
            }
        }
        result
    }

    fn extract_text(&self, task: &Task, document: &Path, start: Instant) -> TaskResult {
        match self.config.mode {
            ExtractionMode::OcrOnly => self.finish_with_ocr(task, document, start),
            ExtractionMode::TextOnly => {
                match self.text_layer.extract_text_layer(document, task.page_index) {
                    Ok(text) => TaskResult::succeeded(task, text, ExtractionMethod::DirectText, start.elapsed()),
                    Err(e) => TaskResult::failed(
                        task,
                        Some(ExtractionMethod::DirectText),
                        task_error(ErrorKind::ExtractionFailure, e),
                        start.elapsed(),
                    ),
                }
            }
            ExtractionMode::Auto => {
                match self.text_layer.extract_text_layer(document, task.page_index) {
                    Ok(text) if self.policy.is_sufficient(&text) => {
                        TaskResult::succeeded(task, text, ExtractionMethod::DirectText, start.elapsed())
                    }
                    Ok(text) => {
                        debug!("{}: text layer insufficient ({} chars), using OCR", task, text.trim().len());
                        self.finish_with_ocr(task, document, start)
                    }
                    Err(e) => {
                        debug!("{}: text layer failed ({}), using OCR", task, e);
                        self.finish_with_ocr(task, document, start)
                    }
                }
            }
        }
    }

    fn finish_with_ocr(&self, task: &Task, document: &Path, start: Instant) -> TaskResult {
        match self.run_ocr(document, task.page_index) {
            Ok(text) => TaskResult::succeeded(task, text, ExtractionMethod::Ocr, start.elapsed()),
            Err(e) => TaskResult::failed(
                task,
                Some(ExtractionMethod::Ocr),
                task_error(ErrorKind::OcrFailure, e),
                start.elapsed(),
            ),
        }
    }

    fn run_ocr(&self, document: &Path, page_index: u32) -> Result<String, CollaboratorError> {
        let image = self
            .renderer
            .render_page_to_image(document, page_index, self.config.resolution)?;
        self.ocr.ocr(&image, &self.config.language)
    }
}

fn task_error(kind: ErrorKind, err: CollaboratorError) -> TaskError {
    TaskError {
        kind,
        message: err.message,
        transient: err.transient,
    }
}
