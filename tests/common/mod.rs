//! Fake collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pdf2dataset::enumerate::PageCounter;
use pdf2dataset::extractor::{OcrEngine, PageImage, PageRenderer, TextLayer};
use pdf2dataset::worker::InProcessFactory;
use pdf2dataset::{CollaboratorError, EngineConfig, ExtractionEngine, OutputFormat, PipelineConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    /// Usable text layer.
    Text(String),
    /// No text layer; OCR yields this text.
    Scanned(String),
    /// No text layer and OCR fails.
    OcrFails,
    /// The extractor panics on this page.
    Panics,
    /// The text layer stalls this long before answering.
    Stalls(Duration),
}

pub fn text(s: &str) -> Page {
    Page::Text(s.to_string())
}

pub fn scanned(s: &str) -> Page {
    Page::Scanned(s.to_string())
}

/// Documents keyed by file name. Documents missing from the map fail
/// page counting.
#[derive(Clone, Default)]
pub struct FakeCorpus {
    docs: Arc<Mutex<HashMap<String, Vec<Page>>>>,
    pub text_calls: Arc<AtomicUsize>,
    pub ocr_calls: Arc<AtomicUsize>,
}

impl FakeCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doc(self, name: &str, pages: Vec<Page>) -> Self {
        self.docs.lock().unwrap().insert(name.to_string(), pages);
        self
    }

    pub fn set_page(&self, name: &str, page_index: u32, page: Page) {
        let mut docs = self.docs.lock().unwrap();
        let pages = docs.get_mut(name).expect("unknown document");
        pages[page_index as usize - 1] = page;
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn ocr_calls(&self) -> usize {
        self.ocr_calls.load(Ordering::SeqCst)
    }

    fn page(&self, document: &Path, page_index: u32) -> Result<Page, CollaboratorError> {
        let name = document.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let docs = self.docs.lock().unwrap();
        docs.get(name)
            .and_then(|pages| pages.get(page_index as usize - 1))
            .cloned()
            .ok_or_else(|| CollaboratorError::new(format!("no page {} in {}", page_index, name)))
    }

    /// Write an empty file per document so enumeration finds them.
    pub fn materialize(&self, root: &Path, extra: &[&str]) {
        let names: Vec<String> = self.docs.lock().unwrap().keys().cloned().collect();
        for name in names.iter().map(String::as_str).chain(extra.iter().copied()) {
            std::fs::write(root.join(name), b"%PDF-1.4 fake").unwrap();
        }
    }

    pub fn factory(
        &self,
        root: PathBuf,
        engine: EngineConfig,
    ) -> InProcessFactory<impl Fn(usize) -> Result<ExtractionEngine, CollaboratorError> + Send + Sync + 'static> {
        let corpus = self.clone();
        InProcessFactory::new(move |_| {
            Ok(ExtractionEngine::new(
                root.clone(),
                engine.clone(),
                Box::new(corpus.clone()),
                Box::new(corpus.clone()),
                Box::new(corpus.clone()),
            ))
        })
    }
}

impl PageCounter for FakeCorpus {
    fn probe_page_count(&self, document: &Path) -> Result<u32, CollaboratorError> {
        let name = document.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.docs
            .lock()
            .unwrap()
            .get(name)
            .map(|pages| pages.len() as u32)
            .ok_or_else(|| CollaboratorError::new("PDF syntax error: trailer not found"))
    }
}

impl TextLayer for FakeCorpus {
    fn extract_text_layer(&self, document: &Path, page_index: u32) -> Result<String, CollaboratorError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        match self.page(document, page_index)? {
            Page::Text(text) => Ok(text),
            Page::Panics => panic!("malformed page"),
            Page::Stalls(delay) => {
                std::thread::sleep(delay);
                Ok(PAGE_TEXT.to_string())
            }
            _ => Ok(String::new()),
        }
    }
}

impl PageRenderer for FakeCorpus {
    fn render_page_to_image(&self, document: &Path, page_index: u32, _: u32) -> Result<PageImage, CollaboratorError> {
        Ok(PageImage::new(format!("{}-{}.png", document.display(), page_index)))
    }

    fn render_thumbnail(&self, document: &Path, page_index: u32, size: u32) -> Result<Vec<u8>, CollaboratorError> {
        self.page(document, page_index)?;
        Ok(thumbnail(size))
    }
}

/// Bytes the fake renderer hands out for a thumbnail of the given size.
pub fn thumbnail(size: u32) -> Vec<u8> {
    format!("jpeg {}x{}", size, size).into_bytes()
}

impl OcrEngine for FakeCorpus {
    fn ocr(&self, image: &PageImage, _: &str) -> Result<String, CollaboratorError> {
        self.ocr_calls.fetch_add(1, Ordering::SeqCst);
        let name = image.path().to_string_lossy().to_string();
        let (document, page) = name
            .trim_end_matches(".png")
            .rsplit_once('-')
            .ok_or_else(|| CollaboratorError::new("bad image name"))?;
        let page: u32 = page.parse().map_err(|_| CollaboratorError::new("bad page"))?;

        match self.page(Path::new(document), page)? {
            Page::Scanned(text) => Ok(text),
            Page::OcrFails => Err(CollaboratorError::new("tesseract: image too noisy")),
            Page::Text(text) => Ok(text),
            Page::Panics => panic!("malformed page"),
            Page::Stalls(_) => Err(CollaboratorError::new("stalled page reached OCR")),
        }
    }
}

pub fn test_config(input_dir: &Path, output_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        input_dir: input_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        workers: 2,
        task_timeout: Duration::from_secs(10),
        retries: 1,
        batch_size: 2,
        in_flight_window: 2,
        grace_period: Duration::from_millis(100),
        output_format: OutputFormat::Sqlite,
        extensions: vec!["pdf".to_string()],
        show_progress: false,
        progress_interval: Duration::from_secs(60),
        engine: EngineConfig {
            min_chars: 5,
            ..EngineConfig::default()
        },
    }
}

pub const PAGE_TEXT: &str = "A perfectly ordinary page of text.";
