use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::enumerate::PageCounter;
use crate::error::CollaboratorError;
use crate::extractor::TextLayer;

/// Page counting and text-layer extraction through lopdf.
///
/// The last parsed document is kept so consecutive pages of the same file
/// handled by one worker don't re-parse it.
pub struct PdfProcessor {
    cache: Mutex<Option<(PathBuf, lopdf::Document)>>,
}

impl PdfProcessor {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }

    fn load(pdf_path: &Path) -> Result<lopdf::Document, CollaboratorError> {
        lopdf::Document::load(pdf_path).map_err(|e| {
            CollaboratorError::new(format!("failed to load {}: {}", pdf_path.display(), e))
        })
    }
}

impl Default for PdfProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCounter for PdfProcessor {
    fn probe_page_count(&self, pdf_path: &Path) -> Result<u32, CollaboratorError> {
        let document = Self::load(pdf_path)?;
        Ok(document.get_pages().len() as u32)
    }
}

impl TextLayer for PdfProcessor {
    fn extract_text_layer(&self, pdf_path: &Path, page_index: u32) -> Result<String, CollaboratorError> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let cached = matches!(cache.as_ref(), Some((path, _)) if path == pdf_path);
        if !cached {
            debug!("Parsing {}", pdf_path.display());
            *cache = Some((pdf_path.to_path_buf(), Self::load(pdf_path)?));
        }

        let Some((_, document)) = cache.as_ref() else {
            return Err(CollaboratorError::new("document cache empty"));
        };

        if !document.get_pages().contains_key(&page_index) {
            return Err(CollaboratorError::new(format!(
                "page {} out of range for {}",
                page_index,
                pdf_path.display()
            )));
        }

        document.extract_text(&[page_index]).map_err(|e| {
            CollaboratorError::new(format!(
                "failed to extract text from page {} of {}: {}",
                page_index,
                pdf_path.display(),
                e
            ))
        })
    }
}
