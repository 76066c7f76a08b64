use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{panic_message, CollaboratorError, PipelineError};
use crate::task::{ErrorKind, Task};

/// Cheap page-count probe used before any extraction work.
pub trait PageCounter: Send + Sync {
    fn probe_page_count(&self, document: &Path) -> Result<u32, CollaboratorError>;
}

/// A document that contributed no tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentError {
    pub document_path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Enumeration {
    pub documents: usize,
    pub tasks: Vec<Task>,
    pub errors: Vec<DocumentError>,
}

/// Find all documents with one of `extensions` under `root`, sorted, as
/// paths relative to `root`.
pub fn find_documents(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::InputRoot(root.to_path_buf()));
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if entry.file_type().is_file() && has_extension(path, extensions) {
            let relative = path.strip_prefix(root).unwrap_or(path);
            documents.push(relative.to_path_buf());
        }
    }

    documents.sort();
    Ok(documents)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| extensions.iter().any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// A panicking parser only costs the document it was parsing.
fn count_pages(counter: &dyn PageCounter, document: &Path) -> Result<u32, CollaboratorError> {
    panic::catch_unwind(AssertUnwindSafe(|| counter.probe_page_count(document)))
        .unwrap_or_else(|payload| Err(CollaboratorError::new(format!("page count {}", panic_message(payload)))))
}

/// Expand every document under `root` into one task per page. Documents
/// whose probe fails are reported and contribute nothing.
pub fn enumerate(
    root: &Path,
    extensions: &[String],
    counter: &dyn PageCounter,
) -> Result<Enumeration, PipelineError> {
    let documents = find_documents(root, extensions)?;
    info!("Found {} documents in {}", documents.len(), root.display());

    let probes: Vec<(PathBuf, Result<u32, CollaboratorError>)> = documents
        .into_par_iter()
        .map(|document| {
            let pages = count_pages(counter, &root.join(&document));
            (document, pages)
        })
        .collect();

    let mut enumeration = Enumeration {
        documents: probes.len(),
        ..Enumeration::default()
    };

    for (document, probe) in probes {
        match probe {
            Ok(pages) => {
                enumeration
                    .tasks
                    .extend((1..=pages).map(|page| Task::new(document.clone(), page)));
            }
            Err(e) => {
                warn!("Cannot read {}: {}", document.display(), e);
                enumeration.errors.push(DocumentError {
                    document_path: document,
                    kind: ErrorKind::DocumentUnreadable,
                    message: e.message,
                });
            }
        }
    }

    Ok(enumeration)
}
