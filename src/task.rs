use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One page of one document. `document_path` is relative to the input root
/// and, together with `page_index` (1-based), is the resume key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Task {
    pub document_path: PathBuf,
    pub page_index: u32,
}

impl Task {
    pub fn new(document_path: impl Into<PathBuf>, page_index: u32) -> Self {
        Self {
            document_path: document_path.into(),
            page_index,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_path.display(), self.page_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    DirectText,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::DirectText => "direct_text",
            ExtractionMethod::Ocr => "ocr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct_text" => Some(ExtractionMethod::DirectText),
            "ocr" => Some(ExtractionMethod::Ocr),
            _ => None,
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Page count probe failed; the whole document was skipped.
    DocumentUnreadable,
    /// Text layer could not be read and no fallback was allowed.
    ExtractionFailure,
    /// Rendering or OCR failed.
    OcrFailure,
    Timeout,
    WorkerCrash,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DocumentUnreadable => "document_unreadable",
            ErrorKind::ExtractionFailure => "extraction_failure",
            ErrorKind::OcrFailure => "ocr_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::WorkerCrash => "worker_crash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document_unreadable" => Some(ErrorKind::DocumentUnreadable),
            "extraction_failure" => Some(ErrorKind::ExtractionFailure),
            "ocr_failure" => Some(ErrorKind::OcrFailure),
            "timeout" => Some(ErrorKind::Timeout),
            "worker_crash" => Some(ErrorKind::WorkerCrash),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    /// Worth retrying within the same run.
    pub transient: bool,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: true,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Output of processing one [`Task`]. Failed results keep the task identity
/// so the ledger can record the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub document_path: PathBuf,
    pub page_index: u32,
    pub extracted_text: String,
    pub extraction_method: Option<ExtractionMethod>,
    pub error: Option<TaskError>,
    pub duration: Duration,
    /// Base64 JPEG thumbnail of the page, when the image column is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_image: Option<String>,
}

impl TaskResult {
    pub fn succeeded(task: &Task, text: String, method: ExtractionMethod, duration: Duration) -> Self {
        Self {
            document_path: task.document_path.clone(),
            page_index: task.page_index,
            extracted_text: text,
            extraction_method: Some(method),
            error: None,
            duration,
            page_image: None,
        }
    }

    pub fn failed(task: &Task, method: Option<ExtractionMethod>, error: TaskError, duration: Duration) -> Self {
        Self {
            document_path: task.document_path.clone(),
            page_index: task.page_index,
            extracted_text: String::new(),
            extraction_method: method,
            error: Some(error),
            duration,
            page_image: None,
        }
    }

    pub fn task(&self) -> Task {
        Task::new(self.document_path.clone(), self.page_index)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Persisted marker that a task was attempted. Only `succeeded == true`
/// suppresses re-execution on later runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub document_path: PathBuf,
    pub page_index: u32,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CompletionRecord {
    pub fn task(&self) -> Task {
        Task::new(self.document_path.clone(), self.page_index)
    }
}

impl From<&TaskResult> for CompletionRecord {
    fn from(result: &TaskResult) -> Self {
        Self {
            document_path: result.document_path.clone(),
            page_index: result.page_index,
            succeeded: result.is_success(),
            error_kind: result.error_kind(),
            error_message: result.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_names_round_trip() {
        for kind in [
            ErrorKind::DocumentUnreadable,
            ErrorKind::ExtractionFailure,
            ErrorKind::OcrFailure,
            ErrorKind::Timeout,
            ErrorKind::WorkerCrash,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("nope"), None);
    }

    #[test]
    fn failed_result_keeps_identity_and_empty_text() {
        let task = Task::new("a/b.pdf", 3);
        let result = TaskResult::failed(
            &task,
            Some(ExtractionMethod::Ocr),
            TaskError::new(ErrorKind::OcrFailure, "tesseract exploded"),
            Duration::from_millis(5),
        );

        assert_eq!(result.task(), task);
        assert!(result.extracted_text.is_empty());
        assert!(!result.is_success());

        let record = CompletionRecord::from(&result);
        assert!(!record.succeeded);
        assert_eq!(record.error_kind, Some(ErrorKind::OcrFailure));
        assert_eq!(record.error_message.as_deref(), Some("tesseract exploded"));
    }

    #[test]
    fn task_display_shows_page() {
        assert_eq!(Task::new("x.pdf", 2).to_string(), "x.pdf#2");
    }
}
