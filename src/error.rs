use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by an external collaborator (text layer, renderer, OCR,
/// page counter).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
    pub transient: bool,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// Missing binaries fail every time; other spawn errors may clear up.
    pub fn from_spawn(program: &str, err: std::io::Error) -> Self {
        let message = format!("failed to run {}: {}", program, err);
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::new(message)
        } else {
            Self::transient(message)
        }
    }
}

/// Readable text for a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

/// Errors from the dataset destination. All of these are fatal to a run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open output location {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record in {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no dataset found at {0}")]
    NotFound(PathBuf),

    #[error("dataset at {0} is open read-only")]
    ReadOnly(PathBuf),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("batch size must be at least 1")]
    ZeroBatch,
    #[error("task timeout must be greater than zero")]
    ZeroTimeout,
    #[error("in-flight window must be at least 1")]
    ZeroWindow,
    #[error("at least one document extension is required")]
    NoExtensions,
    #[error("image size must be at least 1 pixel")]
    ZeroImageSize,
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("input directory {0} does not exist or is not a directory")]
    InputRoot(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
