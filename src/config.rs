use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Text layer first, OCR only when the text is insufficient
    #[default]
    Auto,
    /// Never run OCR
    TextOnly,
    /// Skip the text layer and always OCR
    OcrOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Single SQLite file, one transaction per batch
    #[default]
    Sqlite,
    /// One directory of JSON Lines files per batch
    Jsonl,
}

/// Settings shipped to every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mode: ExtractionMode,
    pub language: String,
    /// Render resolution in DPI for OCR.
    pub resolution: u32,
    /// Minimum non-whitespace characters for the text layer to count.
    pub min_chars: usize,
    /// Minimum share of alphanumeric characters among non-whitespace ones.
    pub min_alnum_ratio: f32,
    /// Store a JPEG thumbnail of every page next to its text.
    pub image_column: bool,
    /// Thumbnail edge length in pixels.
    pub image_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Auto,
            language: "eng".to_string(),
            resolution: 150,
            min_chars: 50,
            min_alnum_ratio: 0.5,
            image_column: false,
            image_size: 224,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub task_timeout: Duration,
    pub retries: u32,
    pub batch_size: usize,
    /// Tasks admitted but not yet picked up by a worker.
    pub in_flight_window: usize,
    pub grace_period: Duration,
    pub output_format: OutputFormat,
    pub extensions: Vec<String>,
    pub show_progress: bool,
    pub progress_interval: Duration,
    pub engine: EngineConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("dataset"),
            workers,
            task_timeout: Duration::from_secs(120),
            retries: 1,
            batch_size: 256,
            in_flight_window: workers * 2,
            grace_period: Duration::from_secs(5),
            output_format: OutputFormat::Sqlite,
            extensions: vec!["pdf".to_string()],
            show_progress: true,
            progress_interval: Duration::from_secs(30),
            engine: EngineConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.in_flight_window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::NoExtensions);
        }
        if self.engine.image_column && self.engine.image_size == 0 {
            return Err(ConfigError::ZeroImageSize);
        }
        Ok(())
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
