use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{default_workers, EngineConfig, ExtractionMode, OutputFormat, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "pdf2dataset")]
#[command(about = "Extract per-page text from a directory of PDFs into a resumable dataset")]
#[command(version)]
pub struct Cli {
    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract text from every page not yet in the dataset
    Run(RunArgs),

    /// Show what the dataset at OUTPUT_DIR already holds (read-only)
    Status {
        output_dir: PathBuf,

        /// Dataset encoding [default: detected from OUTPUT_DIR]
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Serve extraction requests on stdin/stdout (used internally)
    #[command(hide = true)]
    Worker,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Directory to search recursively for documents
    pub input_dir: PathBuf,

    /// Dataset directory; re-using it resumes the previous run
    pub output_dir: PathBuf,

    /// Number of parallel workers [default: available cores]
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-page timeout in seconds
    #[arg(short, long, default_value = "120")]
    pub timeout: u64,

    /// Retries for crashed workers and transient errors
    #[arg(short, long, default_value = "1")]
    pub retries: u32,

    /// Pages per persisted batch
    #[arg(short, long, default_value = "256")]
    pub batch_size: usize,

    /// Tasks queued ahead of the workers [default: 2 x workers]
    #[arg(long)]
    pub in_flight: Option<usize>,

    /// Seconds in-flight pages get to finish after Ctrl-C
    #[arg(long, default_value = "5")]
    pub grace: u64,

    /// Extraction strategy
    #[arg(short, long, value_enum, default_value_t = ExtractionMode::Auto)]
    pub mode: ExtractionMode,

    /// Tesseract language
    #[arg(short, long, default_value = "eng")]
    pub lang: String,

    /// Render resolution for OCR, in DPI
    #[arg(long, default_value = "150")]
    pub resolution: u32,

    /// Minimum characters for the text layer to be used without OCR
    #[arg(long, default_value = "50")]
    pub min_chars: usize,

    /// Minimum share of alphanumeric characters in the text layer
    #[arg(long, default_value = "0.5")]
    pub min_alnum_ratio: f32,

    /// Dataset encoding
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Sqlite)]
    pub format: OutputFormat,

    /// Document extensions to pick up (repeatable)
    #[arg(long = "ext", default_value = "pdf")]
    pub extensions: Vec<String>,

    /// Store a base64 JPEG thumbnail of every page in the dataset
    #[arg(long)]
    pub image_column: bool,

    /// Thumbnail edge length in pixels
    #[arg(long, default_value = "224")]
    pub image_size: u32,

    /// Run extraction on threads instead of worker processes. A page stuck
    /// in native code cannot be killed this way: its thread is abandoned
    /// and the process exits without waiting for it.
    #[arg(long)]
    pub in_process: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Seconds between progress log lines
    #[arg(long, default_value = "30")]
    pub progress_interval: u64,
}

impl RunArgs {
    pub fn to_config(&self) -> PipelineConfig {
        let workers = self.workers.unwrap_or_else(default_workers);
        PipelineConfig {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            workers,
            task_timeout: Duration::from_secs(self.timeout),
            retries: self.retries,
            batch_size: self.batch_size,
            in_flight_window: self.in_flight.unwrap_or(workers * 2),
            grace_period: Duration::from_secs(self.grace),
            output_format: self.format,
            extensions: self.extensions.clone(),
            show_progress: !self.no_progress,
            progress_interval: Duration::from_secs(self.progress_interval.max(1)),
            engine: EngineConfig {
                mode: self.mode,
                language: self.lang.clone(),
                resolution: self.resolution,
                min_chars: self.min_chars,
                min_alnum_ratio: self.min_alnum_ratio,
                image_column: self.image_column,
                image_size: self.image_size,
            },
        }
    }
}
