//! Resumable, parallel per-page text extraction from a directory of PDFs
//! into a growable dataset.
//!
//! A run enumerates every page of every document, drops pages the dataset
//! already holds, extracts the rest in a pool of worker processes (text layer
//! first, OCR when that is too thin) and appends results in atomic batches.

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod database;
pub mod dataset;
pub mod enumerate;
pub mod error;
pub mod extractor;
pub mod ledger;
pub mod ocr;
pub mod partition;
pub mod pdf;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use config::{EngineConfig, ExtractionMode, OutputFormat, PipelineConfig};
pub use dataset::{open_sink, Batch, DatasetRow, DatasetSink, PartitionId};
pub use error::{CollaboratorError, ConfigError, PipelineError, StoreError};
pub use extractor::ExtractionEngine;
pub use ledger::CompletionLedger;
pub use progress::RunSummary;
pub use task::{CompletionRecord, ErrorKind, ExtractionMethod, Task, TaskError, TaskResult};
