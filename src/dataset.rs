//! Durable destination for extracted pages and their completion records.
//!
//! A batch is written as one partition. Implementations must make a
//! partition visible to [`DatasetSink::read_records`] only once every row and
//! record in it is durable; a crash mid-write leaves no trace of the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::OutputFormat;
use crate::database::SqliteSink;
use crate::error::StoreError;
use crate::ledger::CompletionLedger;
use crate::partition::PartitionDirSink;
use crate::task::{CompletionRecord, ExtractionMethod, Task, TaskResult};

pub type PartitionId = u64;

/// One persisted page of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub document_path: PathBuf,
    pub page_index: u32,
    pub text: String,
    pub extraction_method: ExtractionMethod,
    pub duration_seconds: f64,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_image: Option<String>,
}

impl DatasetRow {
    /// `None` for failed results: failures are ledger-only.
    pub fn from_result(result: &TaskResult, recorded_at: DateTime<Utc>) -> Option<Self> {
        if !result.is_success() {
            return None;
        }
        Some(Self {
            document_path: result.document_path.clone(),
            page_index: result.page_index,
            text: result.extracted_text.clone(),
            extraction_method: result.extraction_method?,
            duration_seconds: result.duration.as_secs_f64(),
            recorded_at,
            page_image: result.page_image.clone(),
        })
    }
}

/// Rows plus completion records flushed together.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub rows: Vec<DatasetRow>,
    pub records: Vec<CompletionRecord>,
}

impl Batch {
    pub fn from_results(results: &[TaskResult]) -> Self {
        let now = Utc::now();
        Self {
            rows: results
                .iter()
                .filter_map(|r| DatasetRow::from_result(r, now))
                .collect(),
            records: results.iter().map(CompletionRecord::from).collect(),
        }
    }
}

pub trait DatasetSink: Send {
    /// Append one batch atomically and return the partition it became.
    fn write_batch(&mut self, batch: &Batch) -> Result<PartitionId, StoreError>;

    /// Every durable completion record, oldest partition first.
    fn read_records(&self) -> Result<Vec<CompletionRecord>, StoreError>;

    /// Every durable row, oldest partition first.
    fn read_rows(&self) -> Result<Vec<DatasetRow>, StoreError>;

    fn partition_count(&self) -> Result<u64, StoreError>;

    /// Tasks whose latest durable record is a success.
    fn read_completed(&self) -> Result<HashSet<Task>, StoreError> {
        Ok(CompletionLedger::from_records(self.read_records()?).completed_set())
    }
}

impl<S: DatasetSink + ?Sized> DatasetSink for Box<S> {
    fn write_batch(&mut self, batch: &Batch) -> Result<PartitionId, StoreError> {
        (**self).write_batch(batch)
    }

    fn read_records(&self) -> Result<Vec<CompletionRecord>, StoreError> {
        (**self).read_records()
    }

    fn read_rows(&self) -> Result<Vec<DatasetRow>, StoreError> {
        (**self).read_rows()
    }

    fn partition_count(&self) -> Result<u64, StoreError> {
        (**self).partition_count()
    }
}

/// Open (creating if needed) the dataset at `output_dir`.
pub fn open_sink(output_dir: &Path, format: OutputFormat) -> Result<Box<dyn DatasetSink>, StoreError> {
    std::fs::create_dir_all(output_dir).map_err(|source| StoreError::Open {
        path: output_dir.to_path_buf(),
        source,
    })?;

    Ok(match format {
        OutputFormat::Sqlite => Box::new(SqliteSink::open(&output_dir.join(SqliteSink::FILE_NAME))?),
        OutputFormat::Jsonl => Box::new(PartitionDirSink::open(output_dir)?),
    })
}

/// Which encoding the dataset at `output_dir` uses, judged by its files.
pub fn detect_format(output_dir: &Path) -> Option<OutputFormat> {
    if output_dir.join(SqliteSink::FILE_NAME).is_file() {
        Some(OutputFormat::Sqlite)
    } else if PartitionDirSink::has_partitions(output_dir) {
        Some(OutputFormat::Jsonl)
    } else {
        None
    }
}

/// Open an existing dataset for reading only. Nothing is created and no
/// leftovers are cleaned up, so this is safe next to a running writer.
pub fn inspect_dataset(output_dir: &Path, format: Option<OutputFormat>) -> Result<Box<dyn DatasetSink>, StoreError> {
    let format = format
        .or_else(|| detect_format(output_dir))
        .ok_or_else(|| StoreError::NotFound(output_dir.to_path_buf()))?;

    Ok(match format {
        OutputFormat::Sqlite => Box::new(SqliteSink::open_read_only(&output_dir.join(SqliteSink::FILE_NAME))?),
        OutputFormat::Jsonl => Box::new(PartitionDirSink::open_read_only(output_dir)?),
    })
}
