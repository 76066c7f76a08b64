use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dataset::{Batch, DatasetSink, PartitionId};
use crate::error::StoreError;
use crate::task::TaskResult;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub partitions: usize,
    pub rows: usize,
    pub records: usize,
}

/// Single writer for the dataset. Buffers results and writes one partition
/// per `batch_size` results, plus a final partition for the remainder.
pub struct Aggregator {
    sink: Box<dyn DatasetSink>,
    batch_size: usize,
    buffer: Vec<TaskResult>,
    stats: AggregatorStats,
}

impl Aggregator {
    pub fn new(sink: Box<dyn DatasetSink>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            stats: AggregatorStats::default(),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    pub fn push(&mut self, result: TaskResult) -> Result<Option<PartitionId>, StoreError> {
        self.buffer.push(result);
        if self.buffer.len() >= self.batch_size {
            self.flush()
        } else {
            Ok(None)
        }
    }

    /// Write whatever is buffered as one partition.
    pub fn flush(&mut self) -> Result<Option<PartitionId>, StoreError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let batch = Batch::from_results(&self.buffer);
        let partition = self.sink.write_batch(&batch)?;

        self.stats.partitions += 1;
        self.stats.rows += batch.rows.len();
        self.stats.records += batch.records.len();
        self.buffer.clear();

        debug!("Flushed partition {}", partition);
        Ok(Some(partition))
    }

    /// Drain `results` until the channel closes, then flush the remainder.
    /// A write failure cancels `cancel` so the pool stops admitting work.
    pub async fn run(
        mut self,
        mut results: mpsc::Receiver<TaskResult>,
        cancel: CancellationToken,
    ) -> Result<AggregatorStats, StoreError> {
        while let Some(result) = results.recv().await {
            if let Err(e) = self.push(result) {
                error!("Failed to write batch, stopping run: {}", e);
                cancel.cancel();
                return Err(e);
            }
        }

        if let Err(e) = self.flush() {
            error!("Failed to write final batch: {}", e);
            cancel.cancel();
            return Err(e);
        }

        info!(
            "Wrote {} partitions ({} rows, {} records)",
            self.stats.partitions, self.stats.rows, self.stats.records
        );
        Ok(self.stats)
    }
}
