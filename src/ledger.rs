use log::info;
use std::collections::{HashMap, HashSet};

use crate::dataset::DatasetSink;
use crate::error::StoreError;
use crate::task::{CompletionRecord, Task};

/// Which tasks already succeeded in earlier runs.
///
/// Records are applied in write order and the latest record for a task wins.
/// Only a success suppresses re-execution; a task whose latest attempt
/// failed stays pending and is retried on every run.
#[derive(Debug, Default, Clone)]
pub struct CompletionLedger {
    latest: HashMap<Task, bool>,
}

impl CompletionLedger {
    pub fn from_records(records: impl IntoIterator<Item = CompletionRecord>) -> Self {
        let mut latest = HashMap::new();
        for record in records {
            latest.insert(record.task(), record.succeeded);
        }
        Self { latest }
    }

    /// Load once at startup from whatever the output location already holds.
    pub fn load(sink: &dyn DatasetSink) -> Result<Self, StoreError> {
        let ledger = Self::from_records(sink.read_records()?);
        info!(
            "Ledger: {} pages completed, {} pages previously failed",
            ledger.completed_count(),
            ledger.failed_count()
        );
        Ok(ledger)
    }

    pub fn is_completed(&self, task: &Task) -> bool {
        self.latest.get(task).copied().unwrap_or(false)
    }

    pub fn completed(&self) -> impl Iterator<Item = &Task> {
        self.latest.iter().filter(|(_, ok)| **ok).map(|(task, _)| task)
    }

    pub fn completed_count(&self) -> usize {
        self.latest.values().filter(|ok| **ok).count()
    }

    pub fn failed_count(&self) -> usize {
        self.latest.values().filter(|ok| !**ok).count()
    }

    /// Drop every task that already succeeded, keeping the original order.
    pub fn filter_pending(&self, tasks: Vec<Task>) -> Vec<Task> {
        tasks.into_iter().filter(|t| !self.is_completed(t)).collect()
    }

    pub fn completed_set(&self) -> HashSet<Task> {
        self.completed().cloned().collect()
    }
}
