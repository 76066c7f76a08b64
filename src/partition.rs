use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::dataset::{Batch, DatasetRow, DatasetSink, PartitionId};
use crate::error::StoreError;
use crate::task::CompletionRecord;

const PARTITION_PREFIX: &str = "part-";
const STAGING_PREFIX: &str = ".staging-";
const ROWS_FILE: &str = "rows.jsonl";
const LEDGER_FILE: &str = "ledger.jsonl";

/// Dataset as a directory of partitions, `part-000001/{rows,ledger}.jsonl`.
///
/// A partition is written under a staging name and renamed into place once
/// both files are synced; readers only ever see `part-*` directories.
pub struct PartitionDirSink {
    root: PathBuf,
    next: PartitionId,
    read_only: bool,
}

impl PartitionDirSink {
    /// Open for writing. Staging directories left by an interrupted run are
    /// removed, so only one writer may have the directory open.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(root).map_err(|source| StoreError::Open {
            path: root.to_path_buf(),
            source,
        })?;
        Self::scan(root, false)
    }

    /// Open for reading alongside a possibly running writer. Nothing on disk
    /// is touched and `write_batch` is refused.
    pub fn open_read_only(root: &Path) -> Result<Self, StoreError> {
        if !root.is_dir() {
            return Err(StoreError::NotFound(root.to_path_buf()));
        }
        Self::scan(root, true)
    }

    fn scan(root: &Path, read_only: bool) -> Result<Self, StoreError> {
        let mut last = 0;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            if name.starts_with(STAGING_PREFIX) {
                if !read_only {
                    warn!("Removing incomplete partition {} left by an interrupted run", name);
                    fs::remove_dir_all(entry.path())?;
                }
            } else if let Some(id) = parse_partition_name(&name) {
                last = last.max(id);
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            next: last + 1,
            read_only,
        })
    }

    /// Whether `root` holds at least one committed partition.
    pub fn has_partitions(root: &Path) -> bool {
        fs::read_dir(root)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .any(|e| parse_partition_name(&e.file_name().to_string_lossy()).is_some())
            })
            .unwrap_or(false)
    }

    fn partitions(&self) -> Result<Vec<(PartitionId, PathBuf)>, StoreError> {
        let mut partitions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(id) = parse_partition_name(&entry.file_name().to_string_lossy()) {
                partitions.push((id, entry.path()));
            }
        }
        partitions.sort();
        Ok(partitions)
    }

    fn read_all<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for (_, dir) in self.partitions()? {
            let path = dir.join(file);
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let value = serde_json::from_str(&line).map_err(|source| StoreError::Decode {
                    path: path.clone(),
                    source,
                })?;
                out.push(value);
            }
        }
        Ok(out)
    }
}

fn partition_name(id: PartitionId) -> String {
    format!("{}{:06}", PARTITION_PREFIX, id)
}

fn parse_partition_name(name: &str) -> Option<PartitionId> {
    name.strip_prefix(PARTITION_PREFIX)?.parse().ok()
}

fn write_lines<T: Serialize>(path: &Path, items: &[T]) -> Result<(), StoreError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

impl DatasetSink for PartitionDirSink {
    fn write_batch(&mut self, batch: &Batch) -> Result<PartitionId, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly(self.root.clone()));
        }

        let id = self.next;
        let name = partition_name(id);
        let staging = self.root.join(format!("{}{}", STAGING_PREFIX, name));
        let target = self.root.join(&name);

        fs::create_dir(&staging)?;
        write_lines(&staging.join(ROWS_FILE), &batch.rows)?;
        write_lines(&staging.join(LEDGER_FILE), &batch.records)?;
        fs::rename(&staging, &target)?;

        // make the rename itself durable
        #[cfg(unix)]
        File::open(&self.root)?.sync_all()?;

        self.next += 1;
        info!(
            "Committed partition {} ({} rows, {} records)",
            name,
            batch.rows.len(),
            batch.records.len()
        );
        Ok(id)
    }

    fn read_records(&self) -> Result<Vec<CompletionRecord>, StoreError> {
        self.read_all(LEDGER_FILE)
    }

    fn read_rows(&self) -> Result<Vec<DatasetRow>, StoreError> {
        self.read_all(ROWS_FILE)
    }

    fn partition_count(&self) -> Result<u64, StoreError> {
        Ok(self.partitions()?.len() as u64)
    }
}
