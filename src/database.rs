use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};

use crate::dataset::{Batch, DatasetRow, DatasetSink, PartitionId};
use crate::error::StoreError;
use crate::task::{CompletionRecord, ErrorKind, ExtractionMethod};

/// Dataset in a single SQLite file. Each batch is one transaction, so a
/// crash before commit leaves nothing behind.
pub struct SqliteSink {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSink {
    pub const FILE_NAME: &'static str = "dataset.sqlite";

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA cache_size=10000;
             PRAGMA temp_store=memory;",
        )?;

        let sink = SqliteSink {
            conn,
            path: path.to_path_buf(),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    /// Open an existing dataset without creating it or changing its schema.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!("Opened {} read-only", path.display());
        Ok(SqliteSink {
            conn,
            path: path.to_path_buf(),
        })
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS partitions (
                id INTEGER PRIMARY KEY,
                row_count INTEGER NOT NULL,
                record_count INTEGER NOT NULL,
                written_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pages (
                document_path TEXT NOT NULL,
                page_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                extraction_method TEXT NOT NULL,
                duration_seconds REAL NOT NULL,
                recorded_at TEXT NOT NULL,
                page_image TEXT,
                partition_id INTEGER NOT NULL REFERENCES partitions(id),
                PRIMARY KEY (document_path, page_index)
            );

            CREATE TABLE IF NOT EXISTS completions (
                document_path TEXT NOT NULL,
                page_index INTEGER NOT NULL,
                succeeded BOOLEAN NOT NULL,
                error_kind TEXT,
                error_message TEXT,
                partition_id INTEGER NOT NULL REFERENCES partitions(id),
                PRIMARY KEY (document_path, page_index)
            );

            CREATE INDEX IF NOT EXISTS idx_pages_method ON pages(extraction_method);
            CREATE INDEX IF NOT EXISTS idx_completions_partition ON completions(partition_id);
            "#,
        )?;

        debug!("Dataset schema initialized at {}", self.path.display());
        Ok(())
    }
}

impl DatasetSink for SqliteSink {
    fn write_batch(&mut self, batch: &Batch) -> Result<PartitionId, StoreError> {
        let tx = self.conn.transaction()?;

        let partition: i64 = tx.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM partitions", [], |row| {
            row.get(0)
        })?;

        tx.execute(
            "INSERT INTO partitions (id, row_count, record_count, written_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                partition,
                batch.rows.len() as i64,
                batch.records.len() as i64,
                Utc::now().to_rfc3339()
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO pages
                (document_path, page_index, text, extraction_method,
                 duration_seconds, recorded_at, page_image, partition_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;

            for row in &batch.rows {
                stmt.execute(params![
                    path_key(&row.document_path),
                    row.page_index,
                    row.text,
                    row.extraction_method.as_str(),
                    row.duration_seconds,
                    row.recorded_at.to_rfc3339(),
                    row.page_image,
                    partition,
                ])?;
            }

            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO completions
                (document_path, page_index, succeeded, error_kind, error_message, partition_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;

            for record in &batch.records {
                stmt.execute(params![
                    path_key(&record.document_path),
                    record.page_index,
                    record.succeeded,
                    record.error_kind.map(|k| k.as_str()),
                    record.error_message,
                    partition,
                ])?;
            }
        }

        tx.commit()?;
        info!(
            "Committed partition {} ({} rows, {} records)",
            partition,
            batch.rows.len(),
            batch.records.len()
        );
        Ok(partition as PartitionId)
    }

    fn read_records(&self) -> Result<Vec<CompletionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT document_path, page_index, succeeded, error_kind, error_message
            FROM completions
            ORDER BY partition_id, document_path, page_index
            "#,
        )?;

        let records = stmt.query_map([], |row| {
            let kind: Option<String> = row.get(3)?;
            Ok(CompletionRecord {
                document_path: PathBuf::from(row.get::<_, String>(0)?),
                page_index: row.get(1)?,
                succeeded: row.get(2)?,
                error_kind: kind.as_deref().and_then(ErrorKind::parse),
                error_message: row.get(4)?,
            })
        })?;

        let mut out = Vec::new();
        for record in records {
            out.push(record?);
        }
        Ok(out)
    }

    fn read_rows(&self) -> Result<Vec<DatasetRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT document_path, page_index, text, extraction_method,
                   duration_seconds, recorded_at, page_image
            FROM pages
            ORDER BY partition_id, document_path, page_index
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (document_path, page_index, text, method, duration_seconds, recorded_at, page_image) = row?;
            let extraction_method = ExtractionMethod::parse(&method).ok_or_else(|| {
                StoreError::Sqlite(rusqlite::Error::InvalidColumnType(
                    3,
                    "extraction_method".to_string(),
                    rusqlite::types::Type::Text,
                ))
            })?;
            let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            out.push(DatasetRow {
                document_path: PathBuf::from(document_path),
                page_index,
                text,
                extraction_method,
                duration_seconds,
                recorded_at,
                page_image,
            });
        }
        Ok(out)
    }

    fn partition_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM partitions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
