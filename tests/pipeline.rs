mod common;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use base64::{engine::general_purpose, Engine as _};

use common::{scanned, test_config, text, thumbnail, FakeCorpus, Page, PAGE_TEXT};
use pdf2dataset::dataset::{Batch, DatasetSink, PartitionId};
use pdf2dataset::error::{PipelineError, StoreError};
use pdf2dataset::{
    open_sink, pipeline, CompletionLedger, CompletionRecord, DatasetRow, ErrorKind, ExtractionMethod, OutputFormat,
    PipelineConfig, RunSummary, Task,
};

/// Lets `allowed` batches through, then fails every write.
struct FailAfter {
    inner: Box<dyn DatasetSink>,
    allowed: usize,
}

impl DatasetSink for FailAfter {
    fn write_batch(&mut self, batch: &Batch) -> Result<PartitionId, StoreError> {
        if self.allowed == 0 {
            return Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
        }
        self.allowed -= 1;
        self.inner.write_batch(batch)
    }

    fn read_records(&self) -> Result<Vec<CompletionRecord>, StoreError> {
        self.inner.read_records()
    }

    fn read_rows(&self) -> Result<Vec<DatasetRow>, StoreError> {
        self.inner.read_rows()
    }

    fn partition_count(&self) -> Result<u64, StoreError> {
        self.inner.partition_count()
    }
}

async fn run_with(
    config: &PipelineConfig,
    corpus: &FakeCorpus,
    sink: Box<dyn DatasetSink>,
) -> Result<RunSummary, PipelineError> {
    let factory = corpus.factory(config.input_dir.clone(), config.engine.clone());
    pipeline::run(config, Arc::new(corpus.clone()), factory, sink, CancellationToken::new()).await
}

async fn run_once(config: &PipelineConfig, corpus: &FakeCorpus) -> RunSummary {
    let sink = open_sink(&config.output_dir, config.output_format).unwrap();
    run_with(config, corpus, sink).await.unwrap()
}

fn rows(output: &Path, format: OutputFormat) -> Vec<DatasetRow> {
    open_sink(output, format).unwrap().read_rows().unwrap()
}

fn ledger(output: &Path, format: OutputFormat) -> CompletionLedger {
    let sink = open_sink(output, format).unwrap();
    CompletionLedger::load(&*sink).unwrap()
}

fn two_documents() -> FakeCorpus {
    FakeCorpus::new()
        .with_doc("doc1.pdf", vec![text(PAGE_TEXT), scanned("scanned page text"), text(PAGE_TEXT)])
        .with_doc("doc2.pdf", vec![text(PAGE_TEXT), text(PAGE_TEXT)])
}

fn keys(rows: &[DatasetRow]) -> HashSet<Task> {
    rows.iter()
        .map(|r| Task::new(r.document_path.clone(), r.page_index))
        .collect()
}

#[tokio::test]
async fn extracts_every_page_and_falls_back_to_ocr_once() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let corpus = two_documents();
    corpus.materialize(input.path(), &[]);
    let config = test_config(input.path(), output.path());

    let summary = run_once(&config, &corpus).await;

    assert_eq!(summary.documents, 2);
    assert_eq!(summary.total_tasks, 5);
    assert_eq!(summary.pending, 5);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.direct_text, 4);
    assert_eq!(summary.ocr, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(corpus.ocr_calls(), 1);

    let rows = rows(output.path(), OutputFormat::Sqlite);
    assert_eq!(rows.len(), 5);
    let ocr_row = rows
        .iter()
        .find(|r| r.extraction_method == ExtractionMethod::Ocr)
        .unwrap();
    assert_eq!(ocr_row.document_path, Path::new("doc1.pdf"));
    assert_eq!(ocr_row.page_index, 2);
    assert_eq!(ocr_row.text, "scanned page text");

    let ledger = ledger(output.path(), OutputFormat::Sqlite);
    assert_eq!(ledger.completed_count(), 5);
    assert_eq!(ledger.failed_count(), 0);
    assert!(output.path().join(pipeline::SUMMARY_FILE).exists());
}

#[tokio::test]
async fn second_run_over_complete_dataset_does_nothing() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let corpus = two_documents();
    corpus.materialize(input.path(), &[]);
    let config = test_config(input.path(), output.path());

    run_once(&config, &corpus).await;
    let text_calls = corpus.text_calls();
    let partitions = open_sink(output.path(), OutputFormat::Sqlite)
        .unwrap()
        .partition_count()
        .unwrap();

    let summary = run_once(&config, &corpus).await;

    assert_eq!(summary.skipped_completed, 5);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.partitions_written, 0);
    assert_eq!(corpus.text_calls(), text_calls);
    assert_eq!(rows(output.path(), OutputFormat::Sqlite).len(), 5);
    assert_eq!(
        open_sink(output.path(), OutputFormat::Sqlite)
            .unwrap()
            .partition_count()
            .unwrap(),
        partitions
    );
}

#[tokio::test]
async fn resumes_exactly_the_unpersisted_pages_after_a_failed_write() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let corpus = FakeCorpus::new().with_doc("big.pdf", vec![text(PAGE_TEXT); 5]);
    corpus.materialize(input.path(), &[]);
    let mut config = test_config(input.path(), output.path());
    config.workers = 1;

    let sink = Box::new(FailAfter {
        inner: open_sink(output.path(), OutputFormat::Sqlite).unwrap(),
        allowed: 1,
    });
    let err = run_with(&config, &corpus, sink).await.unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)));

    let persisted = rows(output.path(), OutputFormat::Sqlite);
    assert_eq!(persisted.len(), 2);

    let before = corpus.text_calls();
    let summary = run_once(&config, &corpus).await;

    assert_eq!(summary.skipped_completed, 2);
    assert_eq!(summary.pending, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(corpus.text_calls() - before, 3);

    let all = rows(output.path(), OutputFormat::Sqlite);
    assert_eq!(all.len(), 5);
    assert_eq!(keys(&all).len(), 5);
    assert!(keys(&persisted).is_subset(&keys(&all)));
}

#[tokio::test]
async fn unreadable_document_does_not_stop_the_others() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let corpus = two_documents();
    corpus.materialize(input.path(), &["broken.pdf"]);
    let config = test_config(input.path(), output.path());

    let summary = run_once(&config, &corpus).await;

    assert_eq!(summary.documents, 3);
    assert_eq!(summary.unreadable_documents, 1);
    assert_eq!(summary.total_tasks, 5);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed_by_kind.get(&ErrorKind::DocumentUnreadable), Some(&1));

    let failure = summary.failures.iter().find(|f| f.page_index.is_none()).unwrap();
    assert_eq!(failure.document_path, Path::new("broken.pdf"));
    assert_eq!(rows(output.path(), OutputFormat::Sqlite).len(), 5);
}

#[tokio::test]
async fn failed_page_is_recorded_and_retried_next_run() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let corpus = two_documents();
    corpus.set_page("doc2.pdf", 2, Page::OcrFails);
    corpus.set_page("doc1.pdf", 1, Page::Panics);
    corpus.materialize(input.path(), &[]);
    let config = test_config(input.path(), output.path());

    let summary = run_once(&config, &corpus).await;

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.failed_by_kind.get(&ErrorKind::OcrFailure), Some(&1));
    assert_eq!(summary.failed_by_kind.get(&ErrorKind::WorkerCrash), Some(&1));
    assert_eq!(rows(output.path(), OutputFormat::Sqlite).len(), 3);

    let ledger = ledger(output.path(), OutputFormat::Sqlite);
    assert_eq!(ledger.failed_count(), 2);
    assert!(!ledger.is_completed(&Task::new("doc2.pdf", 2)));

    corpus.set_page("doc2.pdf", 2, text(PAGE_TEXT));
    corpus.set_page("doc1.pdf", 1, text(PAGE_TEXT));
    let summary = run_once(&config, &corpus).await;

    assert_eq!(summary.skipped_completed, 3);
    assert_eq!(summary.pending, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(rows(output.path(), OutputFormat::Sqlite).len(), 5);
    assert_eq!(ledger_completed(output.path()), 5);
}

#[tokio::test]
async fn timed_out_page_is_recorded_and_rerun_alone() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let corpus = two_documents();
    corpus.set_page("doc2.pdf", 1, Page::Stalls(Duration::from_millis(1500)));
    corpus.materialize(input.path(), &[]);
    let mut config = test_config(input.path(), output.path());
    config.task_timeout = Duration::from_millis(200);

    let summary = run_once(&config, &corpus).await;

    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_by_kind.get(&ErrorKind::Timeout), Some(&1));
    let failure = &summary.failures[0];
    assert_eq!(failure.document_path, Path::new("doc2.pdf"));
    assert_eq!(failure.page_index, Some(1));

    let records = open_sink(output.path(), OutputFormat::Sqlite)
        .unwrap()
        .read_records()
        .unwrap();
    let record = records
        .iter()
        .find(|r| r.task() == Task::new("doc2.pdf", 1))
        .unwrap();
    assert!(!record.succeeded);
    assert_eq!(record.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(rows(output.path(), OutputFormat::Sqlite).len(), 4);

    corpus.set_page("doc2.pdf", 1, text(PAGE_TEXT));
    let before = corpus.text_calls();
    let summary = run_once(&config, &corpus).await;

    assert_eq!(summary.skipped_completed, 4);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(corpus.text_calls() - before, 1);
    assert_eq!(ledger_completed(output.path()), 5);
}

fn ledger_completed(output: &Path) -> usize {
    ledger(output, OutputFormat::Sqlite).completed_count()
}

#[tokio::test]
async fn partition_directory_format_resumes_too() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let corpus = two_documents();
    corpus.materialize(input.path(), &[]);
    let mut config = test_config(input.path(), output.path());
    config.output_format = OutputFormat::Jsonl;

    let first = run_once(&config, &corpus).await;
    assert_eq!(first.succeeded, 5);
    assert_eq!(first.partitions_written, 3);

    let second = run_once(&config, &corpus).await;
    assert_eq!(second.pending, 0);
    assert_eq!(rows(output.path(), OutputFormat::Jsonl).len(), 5);
    assert_eq!(ledger(output.path(), OutputFormat::Jsonl).completed_count(), 5);
}

#[tokio::test]
async fn image_column_is_stored_by_both_formats() {
    for format in [OutputFormat::Sqlite, OutputFormat::Jsonl] {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let corpus = two_documents();
        corpus.materialize(input.path(), &[]);
        let mut config = test_config(input.path(), output.path());
        config.output_format = format;
        config.engine.image_column = true;
        config.engine.image_size = 64;

        let summary = run_once(&config, &corpus).await;
        assert_eq!(summary.succeeded, 5);

        let expected = general_purpose::STANDARD.encode(thumbnail(64));
        let rows = rows(output.path(), format);
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.page_image.as_deref() == Some(expected.as_str())), "{:?}", format);
    }
}

#[tokio::test]
async fn missing_input_root_is_fatal() {
    let output = TempDir::new().unwrap();
    let config = test_config(&output.path().join("nope"), output.path());

    let sink = open_sink(output.path(), OutputFormat::Sqlite).unwrap();
    let err = run_with(&config, &FakeCorpus::new(), sink).await.unwrap_err();
    assert!(matches!(err, PipelineError::InputRoot(_)));
}

#[tokio::test]
async fn cancelled_run_leaves_remaining_pages_pending() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let corpus = two_documents();
    corpus.materialize(input.path(), &[]);
    let config = test_config(input.path(), output.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let sink = open_sink(output.path(), OutputFormat::Sqlite).unwrap();
    let factory = corpus.factory(config.input_dir.clone(), config.engine.clone());
    let summary = pipeline::run(&config, Arc::new(corpus.clone()), factory, sink, cancel)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.succeeded + summary.failed + summary.abandoned + summary.not_attempted, 5);

    let persisted = rows(output.path(), OutputFormat::Sqlite).len();
    let resumed = run_once(&config, &corpus).await;
    assert_eq!(resumed.pending, 5 - persisted);
    assert_eq!(rows(output.path(), OutputFormat::Sqlite).len(), 5);
}
