use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::config::PipelineConfig;
use crate::dataset::DatasetSink;
use crate::enumerate::{enumerate, PageCounter};
use crate::error::PipelineError;
use crate::ledger::CompletionLedger;
use crate::progress::{ProgressReporter, RunSummary};
use crate::scheduler::{PoolEvent, PoolSettings, Scheduler};
use crate::worker::WorkerFactory;

pub const SUMMARY_FILE: &str = "run_summary.json";

/// One full run: enumerate, skip what the ledger already has, extract the
/// rest in parallel and persist results in batches.
///
/// Task failures never make this return an error; they are counted in the
/// summary. Only dataset write/open failures (and a missing input root) do.
pub async fn run<F: WorkerFactory>(
    config: &PipelineConfig,
    counter: Arc<dyn PageCounter>,
    factory: F,
    sink: Box<dyn DatasetSink>,
    cancel: CancellationToken,
) -> Result<RunSummary, PipelineError> {
    config.validate()?;

    let root = config.input_dir.clone();
    let extensions = config.extensions.clone();
    let enumeration = tokio::task::spawn_blocking(move || enumerate(&root, &extensions, &*counter)).await??;

    let ledger = CompletionLedger::load(&*sink)?;
    let total_tasks = enumeration.tasks.len();
    let pending = ledger.filter_pending(enumeration.tasks);
    let skipped = total_tasks - pending.len();
    info!(
        "{} pages in {} documents, {} already completed, {} to process",
        total_tasks,
        enumeration.documents,
        skipped,
        pending.len()
    );

    // internal stop signal: operator interrupt or fatal write error
    let stop = cancel.child_token();
    let window = config.in_flight_window.max(1);

    let (event_tx, mut event_rx) = mpsc::channel::<PoolEvent>(window * 2);
    let (result_tx, result_rx) = mpsc::channel(config.batch_size.clamp(1, 1024));
    let (report_tx, report_rx) = mpsc::channel::<PoolEvent>(window * 2);

    let aggregator = tokio::spawn(Aggregator::new(sink, config.batch_size).run(result_rx, stop.clone()));
    let reporter = tokio::spawn(
        ProgressReporter::new(pending.len(), config.show_progress, config.progress_interval)
            .with_document_errors(&enumeration.errors)
            .run(report_rx),
    );

    let fanout = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let PoolEvent::Completed(result) = &event {
                // a closed result channel means the aggregator already failed
                let _ = result_tx.send(result.clone()).await;
            }
            let _ = report_tx.send(event).await;
        }
    });

    let scheduler = Scheduler::new(factory, PoolSettings::from(config));
    let pool_stats = scheduler.run(pending, event_tx, stop.clone()).await;
    info!(
        "Pool finished: {} completed, {} abandoned, {} workers started, {} crashes",
        pool_stats.completed, pool_stats.abandoned, pool_stats.workers_started, pool_stats.crashes
    );

    fanout.await?;
    let written = aggregator.await??;
    let mut summary = reporter.await?.finish(cancel.is_cancelled());

    summary.documents = enumeration.documents;
    summary.total_tasks = total_tasks;
    summary.skipped_completed = skipped;
    summary.partitions_written = written.partitions;

    write_summary(&config.output_dir, &summary);
    Ok(summary)
}

/// Best effort: the dataset is already durable at this point.
fn write_summary(output_dir: &Path, summary: &RunSummary) {
    let path = output_dir.join(SUMMARY_FILE);
    match serde_json::to_vec_pretty(summary) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(&path, bytes) {
                warn!("Could not write {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!("Could not encode run summary: {}", e),
    }
}
