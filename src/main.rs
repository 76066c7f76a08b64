use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use pdf2dataset::cli::{Cli, Command, RunArgs};
use pdf2dataset::config::{ExtractionMode, OutputFormat};
use pdf2dataset::ledger::CompletionLedger;
use pdf2dataset::ocr::check_ocr_availability;
use pdf2dataset::pdf::PdfProcessor;
use pdf2dataset::pipeline;
use pdf2dataset::worker::{self, build_default_engine, InProcessFactory, ProcessWorkerFactory, WorkerHello};
use pdf2dataset::dataset::inspect_dataset;
use pdf2dataset::{open_sink, RunSummary};

/// How long exit waits for blocking threads that outlived the run.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli.command {
        Command::Worker => {
            worker::serve_stdio().context("worker failed")?;
            Ok(())
        }
        Command::Status { output_dir, format } => status(&output_dir, format),
        Command::Run(args) => block_on_and_release(run(args))?,
    }
}

/// Drives `future` on a fresh runtime. An in-process page still stuck in
/// its blocking thread when the run ends is left behind instead of holding
/// up exit.
fn block_on_and_release<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("cannot start async runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(RELEASE_TIMEOUT);
    Ok(output)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.to_config();
    config.validate().context("invalid configuration")?;

    info!("🦀 pdf2dataset starting...");
    info!("Workers: {}", config.workers);
    info!("Input: {}", config.input_dir.display());
    info!("Output: {}", config.output_dir.display());

    let needs_ocr_tools = config.engine.mode != ExtractionMode::TextOnly || config.engine.image_column;
    if needs_ocr_tools && !check_ocr_availability().await {
        warn!("OCR tools not available - pages without a usable text layer will fail");
    }

    let sink = open_sink(&config.output_dir, config.output_format)
        .with_context(|| format!("cannot open dataset at {}", config.output_dir.display()))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight pages...");
            on_interrupt.cancel();
        }
    });

    let hello = WorkerHello {
        root: config.input_dir.clone(),
        engine: config.engine.clone(),
    };
    let counter = Arc::new(PdfProcessor::new());

    let summary = if args.in_process {
        let factory = InProcessFactory::new(move |_| build_default_engine(&hello));
        pipeline::run(&config, counter, factory, sink, cancel).await?
    } else {
        let factory = ProcessWorkerFactory::current_exe(hello).context("cannot locate own executable")?;
        pipeline::run(&config, counter, factory, sink, cancel).await?
    };

    print_summary(&summary);
    println!("Dataset: {}", config.output_dir.display());
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if summary.cancelled || summary.left_over() > 0 {
        println!("\n{}", summary.headline());
    } else {
        println!("\n🎉 Extraction complete!");
    }
    println!("{}", summary);

    if !summary.failures.is_empty() {
        println!("\nFailures (re-run to retry):");
        for failure in summary.failures.iter().take(20) {
            match failure.page_index {
                Some(page) => println!("  {} page {}: {} ({})", failure.document_path.display(), page, failure.kind, failure.message),
                None => println!("  {}: {} ({})", failure.document_path.display(), failure.kind, failure.message),
            }
        }
        if summary.failures.len() > 20 {
            println!("  ... and {} more, see {}", summary.failures.len() - 20, pipeline::SUMMARY_FILE);
        }
    }
}

fn status(output_dir: &std::path::Path, format: Option<OutputFormat>) -> Result<()> {
    let sink = inspect_dataset(output_dir, format)
        .with_context(|| format!("cannot read dataset at {}", output_dir.display()))?;
    let ledger = CompletionLedger::load(&*sink)?;

    println!("Dataset {}", output_dir.display());
    println!("{}", "=".repeat(40));
    println!("Partitions: {}", sink.partition_count()?);
    println!("Pages completed: {}", ledger.completed_count());
    println!("Pages failed on last attempt: {}", ledger.failed_count());
    Ok(())
}
