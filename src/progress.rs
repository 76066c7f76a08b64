use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::enumerate::DocumentError;
use crate::scheduler::PoolEvent;
use crate::task::{ErrorKind, ExtractionMethod};

/// One failed page, or a whole document when `page_index` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub document_path: PathBuf,
    pub page_index: Option<u32>,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub documents: usize,
    pub unreadable_documents: usize,
    pub total_tasks: usize,
    pub skipped_completed: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub direct_text: usize,
    pub ocr: usize,
    pub failed: usize,
    pub failed_by_kind: BTreeMap<ErrorKind, usize>,
    pub abandoned: usize,
    pub not_attempted: usize,
    pub partitions_written: usize,
    pub cancelled: bool,
    pub elapsed_seconds: f64,
    pub failures: Vec<FailureEntry>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Documents: {} ({} unreadable)", self.documents, self.unreadable_documents)?;
        writeln!(
            f,
            "Pages: {} total, {} already done, {} scheduled",
            self.total_tasks, self.skipped_completed, self.pending
        )?;
        writeln!(
            f,
            "Succeeded: {} ({} direct text, {} OCR)",
            self.succeeded, self.direct_text, self.ocr
        )?;
        writeln!(f, "Failed: {}", self.failed)?;
        for (kind, count) in &self.failed_by_kind {
            writeln!(f, "  {}: {}", kind, count)?;
        }
        if self.abandoned > 0 || self.not_attempted > 0 {
            writeln!(
                f,
                "Left for next run: {} abandoned, {} not attempted",
                self.abandoned, self.not_attempted
            )?;
        }
        writeln!(f, "Partitions written: {}", self.partitions_written)?;
        write!(f, "Elapsed: {:.1}s", self.elapsed_seconds)?;
        if self.cancelled {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

impl RunSummary {
    /// Pages that were scheduled but neither succeeded nor failed.
    pub fn left_over(&self) -> usize {
        self.abandoned + self.not_attempted
    }

    pub fn headline(&self) -> String {
        match (self.cancelled, self.left_over()) {
            (false, 0) => "✅ All pages processed!".to_string(),
            (true, left) => format!("⏹️ Interrupted, {} pages left for the next run", left),
            (false, left) => format!("⚠️ Stopped early, {} pages left for the next run", left),
        }
    }
}

/// Consumes pool events, keeps running counts and drives the progress bar.
pub struct ProgressReporter {
    bar: ProgressBar,
    interval: Duration,
    started: Instant,
    in_flight: usize,
    summary: RunSummary,
}

impl ProgressReporter {
    pub fn new(pending: usize, show: bool, interval: Duration) -> Self {
        let bar = if show {
            ProgressBar::new(pending as u64)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .expect("Failed to set progress bar template")
                .progress_chars("#>-"),
        );
        bar.set_message("Processing pages...");

        Self {
            bar,
            interval,
            started: Instant::now(),
            in_flight: 0,
            summary: RunSummary {
                pending,
                ..RunSummary::default()
            },
        }
    }

    pub fn with_document_errors(mut self, errors: &[DocumentError]) -> Self {
        self.summary.unreadable_documents = errors.len();
        for error in errors {
            *self.summary.failed_by_kind.entry(error.kind).or_default() += 1;
            self.summary.failures.push(FailureEntry {
                document_path: error.document_path.clone(),
                page_index: None,
                kind: error.kind,
                message: error.message.clone(),
            });
        }
        self
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn record(&mut self, event: &PoolEvent) {
        match event {
            PoolEvent::Dispatched(_) => self.in_flight += 1,
            PoolEvent::Completed(result) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                match &result.error {
                    None => {
                        self.summary.succeeded += 1;
                        match result.extraction_method {
                            Some(ExtractionMethod::Ocr) => self.summary.ocr += 1,
                            _ => self.summary.direct_text += 1,
                        }
                    }
                    Some(error) => {
                        self.summary.failed += 1;
                        *self.summary.failed_by_kind.entry(error.kind).or_default() += 1;
                        self.summary.failures.push(FailureEntry {
                            document_path: result.document_path.clone(),
                            page_index: Some(result.page_index),
                            kind: error.kind,
                            message: error.message.clone(),
                        });
                    }
                }
                self.bar.inc(1);
                self.bar.set_message(format!(
                    "{} ok, {} failed, {} running",
                    self.summary.succeeded, self.summary.failed, self.in_flight
                ));
            }
            PoolEvent::Abandoned(_) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.summary.abandoned += 1;
            }
        }
    }

    fn log_progress(&self) {
        let done = self.summary.succeeded + self.summary.failed;
        info!(
            "Progress: {}/{} pages ({} ok, {} failed, {} in flight)",
            done, self.summary.pending, self.summary.succeeded, self.summary.failed, self.in_flight
        );
    }

    /// Consume events until the channel closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<PoolEvent>) -> Self {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.record(&event),
                    None => break,
                },
                _ = ticker.tick() => self.log_progress(),
            }
        }
        self
    }

    pub fn finish(mut self, cancelled: bool) -> RunSummary {
        let finished = self.summary.succeeded + self.summary.failed + self.summary.abandoned;
        self.summary.not_attempted = self.summary.pending.saturating_sub(finished);
        self.summary.elapsed_seconds = self.started.elapsed().as_secs_f64();
        self.summary.cancelled = cancelled;
        self.bar.finish_with_message(self.summary.headline());
        self.summary
    }
}
