//! Executors for single tasks.
//!
//! A [`Worker`] owns whatever per-worker resources its engine needs for as
//! long as it lives. The scheduler drops a worker after a crash or timeout
//! and asks the factory for a fresh one.
//!
//! Process workers speak a line protocol on stdin/stdout: one
//! [`WorkerHello`], then one JSON [`Task`] per line, each answered by one JSON
//! [`TaskResult`] line.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::future::Future;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::EngineConfig;
use crate::error::{panic_message, CollaboratorError};
use crate::extractor::ExtractionEngine;
use crate::ocr::{PopplerRenderer, TesseractOcr};
use crate::pdf::PdfProcessor;
use crate::task::{Task, TaskResult};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerFault {
    #[error("worker crashed: {0}")]
    Crashed(String),
    #[error("worker failed to start: {0}")]
    Spawn(String),
    #[error("worker protocol error: {0}")]
    Protocol(String),
}

pub trait Worker: Send + 'static {
    fn execute(&mut self, task: &Task) -> impl Future<Output = Result<TaskResult, WorkerFault>> + Send;

    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

pub trait WorkerFactory: Send + Sync + 'static {
    type Worker: Worker;

    fn spawn(&self, worker_id: usize) -> impl Future<Output = Result<Self::Worker, WorkerFault>> + Send;
}

/// First line sent to every worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHello {
    pub root: PathBuf,
    pub engine: EngineConfig,
}

/// Engine backed by lopdf, pdftoppm and tesseract.
pub fn build_default_engine(hello: &WorkerHello) -> Result<ExtractionEngine, CollaboratorError> {
    Ok(ExtractionEngine::new(
        hello.root.clone(),
        hello.engine.clone(),
        Box::new(PdfProcessor::new()),
        Box::new(PopplerRenderer::new()?),
        Box::new(TesseractOcr),
    ))
}

/// Runs each task on a blocking thread. A panic in the engine counts as a
/// crash; a hung task can be abandoned but its thread cannot be reclaimed.
pub struct InProcessWorker {
    engine: Arc<ExtractionEngine>,
}

impl Worker for InProcessWorker {
    async fn execute(&mut self, task: &Task) -> Result<TaskResult, WorkerFault> {
        let engine = self.engine.clone();
        let task = task.clone();
        tokio::task::spawn_blocking(move || engine.extract(&task))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    WorkerFault::Crashed(panic_message(e.into_panic()))
                } else {
                    WorkerFault::Crashed("task cancelled".to_string())
                }
            })
    }

    async fn shutdown(self) {}
}

pub struct InProcessFactory<B> {
    build: B,
}

impl<B> InProcessFactory<B>
where
    B: Fn(usize) -> Result<ExtractionEngine, CollaboratorError> + Send + Sync + 'static,
{
    pub fn new(build: B) -> Self {
        Self { build }
    }
}

impl<B> WorkerFactory for InProcessFactory<B>
where
    B: Fn(usize) -> Result<ExtractionEngine, CollaboratorError> + Send + Sync + 'static,
{
    type Worker = InProcessWorker;

    async fn spawn(&self, worker_id: usize) -> Result<InProcessWorker, WorkerFault> {
        let engine = (self.build)(worker_id).map_err(|e| WorkerFault::Spawn(e.message))?;
        Ok(InProcessWorker {
            engine: Arc::new(engine),
        })
    }
}

pub struct ProcessWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ProcessWorker {
    async fn send_line<T: Serialize>(&mut self, value: &T) -> Result<(), WorkerFault> {
        let mut line = serde_json::to_string(value).map_err(|e| WorkerFault::Protocol(e.to_string()))?;
        line.push('\n');

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(WorkerFault::Crashed("stdin already closed".to_string()));
        };
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| WorkerFault::Crashed(format!("cannot write to worker: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| WorkerFault::Crashed(format!("cannot write to worker: {}", e)))
    }

    async fn exit_description(&mut self) -> String {
        match tokio::time::timeout(Duration::from_millis(500), self.child.wait()).await {
            Ok(Ok(status)) => format!("worker exited with {}", status),
            Ok(Err(e)) => format!("worker closed its output ({})", e),
            Err(_) => "worker closed its output".to_string(),
        }
    }
}

impl Worker for ProcessWorker {
    async fn execute(&mut self, task: &Task) -> Result<TaskResult, WorkerFault> {
        self.send_line(task).await?;

        match self.stdout.next_line().await {
            Ok(Some(line)) => serde_json::from_str(&line)
                .map_err(|e| WorkerFault::Crashed(format!("unreadable reply ({}): {}", e, line))),
            Ok(None) => Err(WorkerFault::Crashed(self.exit_description().await)),
            Err(e) => Err(WorkerFault::Crashed(format!("cannot read from worker: {}", e))),
        }
    }

    async fn shutdown(mut self) {
        // closing stdin ends the worker's request loop
        drop(self.stdin.take());
        match tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) => debug!("Worker exited with {}", status),
            _ => {
                warn!("Worker did not exit after stdin closed, killing it");
                let _ = self.child.kill().await;
            }
        }
    }
}

/// Spawns `program args...` per worker, by default this binary's hidden
/// `worker` subcommand.
pub struct ProcessWorkerFactory {
    program: PathBuf,
    args: Vec<OsString>,
    hello: WorkerHello,
}

impl ProcessWorkerFactory {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>, hello: WorkerHello) -> Self {
        Self {
            program: program.into(),
            args,
            hello,
        }
    }

    pub fn current_exe(hello: WorkerHello) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec![OsString::from("worker")], hello))
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    type Worker = ProcessWorker;

    async fn spawn(&self, worker_id: usize) -> Result<ProcessWorker, WorkerFault> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // keep terminal Ctrl-C away from workers; the parent decides what to abandon
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| WorkerFault::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerFault::Spawn("worker stdout not captured".to_string()))?;

        let mut worker = ProcessWorker {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };
        worker.send_line(&self.hello).await?;

        debug!("Started worker {} (pid {:?})", worker_id, worker.child.id());
        Ok(worker)
    }
}

/// Request loop run inside a worker process. Returns when `input` closes.
pub fn serve<R, W, B>(mut input: R, mut output: W, build: B) -> Result<(), WorkerFault>
where
    R: BufRead,
    W: Write,
    B: FnOnce(&WorkerHello) -> Result<ExtractionEngine, CollaboratorError>,
{
    let mut line = String::new();
    if input
        .read_line(&mut line)
        .map_err(|e| WorkerFault::Protocol(e.to_string()))?
        == 0
    {
        return Err(WorkerFault::Protocol("no hello received".to_string()));
    }

    let hello: WorkerHello =
        serde_json::from_str(line.trim()).map_err(|e| WorkerFault::Protocol(format!("bad hello: {}", e)))?;
    let engine = build(&hello).map_err(|e| WorkerFault::Spawn(e.message))?;
    info!("Worker {} ready (root {})", std::process::id(), hello.root.display());

    loop {
        line.clear();
        let read = input
            .read_line(&mut line)
            .map_err(|e| WorkerFault::Protocol(e.to_string()))?;
        if read == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let task: Task =
            serde_json::from_str(line.trim()).map_err(|e| WorkerFault::Protocol(format!("bad task: {}", e)))?;
        let result = engine.extract(&task);

        serde_json::to_writer(&mut output, &result).map_err(|e| WorkerFault::Protocol(e.to_string()))?;
        output
            .write_all(b"\n")
            .and_then(|_| output.flush())
            .map_err(|e| WorkerFault::Protocol(e.to_string()))?;
    }

    Ok(())
}

/// Serve on this process's stdin/stdout with the default engine.
pub fn serve_stdio() -> Result<(), WorkerFault> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(stdin.lock(), stdout.lock(), build_default_engine)
}
