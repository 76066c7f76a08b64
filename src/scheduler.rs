use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::task::{ErrorKind, Task, TaskError, TaskResult};
use crate::worker::{Worker, WorkerFactory};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: usize,
    pub task_timeout: Duration,
    /// Extra attempts for crashes and transient errors.
    pub retries: u32,
    pub in_flight_window: usize,
    pub grace_period: Duration,
}

impl From<&PipelineConfig> for PoolSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers,
            task_timeout: config.task_timeout,
            retries: config.retries,
            in_flight_window: config.in_flight_window,
            grace_period: config.grace_period,
        }
    }
}

/// What the pool reports, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    Dispatched(Task),
    Completed(TaskResult),
    /// Given up on during cancellation; not persisted, so the next run retries it.
    Abandoned(Task),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub admitted: usize,
    pub completed: usize,
    pub abandoned: usize,
    pub workers_started: usize,
    pub crashes: usize,
    pub retries: usize,
}

impl PoolStats {
    fn merge(&mut self, other: PoolStats) {
        self.completed += other.completed;
        self.abandoned += other.abandoned;
        self.workers_started += other.workers_started;
        self.crashes += other.crashes;
        self.retries += other.retries;
    }
}

/// Fixed-size pool of workers fed from a bounded queue.
pub struct Scheduler<F: WorkerFactory> {
    factory: Arc<F>,
    settings: PoolSettings,
}

impl<F: WorkerFactory> Scheduler<F> {
    pub fn new(factory: F, settings: PoolSettings) -> Self {
        Self {
            factory: Arc::new(factory),
            settings,
        }
    }

    /// Run every task in `pending`, sending events as they happen. Returns
    /// once all admitted tasks are finished or abandoned.
    ///
    /// Admission blocks while `in_flight_window` tasks are queued, and while
    /// `events` is full.
    pub async fn run(
        &self,
        pending: Vec<Task>,
        events: mpsc::Sender<PoolEvent>,
        cancel: CancellationToken,
    ) -> PoolStats {
        let (task_tx, task_rx) = async_channel::bounded::<Task>(self.settings.in_flight_window.max(1));
        let workers = self.settings.workers.max(1).min(pending.len().max(1));

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    self.factory.clone(),
                    task_rx.clone(),
                    events.clone(),
                    cancel.clone(),
                    self.settings.clone(),
                ))
            })
            .collect();
        drop(task_rx);
        drop(events);

        let mut stats = PoolStats::default();
        for task in pending {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, no longer admitting tasks");
                    break;
                }
                sent = task_tx.send(task) => {
                    if sent.is_err() {
                        break;
                    }
                    stats.admitted += 1;
                }
            }
        }
        task_tx.close();

        for handle in handles {
            match handle.await {
                Ok(loop_stats) => stats.merge(loop_stats),
                Err(e) => error!("Worker loop failed: {}", e),
            }
        }

        stats
    }
}

async fn worker_loop<F: WorkerFactory>(
    id: usize,
    factory: Arc<F>,
    tasks: async_channel::Receiver<Task>,
    events: mpsc::Sender<PoolEvent>,
    cancel: CancellationToken,
    settings: PoolSettings,
) -> PoolStats {
    let mut slot: Option<F::Worker> = None;
    let mut stats = PoolStats::default();

    loop {
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = tasks.recv() => match next {
                Ok(task) => task,
                Err(_) => break,
            },
        };

        if events.send(PoolEvent::Dispatched(task.clone())).await.is_err() {
            break;
        }

        let event = match run_task(id, &*factory, &mut slot, &task, &settings, &cancel, &mut stats).await {
            Some(result) => {
                stats.completed += 1;
                PoolEvent::Completed(result)
            }
            None => {
                stats.abandoned += 1;
                PoolEvent::Abandoned(task)
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    if let Some(worker) = slot.take() {
        worker.shutdown().await;
    }
    stats
}

/// Run one task with timeout and retries. `None` means it was abandoned
/// during cancellation.
async fn run_task<F: WorkerFactory>(
    id: usize,
    factory: &F,
    slot: &mut Option<F::Worker>,
    task: &Task,
    settings: &PoolSettings,
    cancel: &CancellationToken,
    stats: &mut PoolStats,
) -> Option<TaskResult> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        let can_retry = attempt < settings.retries && !cancel.is_cancelled();

        let mut worker = match slot.take() {
            Some(worker) => worker,
            None => match factory.spawn(id).await {
                Ok(worker) => {
                    stats.workers_started += 1;
                    worker
                }
                Err(fault) => {
                    error!("Worker {} could not start: {}", id, fault);
                    if can_retry {
                        attempt += 1;
                        stats.retries += 1;
                        continue;
                    }
                    return Some(TaskResult::failed(
                        task,
                        None,
                        TaskError::new(ErrorKind::WorkerCrash, fault.to_string()),
                        start.elapsed(),
                    ));
                }
            },
        };

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(settings.task_timeout, worker.execute(task)) => Some(outcome),
            _ = grace_expired(cancel, settings.grace_period) => None,
        };

        let Some(outcome) = outcome else {
            warn!("Abandoning {} after cancellation grace period", task);
            return None;
        };

        match outcome {
            Ok(Ok(result)) => {
                *slot = Some(worker);
                let transient = result.error.as_ref().is_some_and(|e| e.transient);
                if transient && can_retry {
                    attempt += 1;
                    stats.retries += 1;
                    warn!(
                        "Retrying {} after transient error (attempt {}/{})",
                        task,
                        attempt,
                        settings.retries
                    );
                    continue;
                }
                return Some(result);
            }
            Ok(Err(fault)) => {
                stats.crashes += 1;
                warn!("Worker {} lost while running {}: {}", id, task, fault);
                drop(worker);
                if can_retry {
                    attempt += 1;
                    stats.retries += 1;
                    continue;
                }
                return Some(TaskResult::failed(
                    task,
                    None,
                    TaskError::new(ErrorKind::WorkerCrash, fault.to_string()),
                    start.elapsed(),
                ));
            }
            Err(_) => {
                warn!("{} timed out after {:?}, recycling worker {}", task, settings.task_timeout, id);
                drop(worker);
                return Some(TaskResult::failed(
                    task,
                    None,
                    TaskError::new(
                        ErrorKind::Timeout,
                        format!("exceeded {:?}", settings.task_timeout),
                    ),
                    start.elapsed(),
                ));
            }
        }
    }
}

async fn grace_expired(cancel: &CancellationToken, grace: Duration) {
    cancel.cancelled().await;
    tokio::time::sleep(grace).await;
}
