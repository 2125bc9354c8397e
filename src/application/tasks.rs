//! Fire-and-forget background work for the paste handler.
//!
//! Jobs are executed by a fixed pool of worker tasks, each draining its own
//! bounded queue. Every job for a given paste lands on the same worker, so a
//! cache refill and a later removal of the same paste run in dispatch order.
//! What happens to a failed job is decided by a [`FailurePolicy`]: cache
//! failures are logged and dropped, storage failures are escalated to the host
//! through a [`FaultReceiver`]. A panicking job counts as a failed one.

use std::any::Any;
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::application::error::HandlerStorageFailure;
use crate::application::repos::{CacheError, StorageError};
use crate::domain::paste::PasteId;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const METRIC_TASK_FAILED: &str = "pastebin_task_failed_total";
const METRIC_TASK_DROPPED: &str = "pastebin_task_dropped_total";

#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Number of worker tasks draining the queue.
    pub workers: usize,
    /// Jobs that may wait across all worker queues before dispatch starts
    /// dropping cache work. Split evenly between workers.
    pub queue_capacity: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl From<&crate::config::TaskSettings> for TaskConfig {
    fn from(settings: &crate::config::TaskSettings) -> Self {
        Self {
            workers: settings.workers.get(),
            queue_capacity: settings.queue_capacity.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Cache,
    Storage,
}

impl TaskKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Storage => "storage",
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TaskFailure {
    fn panicked(kind: TaskKind, payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let message = format!("task panicked: {message}");
        match kind {
            TaskKind::Cache => Self::Cache(CacheError::backend(message)),
            TaskKind::Storage => Self::Storage(StorageError::unavailable(message)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Log at `warn` and forget.
    Log,
    /// Log at `error` and forward to the host's fault channel.
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub cache: FailureAction,
    pub storage: FailureAction,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            cache: FailureAction::Log,
            storage: FailureAction::Escalate,
        }
    }
}

/// A background failure handed to the host for supervision.
#[derive(Debug, Error)]
pub enum BackgroundFault {
    #[error(transparent)]
    Storage(#[from] HandlerStorageFailure),
    #[error("background `{operation}` for paste `{paste_id}` failed in cache")]
    Cache {
        operation: &'static str,
        paste_id: PasteId,
        #[source]
        source: CacheError,
    },
}

/// Host end of the escalation channel.
pub struct FaultReceiver {
    inner: mpsc::UnboundedReceiver<BackgroundFault>,
}

impl FaultReceiver {
    pub async fn recv(&mut self) -> Option<BackgroundFault> {
        self.inner.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BackgroundFault> {
        self.inner.try_recv().ok()
    }
}

struct Job {
    kind: TaskKind,
    label: &'static str,
    paste_id: PasteId,
    future: BoxFuture<'static, Result<(), TaskFailure>>,
}

struct Shared {
    policy: FailurePolicy,
    faults: mpsc::UnboundedSender<BackgroundFault>,
    pending: AtomicUsize,
    idle: Notify,
}

/// Cloneable handle used to dispatch background jobs.
#[derive(Clone)]
pub struct BackgroundTasks {
    queues: Arc<[mpsc::Sender<Job>]>,
    shared: Arc<Shared>,
}

impl BackgroundTasks {
    /// Spawn the worker pool on the current Tokio runtime.
    pub fn start(config: &TaskConfig, policy: FailurePolicy) -> (Self, FaultReceiver) {
        let workers = config.workers.max(1);
        let per_worker = (config.queue_capacity / workers).max(1);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            policy,
            faults: fault_tx,
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let mut queues = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (sender, mut receiver) = mpsc::channel::<Job>(per_worker);
            queues.push(sender);
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                while let Some(job) = receiver.recv().await {
                    run_job(&shared, job).await;
                }
                debug!(worker, "Background worker stopping: queue closed");
            });
        }

        let tasks = Self {
            queues: queues.into(),
            shared,
        };
        (tasks, FaultReceiver { inner: fault_rx })
    }

    fn queue_for(&self, paste_id: &PasteId) -> &mpsc::Sender<Job> {
        let mut hasher = DefaultHasher::new();
        paste_id.hash(&mut hasher);
        let index = (hasher.finish() % self.queues.len() as u64) as usize;
        &self.queues[index]
    }

    /// Dispatch a cache job; it may be dropped under back-pressure.
    pub fn schedule_cache<F>(&self, label: &'static str, paste_id: PasteId, future: F)
    where
        F: Future<Output = Result<(), CacheError>> + Send + 'static,
    {
        self.schedule(
            TaskKind::Cache,
            label,
            paste_id,
            future.map(|result| result.map_err(TaskFailure::from)).boxed(),
        );
    }

    /// Dispatch a storage job; it always runs, even when the queue is saturated.
    /// An overflowing storage job runs outside the pool and loses its ordering
    /// against earlier jobs for the same paste.
    pub fn schedule_storage<F>(&self, label: &'static str, paste_id: PasteId, future: F)
    where
        F: Future<Output = Result<(), StorageError>> + Send + 'static,
    {
        self.schedule(
            TaskKind::Storage,
            label,
            paste_id,
            future.map(|result| result.map_err(TaskFailure::from)).boxed(),
        );
    }

    fn schedule(
        &self,
        kind: TaskKind,
        label: &'static str,
        paste_id: PasteId,
        future: BoxFuture<'static, Result<(), TaskFailure>>,
    ) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            kind,
            label,
            paste_id,
            future,
        };

        let job = match self.queue_for(&job.paste_id).try_send(job) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(job))
            | Err(mpsc::error::TrySendError::Closed(job)) => job,
        };

        match job.kind {
            TaskKind::Cache => {
                warn!(
                    task = job.label,
                    paste_id = %job.paste_id,
                    "Background queue saturated; dropping cache task"
                );
                counter!(METRIC_TASK_DROPPED, "kind" => job.kind.as_str()).increment(1);
                finish(&self.shared);
            }
            TaskKind::Storage => {
                warn!(
                    task = job.label,
                    paste_id = %job.paste_id,
                    "Background queue saturated; running storage task outside the pool"
                );
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move { run_job(&shared, job).await });
            }
        }
    }

    /// Jobs dispatched but not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every dispatched job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn run_job(shared: &Shared, job: Job) {
    let Job {
        kind,
        label,
        paste_id,
        future,
    } = job;

    let span = info_span!(
        "background_task",
        task = label,
        kind = kind.as_str(),
        paste_id = %paste_id
    );
    let outcome = match AssertUnwindSafe(future.instrument(span))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => Err(TaskFailure::panicked(kind, payload.as_ref())),
    };

    if let Err(failure) = outcome {
        counter!(METRIC_TASK_FAILED, "kind" => kind.as_str()).increment(1);
        handle_failure(shared, label, paste_id, failure);
    }

    finish(shared);
}

fn handle_failure(shared: &Shared, label: &'static str, paste_id: PasteId, failure: TaskFailure) {
    let (action, fault) = match failure {
        TaskFailure::Cache(source) => (
            shared.policy.cache,
            BackgroundFault::Cache {
                operation: label,
                paste_id,
                source,
            },
        ),
        TaskFailure::Storage(source) => (
            shared.policy.storage,
            BackgroundFault::Storage(HandlerStorageFailure {
                operation: label,
                paste_id,
                source,
            }),
        ),
    };

    match action {
        FailureAction::Log => {
            warn!(error = %fault, detail = ?fault, "Background task failed; ignoring");
        }
        FailureAction::Escalate => {
            error!(error = %fault, detail = ?fault, "Background task failed; escalating");
            // The host may have dropped its receiver; the error log above still stands.
            let _ = shared.faults.send(fault);
        }
    }
}

fn finish(shared: &Shared) {
    if shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.idle.notify_waiters();
    }
}
