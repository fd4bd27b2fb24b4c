//! Task executors.
//!
//! Executors and callers talk only through a per-task message stream:
//! zero or more [`Progress`] messages followed by exactly one terminal
//! result. Dropping the [`TaskHandle`] cancels the task; the executor sees
//! the closed stream on its next send and stops.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::task::{OffloadTask, Progress, TaskOutput};
use crate::error::OffloadError;

/// Which executor a task ran on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Inline,
    Worker,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Inline => f.write_str("inline"),
            ExecutorKind::Worker => f.write_str("worker"),
        }
    }
}

/// Message from an executor about one task.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Progress(Progress),
    Done(Result<TaskOutput, OffloadError>),
}

/// Sending half of a task's message stream.
#[derive(Debug)]
pub(crate) struct TaskReporter {
    tx: Sender<WorkerMessage>,
}

impl TaskReporter {
    /// Returns `false` once the handle has been dropped.
    pub(crate) fn progress(&self, progress: Progress) -> bool {
        self.tx.send(WorkerMessage::Progress(progress)).is_ok()
    }

    pub(crate) fn finish(self, result: Result<TaskOutput, OffloadError>) {
        if self.tx.send(WorkerMessage::Done(result)).is_err() {
            tracing::trace!("task result dropped, handle was cancelled");
        }
    }

    /// Run `task` here, streaming progress and the result.
    pub(crate) fn run(self, task: &OffloadTask) {
        let result = task.run(&mut |p| self.progress(p));
        self.finish(result);
    }
}

/// Create the message stream for one task.
pub(crate) fn task_channel(
    task: &'static str,
    executor: ExecutorKind,
) -> (TaskReporter, TaskHandle) {
    let (tx, rx) = mpsc::channel();
    let handle = TaskHandle {
        task,
        executor,
        rx,
        started: Instant::now(),
        last_progress: None,
    };
    (TaskReporter { tx }, handle)
}

/// Receiving half of a task's message stream.
#[derive(Debug)]
pub struct TaskHandle {
    task: &'static str,
    executor: ExecutorKind,
    rx: Receiver<WorkerMessage>,
    started: Instant,
    last_progress: Option<Progress>,
}

impl TaskHandle {
    pub fn task(&self) -> &'static str {
        self.task
    }

    pub fn executor(&self) -> ExecutorKind {
        self.executor
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Latest progress seen so far.
    pub fn progress(&self) -> Option<Progress> {
        self.last_progress
    }

    /// Drain pending messages without blocking. Returns the terminal result
    /// once it has arrived.
    pub fn try_result(&mut self) -> Option<Result<TaskOutput, OffloadError>> {
        loop {
            match self.rx.try_recv() {
                Ok(WorkerMessage::Progress(p)) => self.last_progress = Some(p),
                Ok(WorkerMessage::Done(result)) => return Some(result),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    return Some(Err(OffloadError::WorkerLost { task: self.task }))
                }
            }
        }
    }

    /// Block until the task finishes or `timeout` has passed since it was
    /// submitted. Progress messages are forwarded to `on_progress`.
    pub fn wait(
        mut self,
        timeout: Duration,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<TaskOutput, OffloadError> {
        let deadline = self.started + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(WorkerMessage::Progress(p)) => {
                    self.last_progress = Some(p);
                    on_progress(p);
                }
                Ok(WorkerMessage::Done(result)) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(OffloadError::Timeout {
                        task: self.task,
                        after: timeout,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(OffloadError::WorkerLost { task: self.task })
                }
            }
        }
    }

    /// Give up on the task. A late result is discarded.
    pub fn cancel(self) {
        tracing::debug!(task = self.task, executor = %self.executor, "cancelling offloaded task");
    }
}

/// Runs [`OffloadTask`]s and hands back a [`TaskHandle`].
pub trait TaskExecutor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Start `task`. Fails only if the executor cannot accept work.
    fn submit(&self, task: Arc<OffloadTask>) -> Result<TaskHandle, OffloadError>;
}

/// Runs tasks synchronously on the caller's thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    /// Run `task` and return its result directly.
    pub fn run(
        &self,
        task: &OffloadTask,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<TaskOutput, OffloadError> {
        task.run(&mut |p| {
            on_progress(p);
            true
        })
    }
}

impl TaskExecutor for InlineExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Inline
    }

    fn submit(&self, task: Arc<OffloadTask>) -> Result<TaskHandle, OffloadError> {
        let (reporter, handle) = task_channel(task.name(), ExecutorKind::Inline);
        reporter.run(&task);
        Ok(handle)
    }
}

struct Job {
    task: Arc<OffloadTask>,
    reporter: TaskReporter,
}

/// A dedicated worker thread that runs tasks one at a time.
///
/// The thread exits when the executor is dropped.
pub struct WorkerExecutor {
    jobs: Sender<Job>,
    name: String,
}

impl fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerExecutor").field("name", &self.name).finish()
    }
}

impl WorkerExecutor {
    /// Start the worker thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self, OffloadError> {
        let name = name.into();
        let (jobs, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(rx))
            .map_err(|e| OffloadError::WorkerUnavailable(e.to_string()))?;
        tracing::debug!(worker = %name, "offload worker started");
        Ok(Self { jobs, name })
    }
}

fn worker_loop(rx: Receiver<Job>) {
    while let Ok(Job { task, reporter }) = rx.recv() {
        let _span = tracing::debug_span!("offload", task = task.name()).entered();
        reporter.run(&task);
    }
    tracing::debug!("offload worker exiting");
}

impl TaskExecutor for WorkerExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Worker
    }

    fn submit(&self, task: Arc<OffloadTask>) -> Result<TaskHandle, OffloadError> {
        let name = task.name();
        let (reporter, handle) = task_channel(name, ExecutorKind::Worker);
        self.jobs
            .send(Job { task, reporter })
            .map_err(|_| OffloadError::WorkerLost { task: name })?;
        Ok(handle)
    }
}
