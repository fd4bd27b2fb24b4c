//! Background offload.
//!
//! Heavy tree and stylesheet work is described as an [`OffloadTask`] and
//! handed to the [`Offloader`], which runs small tasks inline and large ones
//! on an isolated worker thread. Both paths report the same
//! [`Progress`] messages and a single terminal result, so callers never need
//! to know which one ran.

mod complexity;
mod css;
mod executor;
mod task;

use std::sync::Arc;

pub use complexity::{analyze, ComplexityReport};
pub use css::minify;
pub use executor::{ExecutorKind, InlineExecutor, TaskExecutor, TaskHandle, WorkerExecutor};
pub use task::{OffloadTask, Progress, TaskOutput};

#[cfg(test)]
pub(crate) use executor::{task_channel, TaskReporter};

use crate::config::OffloadConfig;
use crate::error::OffloadError;

/// Routes tasks to the inline or worker executor.
pub struct Offloader {
    config: OffloadConfig,
    inline: InlineExecutor,
    worker: Option<Arc<dyn TaskExecutor>>,
}

impl std::fmt::Debug for Offloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offloader")
            .field("config", &self.config)
            .field("worker", &self.worker.as_ref().map(|w| w.kind()))
            .finish()
    }
}

impl Offloader {
    /// Create an offloader, starting the worker thread if enabled.
    ///
    /// A worker that fails to start is not an error: every task then runs
    /// inline.
    pub fn new(config: OffloadConfig) -> Self {
        let worker = if config.use_worker {
            match WorkerExecutor::spawn("rewind-offload") {
                Ok(worker) => Some(Arc::new(worker) as Arc<dyn TaskExecutor>),
                Err(e) => {
                    tracing::debug!(error = %e, "offload worker unavailable, running inline");
                    None
                }
            }
        } else {
            None
        };
        Self {
            config,
            inline: InlineExecutor,
            worker,
        }
    }

    /// Use a specific executor for large tasks.
    pub fn with_executor(config: OffloadConfig, worker: Arc<dyn TaskExecutor>) -> Self {
        Self {
            config,
            inline: InlineExecutor,
            worker: Some(worker),
        }
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Executor `task` would be routed to.
    pub fn route(&self, task: &OffloadTask) -> ExecutorKind {
        match &self.worker {
            Some(worker) if task.size() >= self.config.node_threshold => worker.kind(),
            _ => ExecutorKind::Inline,
        }
    }

    /// Start `task` without waiting for it.
    pub fn spawn(&self, task: Arc<OffloadTask>) -> TaskHandle {
        if let (ExecutorKind::Worker, Some(worker)) = (self.route(&task), &self.worker) {
            match worker.submit(Arc::clone(&task)) {
                Ok(handle) => return handle,
                Err(e) => {
                    tracing::debug!(task = task.name(), error = %e, "worker rejected task, running inline")
                }
            }
        }
        let (reporter, handle) = executor::task_channel(task.name(), ExecutorKind::Inline);
        reporter.run(&task);
        handle
    }

    /// Run `task` to completion.
    ///
    /// A worker task that times out or loses its worker is retried inline
    /// once; if the retry also fails the error is [`OffloadError::Degraded`].
    pub fn process(
        &self,
        task: OffloadTask,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<TaskOutput, OffloadError> {
        let task = Arc::new(task);
        let handle = self.spawn(Arc::clone(&task));
        let executor = handle.executor();
        match handle.wait(self.config.timeout(), &mut on_progress) {
            Ok(output) => Ok(output),
            Err(e @ (OffloadError::Timeout { .. } | OffloadError::WorkerLost { .. }))
                if executor == ExecutorKind::Worker =>
            {
                self.retry_inline(&task, e, &mut on_progress)
            }
            Err(e) => Err(e),
        }
    }

    /// Inline fallback after a worker failure.
    pub fn retry_inline(
        &self,
        task: &OffloadTask,
        cause: OffloadError,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<TaskOutput, OffloadError> {
        tracing::warn!(task = task.name(), error = %cause, "worker failed, retrying inline");
        self.inline
            .run(task, on_progress)
            .map_err(|e| OffloadError::Degraded {
                task: task.name(),
                source: Box::new(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::SerializedNode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn config(threshold: usize) -> OffloadConfig {
        OffloadConfig {
            node_threshold: threshold,
            timeout_ms: 50,
            use_worker: true,
        }
    }

    fn forest(n: u64) -> Vec<SerializedNode> {
        (0..n).map(|i| SerializedNode::element(i, "div")).collect()
    }

    /// Accepts tasks and never answers, keeping the reporters alive.
    #[derive(Default)]
    struct Hanging {
        submitted: AtomicUsize,
        held: Mutex<Vec<executor::TaskReporter>>,
    }

    impl TaskExecutor for Hanging {
        fn kind(&self) -> ExecutorKind {
            ExecutorKind::Worker
        }

        fn submit(&self, task: Arc<OffloadTask>) -> Result<TaskHandle, OffloadError> {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            let (reporter, handle) = executor::task_channel(task.name(), ExecutorKind::Worker);
            self.held.lock().unwrap().push(reporter);
            Ok(handle)
        }
    }

    /// Refuses every task.
    struct Refusing;

    impl TaskExecutor for Refusing {
        fn kind(&self) -> ExecutorKind {
            ExecutorKind::Worker
        }

        fn submit(&self, task: Arc<OffloadTask>) -> Result<TaskHandle, OffloadError> {
            Err(OffloadError::WorkerLost { task: task.name() })
        }
    }

    #[test]
    fn routes_by_size() {
        let hanging = Arc::new(Hanging::default());
        let offloader = Offloader::with_executor(config(10), hanging);
        let small = OffloadTask::AnalyzeComplexity { nodes: forest(3) };
        let large = OffloadTask::AnalyzeComplexity { nodes: forest(10) };
        assert_eq!(offloader.route(&small), ExecutorKind::Inline);
        assert_eq!(offloader.route(&large), ExecutorKind::Worker);
    }

    #[test]
    fn small_tasks_never_touch_the_worker() {
        let hanging = Arc::new(Hanging::default());
        let offloader = Offloader::with_executor(config(100), hanging.clone());
        let output = offloader
            .process(OffloadTask::AnalyzeComplexity { nodes: forest(5) }, |_| {})
            .unwrap();
        assert!(matches!(output, TaskOutput::Complexity(ref r) if r.node_count == 5));
        assert_eq!(hanging.submitted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn timeout_falls_back_inline_once() {
        let hanging = Arc::new(Hanging::default());
        let offloader = Offloader::with_executor(config(2), hanging.clone());
        let output = offloader
            .process(OffloadTask::AnalyzeComplexity { nodes: forest(4) }, |_| {})
            .unwrap();
        assert!(matches!(output, TaskOutput::Complexity(ref r) if r.node_count == 4));
        assert_eq!(hanging.submitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_retry_is_degraded() {
        // A meta snapshot has no nodes, so a zero threshold is needed to
        // route it to the worker. It cannot serve as a base either way.
        let offloader = Offloader::with_executor(config(0), Arc::new(Hanging::default()));
        let task = OffloadTask::ReconstructBulk {
            base: rewind_core::Snapshot::meta(0.0),
            mutations: Vec::new(),
            until: rewind_core::Timestamp::ZERO,
        };
        match offloader.process(task, |_| {}) {
            Err(OffloadError::Degraded { task, source }) => {
                assert_eq!(task, "reconstructBulk");
                assert!(matches!(*source, OffloadError::Reconstruct(_)));
            }
            other => panic!("expected degraded, got {other:?}"),
        }
    }

    #[test]
    fn refused_submission_runs_inline() {
        let offloader = Offloader::with_executor(config(1), Arc::new(Refusing));
        let handle = offloader.spawn(Arc::new(OffloadTask::CompressStylesheets {
            sheets: vec!["a { b: c }".into()],
        }));
        assert_eq!(handle.executor(), ExecutorKind::Inline);
        let output = handle.wait(Duration::from_secs(1), |_| {}).unwrap();
        assert!(matches!(output, TaskOutput::Stylesheets { ref sheets, .. } if sheets[0] == "a{b:c}"));
    }

    #[test]
    fn real_worker_runs_large_tasks() {
        let offloader = Offloader::new(OffloadConfig {
            node_threshold: 10,
            timeout_ms: 5_000,
            use_worker: true,
        });
        assert!(offloader.has_worker());
        let mut progress = 0;
        let output = offloader
            .process(OffloadTask::AnalyzeComplexity { nodes: forest(2_500) }, |_| progress += 1)
            .unwrap();
        assert!(matches!(output, TaskOutput::Complexity(ref r) if r.node_count == 2_500));
        assert!(progress >= 2);
    }

    #[test]
    fn disabled_worker_runs_inline() {
        let offloader = Offloader::new(OffloadConfig {
            use_worker: false,
            ..OffloadConfig::default()
        });
        assert!(!offloader.has_worker());
        assert_eq!(
            offloader.route(&OffloadTask::AnalyzeComplexity { nodes: forest(5_000) }),
            ExecutorKind::Inline
        );
    }
}
