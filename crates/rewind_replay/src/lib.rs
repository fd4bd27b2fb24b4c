//! Rewind Replay Engine
//!
//! Reconstructs and plays back recorded browser sessions:
//!
//! - **Reconstruction**: [`ReconstructionEngine`] materializes the nearest full
//!   snapshot and applies mutations up to the requested time, incrementally
//!   when scrubbing forward
//! - **Correlation**: [`CorrelationEngine`] links each error to the
//!   interactions that preceded it and derives root-cause hints
//! - **Playback**: [`PlaybackScheduler`] owns the logical replay clock and the
//!   transport controls, and emits [`PlaybackSignal`]s for the UI
//! - **Offload**: [`Offloader`] runs heavy tree and stylesheet work on an
//!   isolated worker thread, falling back to inline execution
//!
//! # Example
//!
//! ```rust
//! use rewind_core::{RecordedSession, SerializedNode, Snapshot};
//! use rewind_replay::{PlaybackScheduler, PlaybackState, ReplayConfig};
//!
//! let session = RecordedSession::builder("demo")
//!     .snapshot(Snapshot::full(0.0, vec![SerializedNode::element(1, "body")]))
//!     .snapshot(Snapshot::meta(10_000.0))
//!     .build()
//!     .unwrap();
//!
//! let mut scheduler = PlaybackScheduler::new(session, ReplayConfig::testing()).unwrap();
//! scheduler.set_speed(2.0);
//! scheduler.play();
//! for _ in 0..320 {
//!     scheduler.tick(16.0);
//! }
//! assert_eq!(scheduler.state(), PlaybackState::Paused);
//! assert_eq!(scheduler.current_time(), 10_000.0);
//! ```

pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod offload;
pub mod playback;
pub mod tree;

pub use config::{CorrelationConfig, OffloadConfig, PlaybackConfig, ReplayConfig};
pub use correlation::{Correlation, CorrelationEngine};
pub use engine::{
    reconstruct, EngineStats, Reconstruction, ReconstructionEngine, ReconstructionMode,
    ReconstructionWarning,
};
pub use error::{OffloadError, ReconstructError, ReplayError};
pub use offload::{
    ComplexityReport, ExecutorKind, InlineExecutor, OffloadTask, Offloader, Progress,
    TaskExecutor, TaskHandle, TaskOutput, WorkerExecutor,
};
pub use playback::{
    Discard, Insights, PlaybackDriver, PlaybackScheduler, PlaybackSignal, PlaybackState,
    ReplayClock, SignalSink,
};
pub use tree::{LiveNode, LiveTree};
