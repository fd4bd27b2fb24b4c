//! Playback scheduler: transport controls over one replay session.

use std::fmt;
use std::sync::Arc;

use rewind_core::{InteractionEvent, RecordedSession};
use serde::Serialize;

use super::clock::ReplayClock;
use super::insights::{InsightTracker, Insights};
use super::signals::{PlaybackSignal, SignalSink};
use crate::config::ReplayConfig;
use crate::correlation::{Correlation, CorrelationEngine};
use crate::engine::{EngineStats, ReconstructionEngine, ReconstructionMode};
use crate::error::{OffloadError, ReconstructError, ReplayError};
use crate::offload::{ExecutorKind, OffloadTask, Offloader, TaskHandle, TaskOutput};
use crate::tree::LiveTree;

/// Transport state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    /// Transient while a seek resynchronizes the tree.
    Seeking,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Seeking => "seeking",
        };
        f.write_str(s)
    }
}

/// Complexity analysis running for one reconstruction epoch.
struct PendingAnalysis {
    epoch: u64,
    task: Arc<OffloadTask>,
    handle: TaskHandle,
}

/// Owns the logical replay clock and drives reconstruction, the active
/// interaction and the insight counters from it.
///
/// Time only advances through [`tick`](Self::tick), so playback is fully
/// deterministic under a test harness. [`PlaybackDriver`](super::PlaybackDriver)
/// calls `tick` from a real timer.
pub struct PlaybackScheduler<S = Vec<PlaybackSignal>> {
    session: RecordedSession,
    config: ReplayConfig,
    clock: ReplayClock,
    state: PlaybackState,
    engine: ReconstructionEngine,
    correlation: CorrelationEngine,
    offloader: Offloader,
    insights: InsightTracker,
    pending: Option<PendingAnalysis>,
    /// Relative times of `session.interactions`, same order.
    interaction_times: Vec<f64>,
    /// Index into `session.interactions`.
    active: Option<usize>,
    fault: Option<String>,
    sink: S,
}

impl PlaybackScheduler {
    /// Create a scheduler that buffers its signals in a `Vec`.
    pub fn new(session: RecordedSession, config: ReplayConfig) -> Result<Self, ReplayError> {
        Self::with_sink(session, config, Vec::new())
    }

    /// Drain buffered signals.
    pub fn take_signals(&mut self) -> Vec<PlaybackSignal> {
        std::mem::take(&mut self.sink)
    }
}

impl<S: SignalSink> PlaybackScheduler<S> {
    pub fn with_sink(
        session: RecordedSession,
        config: ReplayConfig,
        sink: S,
    ) -> Result<Self, ReplayError> {
        let offloader = Offloader::new(config.offload.clone());
        Self::with_offloader(session, config, offloader, sink)
    }

    /// Create a scheduler with an explicit offloader.
    ///
    /// Fails if the session has no usable base snapshot.
    pub fn with_offloader(
        session: RecordedSession,
        config: ReplayConfig,
        offloader: Offloader,
        sink: S,
    ) -> Result<Self, ReplayError> {
        let playback = &config.playback;
        let mut clock = ReplayClock::new(session.duration_ms())
            .with_speed_range(playback.min_speed, playback.max_speed);
        if !clock.set_speed(playback.initial_speed) {
            tracing::warn!(speed = playback.initial_speed, "ignoring invalid initial speed");
        }

        let mut correlation = CorrelationEngine::new(config.correlation.clone());
        correlation.extend(
            session.interactions.iter().cloned(),
            session.errors.iter().cloned(),
            session.network.iter().cloned(),
        );

        let interaction_times = session
            .interactions
            .iter()
            .map(|i| session.relative(i.timestamp))
            .collect();

        let mut scheduler = Self {
            engine: ReconstructionEngine::new(session.snapshots.clone()),
            insights: InsightTracker::new(&session),
            session,
            config,
            clock,
            state: PlaybackState::Stopped,
            correlation,
            offloader,
            pending: None,
            interaction_times,
            active: None,
            fault: None,
            sink,
        };

        scheduler.reconstruct_current()?;
        scheduler.update_active();
        scheduler.insights.update(0.0);

        tracing::debug!(
            session = %scheduler.session.session_id,
            duration_ms = scheduler.clock.duration(),
            snapshots = scheduler.session.snapshots.len(),
            events = scheduler.session.event_count(),
            "playback scheduler ready"
        );
        Ok(scheduler)
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// `stopped | paused -> playing`.
    pub fn play(&mut self) {
        if matches!(self.state, PlaybackState::Stopped | PlaybackState::Paused) {
            self.clock.play();
            self.set_state(PlaybackState::Playing);
        }
    }

    /// `playing -> paused`, keeping the current time.
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.clock.pause();
            self.set_state(PlaybackState::Paused);
        }
    }

    /// Any state `-> stopped`, back to time 0.
    pub fn stop(&mut self) {
        self.cancel_pending();
        self.clock.reset();
        self.set_state(PlaybackState::Stopped);
        self.resync();
    }

    /// Jump to `ms` since session start, clamped to `[0, duration]`.
    ///
    /// The playing/paused status is kept, except that landing on the end
    /// while playing pauses.
    pub fn seek(&mut self, ms: f64) {
        let resume = self.state;
        self.state = PlaybackState::Seeking;
        self.clock.seek(ms);
        tracing::trace!(requested = ms, position = self.clock.position(), "seek");
        self.resync();
        self.state = resume;

        if resume == PlaybackState::Playing && (self.clock.is_at_end() || self.fault.is_some()) {
            self.clock.pause();
            self.set_state(PlaybackState::Paused);
        }
    }

    /// Change the speed multiplier. Takes effect on the next tick.
    ///
    /// Non-finite or non-positive values are ignored and return `false`.
    pub fn set_speed(&mut self, speed: f64) -> bool {
        if !self.clock.set_speed(speed) {
            tracing::debug!(speed, "ignoring invalid playback speed");
            return false;
        }
        self.sink.emit(PlaybackSignal::SpeedChanged(self.clock.speed()));
        true
    }

    /// Seek to the time of an interaction, error, network or navigation
    /// event. Unknown ids are ignored.
    pub fn skip_to_event(&mut self, id: &str) -> bool {
        match self.session.event_timestamp(id) {
            Some(ts) => {
                let target = self.session.relative(ts);
                self.seek(target);
                true
            }
            None => {
                tracing::debug!(id, "skip_to_event: unknown event id");
                false
            }
        }
    }

    pub fn skip_forward(&mut self, ms: f64) {
        if ms.is_finite() {
            self.seek(self.clock.position() + ms);
        }
    }

    pub fn skip_backward(&mut self, ms: f64) {
        if ms.is_finite() {
            self.seek(self.clock.position() - ms);
        }
    }

    /// Skip forward by the configured step.
    pub fn step_forward(&mut self) {
        self.skip_forward(self.config.playback.skip_step_ms);
    }

    /// Skip backward by the configured step.
    pub fn step_backward(&mut self) {
        self.skip_backward(self.config.playback.skip_step_ms);
    }

    /// Advance the clock by `delta_ms` of real time while playing.
    ///
    /// Also collects finished background work, in any state.
    pub fn tick(&mut self, delta_ms: f64) {
        self.poll_offload();
        if self.state != PlaybackState::Playing {
            return;
        }

        let before = self.clock.position();
        let finished = self.clock.advance(delta_ms);
        if self.clock.position() == before && !finished {
            return;
        }
        self.resync();

        if finished || !self.clock.is_running() {
            self.set_state(PlaybackState::Paused);
        }
        if finished {
            tracing::debug!(position = self.clock.position(), "playback reached the end");
            self.sink.emit(PlaybackSignal::Finished);
        }
    }

    /// One tick of the configured interval.
    pub fn advance(&mut self) {
        self.tick(self.config.playback.tick_interval_ms);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Milliseconds since session start.
    pub fn current_time(&self) -> f64 {
        self.clock.position()
    }

    pub fn duration(&self) -> f64 {
        self.clock.duration()
    }

    pub fn speed(&self) -> f64 {
        self.clock.speed()
    }

    pub fn progress(&self) -> f64 {
        self.clock.progress()
    }

    /// The live tree at the current time.
    pub fn tree(&self) -> Option<&LiveTree> {
        self.engine.tree()
    }

    pub fn insights(&self) -> &Insights {
        self.insights.insights()
    }

    pub fn correlations(&self) -> &[Correlation] {
        self.correlation.correlate()
    }

    /// Register events that arrive after construction.
    pub fn correlation_mut(&mut self) -> &mut CorrelationEngine {
        &mut self.correlation
    }

    pub fn active_interaction(&self) -> Option<&InteractionEvent> {
        self.active.and_then(|i| self.session.interactions.get(i))
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Reconstruction epoch; bumped on every rebuild.
    pub fn epoch(&self) -> u64 {
        self.engine.epoch()
    }

    /// Whether a background analysis is outstanding.
    pub fn has_pending_task(&self) -> bool {
        self.pending.is_some()
    }

    /// Last reconstruction fault, cleared by the next good reconstruction.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn session(&self) -> &RecordedSession {
        &self.session
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn set_state(&mut self, to: PlaybackState) {
        if self.state != to {
            let from = self.state;
            self.state = to;
            tracing::debug!(%from, %to, "playback state changed");
            self.sink.emit(PlaybackSignal::StateChanged { from, to });
        }
    }

    /// Bring the tree, the active interaction and the insights in line with
    /// the clock.
    fn resync(&mut self) {
        if let Err(e) = self.reconstruct_current() {
            tracing::error!(error = %e, at = self.clock.position(), "reconstruction failed");
            let message = e.to_string();
            self.fault = Some(message.clone());
            self.clock.pause();
            self.sink.emit(PlaybackSignal::Fault(message));
        }
        self.poll_offload();
        self.update_active();
        self.insights.update(self.clock.position());
        self.sink.emit(PlaybackSignal::Time {
            current_ms: self.clock.position(),
            duration_ms: self.clock.duration(),
        });
    }

    fn reconstruct_current(&mut self) -> Result<(), ReconstructError> {
        let at = self.session.absolute(self.clock.position());
        let outcome = self.engine.reconstruct(at)?;
        self.fault = None;

        let warnings = self.engine.take_warnings();
        if !warnings.is_empty() {
            self.insights.record_warnings(warnings.len());
            for warning in warnings {
                self.sink.emit(PlaybackSignal::ReconstructionWarning(warning));
            }
        }

        if outcome.mode == ReconstructionMode::Rebuilt {
            self.on_rebuild(outcome.epoch);
        }
        Ok(())
    }

    /// A new base window is live: refresh descriptors and start analyzing it.
    fn on_rebuild(&mut self, epoch: u64) {
        if let Some(tree) = self.engine.tree() {
            self.correlation.describe_targets(tree);
        }
        self.cancel_pending();
        self.insights.set_complexity(None);

        let Some(base) = self.engine.base_snapshot() else {
            return;
        };
        let task = Arc::new(OffloadTask::AnalyzeComplexity {
            nodes: base.nodes.clone(),
        });
        let handle = self.offloader.spawn(Arc::clone(&task));
        tracing::trace!(epoch, executor = %handle.executor(), "analyzing base window");
        self.pending = Some(PendingAnalysis {
            epoch,
            task,
            handle,
        });
        self.poll_offload();
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.cancel();
        }
    }

    /// Collect a finished analysis. Results for a superseded epoch are dropped.
    fn poll_offload(&mut self) {
        let timeout = self.offloader.config().timeout();
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let result = match pending.handle.try_result() {
            Some(result) => result,
            None if pending.handle.elapsed() >= timeout => Err(OffloadError::Timeout {
                task: pending.handle.task(),
                after: timeout,
            }),
            None => return,
        };
        let Some(pending) = self.pending.take() else {
            return;
        };

        if pending.epoch != self.engine.epoch() {
            tracing::trace!(
                epoch = pending.epoch,
                current = self.engine.epoch(),
                "discarding stale analysis"
            );
            return;
        }

        let result = match result {
            Err(e @ (OffloadError::Timeout { .. } | OffloadError::WorkerLost { .. }))
                if pending.handle.executor() == ExecutorKind::Worker =>
            {
                self.offloader.retry_inline(&pending.task, e, &mut |_| {})
            }
            other => other,
        };

        match result {
            Ok(TaskOutput::Complexity(report)) => self.insights.set_complexity(Some(report)),
            Ok(other) => tracing::debug!(?other, "unexpected analysis output"),
            Err(e) => {
                tracing::warn!(error = %e, "complexity analysis failed");
                self.sink.emit(PlaybackSignal::Degraded {
                    task: pending.task.name(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Emit affordance signals when the nearest interaction changes.
    fn update_active(&mut self) {
        let nearest = nearest_within(
            &self.interaction_times,
            self.clock.position(),
            self.config.playback.active_tolerance_ms,
        );
        if nearest == self.active {
            return;
        }
        self.active = nearest;

        let Some(event) = nearest.and_then(|i| self.session.interactions.get(i)) else {
            self.sink.emit(PlaybackSignal::ActiveInteraction(None));
            return;
        };
        self.sink.emit(PlaybackSignal::ActiveInteraction(Some(event.clone())));
        if let Some(target) = event.target_id {
            if self.engine.tree().is_some_and(|t| t.contains(target)) {
                self.sink.emit(PlaybackSignal::HighlightTarget(target));
            }
        }
        if let Some((x, y)) = event.position() {
            self.sink.emit(PlaybackSignal::CursorPosition { x, y });
        }
    }
}

/// Index of the time in `times` (sorted) nearest `now`, if within `tolerance`.
fn nearest_within(times: &[f64], now: f64, tolerance: f64) -> Option<usize> {
    let split = times.partition_point(|&t| t < now);
    [split.checked_sub(1), Some(split)]
        .into_iter()
        .flatten()
        .filter_map(|i| times.get(i).map(|&t| (i, (t - now).abs())))
        .filter(|&(_, distance)| distance <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}
