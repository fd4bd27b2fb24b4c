//! Output signals for the visual affordance and dashboard layers.

use rewind_core::{InteractionEvent, NodeId};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::PlaybackState;
use crate::engine::ReconstructionWarning;

/// Something the UI should react to.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "signal", content = "data", rename_all = "camelCase")]
pub enum PlaybackSignal {
    StateChanged {
        from: PlaybackState,
        to: PlaybackState,
    },
    /// `currentTime` moved.
    Time { current_ms: f64, duration_ms: f64 },
    SpeedChanged(f64),
    /// The interaction nearest the clock, or `None` when it left the window.
    ActiveInteraction(Option<InteractionEvent>),
    HighlightTarget(NodeId),
    CursorPosition { x: f64, y: f64 },
    ReconstructionWarning(ReconstructionWarning),
    /// Background work failed even after the inline retry.
    Degraded { task: &'static str, reason: String },
    /// The session can no longer be reconstructed.
    Fault(String),
    /// Playback reached the end of the session.
    Finished,
}

impl PlaybackSignal {
    /// Wire name, as used for the `signal` tag.
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackSignal::StateChanged { .. } => "stateChanged",
            PlaybackSignal::Time { .. } => "time",
            PlaybackSignal::SpeedChanged(_) => "speedChanged",
            PlaybackSignal::ActiveInteraction(_) => "activeInteraction",
            PlaybackSignal::HighlightTarget(_) => "highlightTarget",
            PlaybackSignal::CursorPosition { .. } => "cursorPosition",
            PlaybackSignal::ReconstructionWarning(_) => "reconstructionWarning",
            PlaybackSignal::Degraded { .. } => "degraded",
            PlaybackSignal::Fault(_) => "fault",
            PlaybackSignal::Finished => "finished",
        }
    }
}

/// Receives [`PlaybackSignal`]s.
pub trait SignalSink {
    fn emit(&mut self, signal: PlaybackSignal);
}

impl SignalSink for Vec<PlaybackSignal> {
    fn emit(&mut self, signal: PlaybackSignal) {
        self.push(signal);
    }
}

impl SignalSink for UnboundedSender<PlaybackSignal> {
    fn emit(&mut self, signal: PlaybackSignal) {
        if self.send(signal).is_err() {
            tracing::trace!("signal receiver dropped");
        }
    }
}

/// Discards every signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

impl SignalSink for Discard {
    fn emit(&mut self, _signal: PlaybackSignal) {}
}
