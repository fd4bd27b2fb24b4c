//! Playback: logical clock, transport controls and UI signals.

mod clock;
mod driver;
mod insights;
mod scheduler;
mod signals;

pub use clock::ReplayClock;
pub use driver::PlaybackDriver;
pub use insights::Insights;
pub use scheduler::{PlaybackScheduler, PlaybackState};
pub use signals::{Discard, PlaybackSignal, SignalSink};
