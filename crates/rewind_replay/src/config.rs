//! Replay configuration.
//!
//! Every field has a default so partial TOML/JSON configs deserialize.

use rewind_core::Severity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level replay configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub offload: OffloadConfig,
}

impl ReplayConfig {
    /// Deterministic config for tests: inline offload, normal speed.
    pub fn testing() -> Self {
        Self {
            offload: OffloadConfig {
                use_worker: false,
                ..OffloadConfig::default()
            },
            ..Self::default()
        }
    }

    /// Set the initial playback speed.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.playback.initial_speed = speed;
        self
    }

    /// Set the correlation lookback window.
    pub fn with_lookback(mut self, lookback_ms: f64) -> Self {
        self.correlation.lookback_ms = lookback_ms;
        self
    }

    /// Set the active-interaction tolerance.
    pub fn with_tolerance(mut self, tolerance_ms: f64) -> Self {
        self.playback.active_tolerance_ms = tolerance_ms;
        self
    }

    /// Enable or disable the isolated offload worker.
    pub fn with_worker(mut self, use_worker: bool) -> Self {
        self.offload.use_worker = use_worker;
        self
    }
}

/// Playback clock and transport settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Tick length used by [`advance`](crate::PlaybackScheduler::advance) and the driver.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: f64,
    #[serde(default = "default_speed")]
    pub initial_speed: f64,
    #[serde(default = "default_min_speed")]
    pub min_speed: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    /// Interactions within ± this many ms of the clock are "active".
    #[serde(default = "default_tolerance")]
    pub active_tolerance_ms: f64,
    /// Step used by skip forward/backward when no amount is given.
    #[serde(default = "default_skip_step")]
    pub skip_step_ms: f64,
}

fn default_tick_interval() -> f64 {
    16.0
}

fn default_speed() -> f64 {
    1.0
}

fn default_min_speed() -> f64 {
    0.1
}

fn default_max_speed() -> f64 {
    16.0
}

fn default_tolerance() -> f64 {
    100.0
}

fn default_skip_step() -> f64 {
    5_000.0
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            initial_speed: default_speed(),
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
            active_tolerance_ms: default_tolerance(),
            skip_step_ms: default_skip_step(),
        }
    }
}

/// Error correlation settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// How far before an error interactions are considered.
    #[serde(default = "default_lookback")]
    pub lookback_ms: f64,
    /// Severity used when the error carries none.
    #[serde(default)]
    pub default_severity: Severity,
    /// Maximum number of entries in a correlation's user path.
    #[serde(default = "default_max_path_len")]
    pub max_path_len: usize,
}

fn default_lookback() -> f64 {
    5_000.0
}

fn default_max_path_len() -> usize {
    10
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookback_ms: default_lookback(),
            default_severity: Severity::default(),
            max_path_len: default_max_path_len(),
        }
    }
}

/// Background offload settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OffloadConfig {
    /// Tasks touching at least this many nodes go to the worker.
    #[serde(default = "default_node_threshold")]
    pub node_threshold: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub use_worker: bool,
}

fn default_node_threshold() -> usize {
    2_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            node_threshold: default_node_threshold(),
            timeout_ms: default_timeout_ms(),
            use_worker: true,
        }
    }
}

impl OffloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
