//! Logical replay clock.
//!
//! Time only moves when the owner calls [`ReplayClock::advance`], so the
//! same sequence of ticks always lands on the same position.

/// A controllable clock over `[0, duration]` milliseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayClock {
    /// Current position in ms since session start.
    position: f64,
    running: bool,
    /// Playback speed multiplier (1.0 = normal, 2.0 = 2x speed).
    speed: f64,
    duration: f64,
    min_speed: f64,
    max_speed: f64,
}

impl ReplayClock {
    pub fn new(duration_ms: f64) -> Self {
        Self {
            position: 0.0,
            running: false,
            speed: 1.0,
            duration: sanitize(duration_ms),
            min_speed: 0.1,
            max_speed: 16.0,
        }
    }

    /// Set the allowed speed range. The current speed is re-clamped.
    pub fn with_speed_range(mut self, min: f64, max: f64) -> Self {
        let min = if min.is_finite() && min > 0.0 { min } else { 0.1 };
        self.min_speed = min;
        self.max_speed = if max.is_finite() && max >= min { max } else { min };
        self.speed = self.speed.clamp(self.min_speed, self.max_speed);
        self
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Set the playback speed, clamped to the configured range.
    ///
    /// Returns `false` for non-finite or non-positive input, which is ignored.
    pub fn set_speed(&mut self, speed: f64) -> bool {
        if !speed.is_finite() || speed <= 0.0 {
            return false;
        }
        self.speed = speed.clamp(self.min_speed, self.max_speed);
        true
    }

    pub fn play(&mut self) {
        self.running = true;
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    /// Move to `position`, clamped to `[0, duration]`.
    pub fn seek(&mut self, position: f64) {
        self.position = sanitize(position).min(self.duration);
    }

    /// Move by a relative amount.
    pub fn seek_by(&mut self, delta_ms: f64) {
        if delta_ms.is_finite() {
            self.seek(self.position + delta_ms);
        }
    }

    /// Advance by `delta_ms` of real time scaled by the speed.
    ///
    /// Returns true if the clock reached the end, which also stops it.
    pub fn advance(&mut self, delta_ms: f64) -> bool {
        if !self.running || !delta_ms.is_finite() || delta_ms <= 0.0 {
            return false;
        }
        self.position += delta_ms * self.speed;
        if self.position >= self.duration {
            self.position = self.duration;
            self.running = false;
            return true;
        }
        false
    }

    /// Progress from 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        if self.duration <= 0.0 {
            return 0.0;
        }
        self.position / self.duration
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.duration
    }

    /// Back to the beginning, stopped.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.running = false;
    }
}

impl Default for ReplayClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Non-finite or negative values become 0.
fn sanitize(ms: f64) -> f64 {
    if ms.is_finite() {
        ms.max(0.0)
    } else {
        0.0
    }
}
