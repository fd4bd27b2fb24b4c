//! Session timestamps.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Absolute recording timestamp in milliseconds.
///
/// Browsers report fractional milliseconds, so the value is an `f64`.
/// Ordering uses `f64::total_cmp`, which makes timestamps usable as sort
/// and binary-search keys.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0.0);

    /// Create a timestamp from milliseconds. Non-finite input maps to zero.
    pub fn from_millis(ms: f64) -> Self {
        if ms.is_finite() {
            Self(ms)
        } else {
            Self(0.0)
        }
    }

    pub fn as_millis(self) -> f64 {
        self.0
    }

    /// Shift by a (possibly negative) number of milliseconds.
    pub fn offset_by(self, ms: f64) -> Self {
        Self::from_millis(self.0 + ms)
    }

    /// Milliseconds elapsed since `earlier` (negative if `earlier` is later).
    pub fn since(self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<f64> for Timestamp {
    fn from(ms: f64) -> Self {
        Self::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_total() {
        let mut stamps = vec![
            Timestamp::from_millis(30.0),
            Timestamp::from_millis(-1.0),
            Timestamp::from_millis(12.5),
        ];
        stamps.sort();
        assert_eq!(
            stamps,
            vec![
                Timestamp::from_millis(-1.0),
                Timestamp::from_millis(12.5),
                Timestamp::from_millis(30.0),
            ]
        );
    }

    #[test]
    fn non_finite_maps_to_zero() {
        assert_eq!(Timestamp::from_millis(f64::NAN), Timestamp::ZERO);
        assert_eq!(Timestamp::from_millis(f64::INFINITY), Timestamp::ZERO);
    }

    #[test]
    fn offset_and_since() {
        let t = Timestamp::from_millis(1_000.0);
        assert_eq!(t.offset_by(250.0).since(t), 250.0);
        assert_eq!(t.offset_by(-250.0).as_millis(), 750.0);
    }
}
