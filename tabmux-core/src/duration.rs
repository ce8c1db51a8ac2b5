//! Stable duration and timestamp types for the wire format.
//!
//! [`DurationMs`] serializes as a plain integer (milliseconds), not as
//! serde's internal `{"secs": N, "nanos": N}` format. This gives a
//! stable, portable, human-readable wire format that will not break
//! if serde changes its internal Duration representation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Duration in milliseconds with a stable JSON serialization format.
///
/// Serializes as a plain `u64` integer representing milliseconds.
/// This is the canonical wire format for all durations in the core.
///
/// # Examples
///
/// ```
/// use tabmux_core::DurationMs;
///
/// let d = DurationMs::from_millis(1500);
/// assert_eq!(d.as_millis(), 1500);
///
/// let json = serde_json::to_string(&d).unwrap();
/// assert_eq!(json, "1500");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationMs(u64);

impl DurationMs {
    /// Zero duration.
    pub const ZERO: Self = Self(0);

    /// Create from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Create from seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Get the value in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Convert to `std::time::Duration`.
    pub fn to_std(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl From<Duration> for DurationMs {
    fn from(d: Duration) -> Self {
        Self(d.as_millis() as u64)
    }
}

impl From<DurationMs> for Duration {
    fn from(d: DurationMs) -> Self {
        Duration::from_millis(d.0)
    }
}

impl Default for DurationMs {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::fmt::Display for DurationMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A monotonic-clock timestamp expressed in milliseconds.
///
/// Sessions, workers and orchestrations all timestamp their activity with
/// this type rather than wall-clock time, so idle-reap and timeout math
/// never has to reason about clock skew or DST — only elapsed millis since
/// some process-local epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonoMs(u64);

impl MonoMs {
    /// Wrap a raw millisecond value.
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// The raw millisecond value.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Elapsed time since `self`, saturating at zero if `now` precedes it.
    pub fn elapsed_since(&self, now: MonoMs) -> DurationMs {
        DurationMs::from_millis(now.0.saturating_sub(self.0))
    }

    /// `self + d`, saturating at `u64::MAX`.
    pub fn add(&self, d: DurationMs) -> Self {
        Self(self.0.saturating_add(d.as_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_serializes_as_bare_integer() {
        let d = DurationMs::from_secs(2);
        assert_eq!(serde_json::to_string(&d).unwrap(), "2000");
    }

    #[test]
    fn mono_ms_elapsed_since_saturates_at_zero() {
        let earlier = MonoMs::from_millis(100);
        let later = MonoMs::from_millis(50);
        assert_eq!(earlier.elapsed_since(later).as_millis(), 0);
    }

    #[test]
    fn mono_ms_elapsed_since_computes_difference() {
        let start = MonoMs::from_millis(1_000);
        let now = MonoMs::from_millis(6_500);
        assert_eq!(start.elapsed_since(now), DurationMs::from_millis(5_500));
    }
}
