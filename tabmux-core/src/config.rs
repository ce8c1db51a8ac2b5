//! Tunable knobs shared across the core, with the spec's defaults.

use crate::duration::DurationMs;

/// Display color assigned to a session's tab group. Rotates through a
/// fixed 9-entry ring as sessions are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupColor {
    /// Grey.
    Grey,
    /// Blue.
    Blue,
    /// Red.
    Red,
    /// Yellow.
    Yellow,
    /// Green.
    Green,
    /// Pink.
    Pink,
    /// Purple.
    Purple,
    /// Cyan.
    Cyan,
    /// Orange.
    Orange,
}

/// The 9-entry ring, in rotation order.
pub const GROUP_COLORS: [GroupColor; 9] = [
    GroupColor::Grey,
    GroupColor::Blue,
    GroupColor::Red,
    GroupColor::Yellow,
    GroupColor::Green,
    GroupColor::Pink,
    GroupColor::Purple,
    GroupColor::Cyan,
    GroupColor::Orange,
];

/// Returns the color assigned to the `n`th session created (0-indexed),
/// rotating through [`GROUP_COLORS`].
pub fn color_for_index(n: usize) -> GroupColor {
    GROUP_COLORS[n % GROUP_COLORS.len()]
}

/// Every configurable knob in the core, with the spec's defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// A session idle longer than this is reaped. Default 30 minutes.
    pub session_idle_reap_ms: DurationMs,
    /// How often the idle reaper scans. Default 5 minutes.
    pub session_idle_scan_ms: DurationMs,
    /// Per-worker absolute timeout before forced completion. Default 60s.
    pub worker_timeout_ms: DurationMs,
    /// Whole-workflow timeout before forcing every remaining worker.
    /// Default 5 minutes.
    pub global_timeout_ms: DurationMs,
    /// Consecutive no-change progress updates before a worker is force-
    /// completed by the stale-data circuit breaker. Default 5.
    pub max_stale_iterations: u32,
    /// Maximum length, in UTF-16 code units, of a worker name. Default 100.
    pub max_worker_name_len: usize,
    /// Maximum number of progress-log entries retained per worker. Default
    /// 500; oldest entries are dropped once exceeded.
    pub max_progress_log_entries: usize,
    /// The `protocolVersion` reported by `initialize`.
    pub protocol_version: &'static str,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            session_idle_reap_ms: DurationMs::from_millis(1_800_000),
            session_idle_scan_ms: DurationMs::from_millis(300_000),
            worker_timeout_ms: DurationMs::from_millis(60_000),
            global_timeout_ms: DurationMs::from_millis(300_000),
            max_stale_iterations: 5,
            max_worker_name_len: 100,
            max_progress_log_entries: 500,
            protocol_version: "2024-11-05",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.session_idle_reap_ms.as_millis(), 1_800_000);
        assert_eq!(cfg.worker_timeout_ms.as_millis(), 60_000);
        assert_eq!(cfg.max_stale_iterations, 5);
        assert_eq!(cfg.max_progress_log_entries, 500);
    }

    #[test]
    fn color_rotation_wraps_after_nine() {
        assert_eq!(color_for_index(0), GroupColor::Grey);
        assert_eq!(color_for_index(9), GroupColor::Grey);
        assert_eq!(color_for_index(10), GroupColor::Blue);
    }
}
