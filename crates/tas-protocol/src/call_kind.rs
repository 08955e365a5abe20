//! Per-call-kind anti-livelock counters (spec.md §3, "CallTypeCounter").
//!
//! The exact list of tracked kinds and their names is recovered from the
//! original movie file's `[mainthread_timetrack]` section (see
//! `crate::movie_config::TimetrackConfig`), which is libTAS's own on-disk
//! mirror of this table — spec.md §3 only promises "~10 kinds".

use serde::{Deserialize, Serialize};

/// A single intercepted time-returning call, or `Untracked` for calls that
/// must never participate in the anti-livelock valve (spec.md §4.3: calls
/// made by the agent's own code are always force-reclassified to this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    Untracked,
    Time,
    GetTimeOfDay,
    ClockGettimeMonotonic,
    ClockGettimeRealtime,
    SdlGetTicks,
    SdlGetPerformanceCounter,
    GetTickCount,
    GetTickCount64,
    QueryPerformanceCounter,
}

impl CallKind {
    /// All kinds that participate in the threshold/counter machinery, in a
    /// stable order matching `TimetrackConfig`'s field order.
    pub const TRACKED: [CallKind; 9] = [
        CallKind::Time,
        CallKind::GetTimeOfDay,
        CallKind::ClockGettimeMonotonic,
        CallKind::ClockGettimeRealtime,
        CallKind::SdlGetTicks,
        CallKind::SdlGetPerformanceCounter,
        CallKind::GetTickCount,
        CallKind::GetTickCount64,
        CallKind::QueryPerformanceCounter,
    ];

    /// Whether the real OS clock queried by this call kind is the realtime
    /// (wall) clock rather than a monotonic one (spec.md §4.3's fixed table).
    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            CallKind::Time
                | CallKind::GetTimeOfDay
                | CallKind::GetTickCount
                | CallKind::GetTickCount64
                | CallKind::ClockGettimeRealtime
        )
    }

    pub fn index(&self) -> Option<usize> {
        Self::TRACKED.iter().position(|k| k == self)
    }
}

/// Main-thread / non-main-thread call counts for one [`CallKind`], with a
/// configurable threshold. Exceeding the threshold without an intervening
/// frame boundary is the trigger for the anti-livelock force-advance.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallTypeCounter {
    pub main_count: u32,
    pub secondary_count: u32,
    /// `None` disables the valve for this kind (matches the movie format's
    /// `-1` sentinel, spec.md §3's "configurable threshold").
    pub threshold: Option<u32>,
}

impl CallTypeCounter {
    pub fn with_threshold(threshold: Option<u32>) -> Self {
        CallTypeCounter {
            main_count: 0,
            secondary_count: 0,
            threshold,
        }
    }

    /// Record one call from the given thread kind, returning `true` if the
    /// threshold was just exceeded (caller must then force-advance and reset
    /// *all* kinds' counters, per spec.md §4.3 — this method only manages its
    /// own counter).
    pub fn record(&mut self, is_main_thread: bool) -> bool {
        let count = if is_main_thread {
            &mut self.main_count
        } else {
            &mut self.secondary_count
        };
        *count += 1;
        match self.threshold {
            Some(t) => *count > t,
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.main_count = 0;
        self.secondary_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_trip_on_the_expected_call() {
        // Scenario 3 (spec.md §8): threshold 100, 101st call trips it.
        let mut counter = CallTypeCounter::with_threshold(Some(100));
        for _ in 0..100 {
            assert!(!counter.record(true));
        }
        assert!(counter.record(true));
    }

    #[test]
    fn disabled_threshold_never_trips() {
        let mut counter = CallTypeCounter::with_threshold(None);
        for _ in 0..100_000 {
            assert!(!counter.record(true));
        }
    }

    #[test]
    fn realtime_classification_matches_fixed_table() {
        assert!(CallKind::Time.is_realtime());
        assert!(CallKind::GetTickCount.is_realtime());
        assert!(!CallKind::ClockGettimeMonotonic.is_realtime());
        assert!(!CallKind::SdlGetPerformanceCounter.is_realtime());
    }
}
