//! On-disk mirror of the timetrack thresholds, recovered from the original
//! libTAS movie file format (`other_examples/…synabler-libtas-movie__src-config.rs`).
//!
//! The movie file itself is out of scope here (spec.md §1: "movie-file
//! persistence" lives in the controller), but its `[mainthread_timetrack]`
//! section is the only surviving record of the exact per-call-kind threshold
//! table spec.md §3 gestures at ("~10 kinds"), so it's kept as the
//! authoritative source for [`crate::call_kind::CallKind`]'s ordering and is
//! reused as the wire shape for `SharedConfig`'s threshold fields.

use core::fmt::Display;
use core::str::FromStr;

#[derive(Debug)]
pub struct InvalidTimetrackConfigError(pub String);

impl Display for InvalidTimetrackConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "invalid [mainthread_timetrack] entry: {}", self.0)
    }
}

impl std::error::Error for InvalidTimetrackConfigError {}

/// Each field is a threshold for one [`crate::call_kind::CallKind`], with
/// `-1` meaning "valve disabled for this kind".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TimetrackConfig {
    pub get_tick_count: i64,
    pub get_tick_count64: i64,
    pub query_performance_counter: i64,
    pub clock_gettime_monotonic: i64,
    pub clock_gettime_realtime: i64,
    pub gettimeofday: i64,
    pub sdl_getperformancecounter: i64,
    pub sdl_getticks: i64,
    pub time: i64,
}

impl TimetrackConfig {
    /// Threshold for one call kind, `None` meaning "valve disabled".
    pub fn threshold_for(&self, kind: crate::call_kind::CallKind) -> Option<u32> {
        use crate::call_kind::CallKind;
        let raw = match kind {
            CallKind::Untracked => return None,
            CallKind::Time => self.time,
            CallKind::GetTimeOfDay => self.gettimeofday,
            CallKind::ClockGettimeMonotonic => self.clock_gettime_monotonic,
            CallKind::ClockGettimeRealtime => self.clock_gettime_realtime,
            CallKind::SdlGetTicks => self.sdl_getticks,
            CallKind::SdlGetPerformanceCounter => self.sdl_getperformancecounter,
            CallKind::GetTickCount => self.get_tick_count,
            CallKind::GetTickCount64 => self.get_tick_count64,
            CallKind::QueryPerformanceCounter => self.query_performance_counter,
        };
        if raw < 0 {
            None
        } else {
            Some(raw as u32)
        }
    }

    pub fn all_disabled() -> Self {
        TimetrackConfig {
            get_tick_count: -1,
            get_tick_count64: -1,
            query_performance_counter: -1,
            clock_gettime_monotonic: -1,
            clock_gettime_realtime: -1,
            gettimeofday: -1,
            sdl_getperformancecounter: -1,
            sdl_getticks: -1,
            time: -1,
        }
    }
}

macro_rules! impl_str_io {
    (
        $struct:ident,
        $group_marker:literal,
        $($key:literal => $field:ident: $type:ty),*
    ) => {
        impl FromStr for $struct {
            type Err = InvalidTimetrackConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if !s.starts_with($group_marker) {
                    return Err(InvalidTimetrackConfigError($group_marker.to_owned()));
                }

                let mut config = Self::default();
                for line in s.lines().skip(1) {
                    let Some((key, value)) = line.split_once('=') else {
                        continue;
                    };
                    match key {
                        $(
                            $key => config.$field = value.parse::<$type>().map_err(
                                |_| InvalidTimetrackConfigError(key.to_owned())
                            )?,
                        )*
                        _ => {}
                    }
                }
                Ok(config)
            }
        }

        impl Display for $struct {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                writeln!(f, "{}", $group_marker)?;
                $(
                    writeln!(f, "{}={}", $key, self.$field)?;
                )*
                Ok(())
            }
        }
    };
}

impl_str_io!(
    TimetrackConfig,
    "[mainthread_timetrack]",
    "GetTickCount" => get_tick_count: i64,
    "GetTickCount64" => get_tick_count64: i64,
    "QueryPerformanceCounter" => query_performance_counter: i64,
    "clock_gettime_monotonic" => clock_gettime_monotonic: i64,
    "clock_gettime_real" => clock_gettime_realtime: i64,
    "gettimeofday" => gettimeofday: i64,
    "sdl_getperformancecounter" => sdl_getperformancecounter: i64,
    "sdl_getticks" => sdl_getticks: i64,
    "time" => time: i64
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_kind::CallKind;

    #[test]
    fn round_trips_through_display_and_parse() {
        let mut cfg = TimetrackConfig::all_disabled();
        cfg.clock_gettime_monotonic = 100;
        let text = cfg.to_string();
        let parsed: TimetrackConfig = text.parse().unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn threshold_for_maps_disabled_sentinel_to_none() {
        let cfg = TimetrackConfig::all_disabled();
        assert_eq!(cfg.threshold_for(CallKind::Time), None);
        assert_eq!(cfg.threshold_for(CallKind::Untracked), None);
    }

    #[test]
    fn rejects_wrong_group_marker() {
        let err = "[General]\nfoo=1".parse::<TimetrackConfig>();
        assert!(err.is_err());
    }
}
