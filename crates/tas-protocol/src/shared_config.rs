//! The single controller-writable, agent-readable configuration structure
//! (spec.md §3, "SharedConfig"; §5's single-writer/single-reader policy).

use crate::framerate::FrameRate;
use crate::movie_config::TimetrackConfig;
use crate::virtual_time::VirtualTime;

/// Policy for folding `sleep`/`nanosleep`/`usleep` into the virtual clock
/// (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SleepHandling {
    /// Always call the real sleep.
    Never,
    /// Fold only when the caller is the main thread.
    #[default]
    MainOnly,
    /// Always fold, regardless of caller.
    Always,
}

/// Policy for condition-wait-with-timeout calls (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum WaitHandling {
    /// Pass through to the real wait unchanged.
    Native,
    /// Wait in short slices, yielding to the timer between slices.
    #[default]
    Finite,
    /// Fold the full wait into the timer, then do one unbounded real wait.
    Infinite,
    /// Fold the wait, then do one short bounded wait to preserve signal
    /// delivery semantics.
    FullInfinite,
}

/// Game-specific quirk flags, applied by engine-detection code in the
/// checkpoint/hook layers (spec.md §3: "game-specific quirks bitmask").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct QuirkFlags(pub u32);

impl QuirkFlags {
    pub const NONE: QuirkFlags = QuirkFlags(0);
    pub const UNITY_JOB_SYNC_PATCH: QuirkFlags = QuirkFlags(1 << 0);
    pub const WINE_FULLSCREEN_HACK: QuirkFlags = QuirkFlags(1 << 1);
    pub const SDL_DYNAMIC_API_BYPASS: QuirkFlags = QuirkFlags(1 << 2);

    pub fn contains(&self, other: QuirkFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Configuration the controller pushes to the agent, read by the agent's
/// main thread only at a frame boundary (spec.md §5). All fields are
/// fixed-width so the struct can be placed directly in the shared-memory
/// region (spec.md §6) without pointer fix-up.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct SharedConfig {
    pub framerate: FrameRate,
    pub audio_sample_rate: u32,
    pub audio_bit_depth: u16,
    pub audio_channels: u16,
    pub initial_time: VirtualTime,
    pub sleep_handling: SleepHandling,
    pub wait_handling: WaitHandling,
    pub timetrack: TimetrackConfig,
    pub quirks: QuirkFlags,
    /// Real-time speed divisor applied to the frame-boundary pacing sleep
    /// (spec.md §4.6 step 7); `1` is normal speed, values < 1 fast-forward.
    pub speed_divisor: f64,
    pub fastforward: bool,
    /// Nudge applied by the anti-livelock valve on a threshold trip
    /// (spec.md §9: "keep this configurable").
    pub force_advance_nudge_nanos: u64,
}

impl Default for SharedConfig {
    fn default() -> Self {
        SharedConfig {
            framerate: FrameRate::new(60, 1),
            audio_sample_rate: 44100,
            audio_bit_depth: 16,
            audio_channels: 2,
            initial_time: VirtualTime::ZERO,
            sleep_handling: SleepHandling::default(),
            wait_handling: WaitHandling::default(),
            timetrack: TimetrackConfig::all_disabled(),
            quirks: QuirkFlags::NONE,
            speed_divisor: 1.0,
            fastforward: false,
            // Matches DeterministicTimer.cpp's `ticksExtra * 1_000_000` (1ms
            // per threshold trip), not the 1ns used as an illustrative
            // figure in spec.md §8 scenario 3 (see SPEC_FULL.md's Open
            // Questions ledger).
            force_advance_nudge_nanos: 1_000_000,
        }
    }
}

/// Clamp-to-default policy for malformed config fields (spec.md §7,
/// `ConfigError`): unknown/out-of-range values never become a hard error,
/// they're clamped and logged.
impl SharedConfig {
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.framerate.num != 0 && self.framerate.den == 0 {
            warnings.push("framerate.den was 0 with nonzero num; clamped to 1".into());
            self.framerate.den = 1;
        }
        if self.speed_divisor <= 0.0 || !self.speed_divisor.is_finite() {
            warnings.push(format!(
                "speed_divisor {} out of range; clamped to 1.0",
                self.speed_divisor
            ));
            self.speed_divisor = 1.0;
        }
        if self.audio_channels == 0 {
            warnings.push("audio_channels was 0; clamped to 2".into());
            self.audio_channels = 2;
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_zero_denominator() {
        let mut cfg = SharedConfig {
            framerate: FrameRate::new(60, 0),
            ..SharedConfig::default()
        };
        let warnings = cfg.sanitize();
        assert_eq!(cfg.framerate.den, 1);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn sanitize_clamps_bad_speed_divisor() {
        let mut cfg = SharedConfig {
            speed_divisor: -3.0,
            ..SharedConfig::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.speed_divisor, 1.0);
    }

    #[test]
    fn quirk_flags_combine() {
        let flags = QuirkFlags(QuirkFlags::UNITY_JOB_SYNC_PATCH.0 | QuirkFlags::WINE_FULLSCREEN_HACK.0);
        assert!(flags.contains(QuirkFlags::UNITY_JOB_SYNC_PATCH));
        assert!(flags.contains(QuirkFlags::WINE_FULLSCREEN_HACK));
        assert!(!flags.contains(QuirkFlags::SDL_DYNAMIC_API_BYPASS));
    }
}
