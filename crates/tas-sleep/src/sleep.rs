//! `sleep`/`nanosleep`/`usleep`/`SDL_Delay` routing (spec.md §4.4).

use std::time::Duration;

use tas_protocol::shared_config::SleepHandling;
use tas_timer::deterministic::DeterministicTimer;

/// What the hook implementation should do after consulting the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// Call the real sleep for the full requested duration.
    SleepReal,
    /// The duration was folded into the virtual clock; the hook should
    /// yield once (`std::thread::yield_now` or equivalent) and return as if
    /// the sleep completed normally.
    Folded { needs_non_draw_boundary: bool },
}

/// Decide how to handle a sleep request of `duration` from a thread that is
/// (or isn't) the main thread, under the given [`SleepHandling`] policy.
///
/// Native-state calls (spec.md §4.2) are never folded: a `native` scope
/// means the agent itself deliberately wants the real delay (e.g. the
/// frame-boundary pacing sleep in `tas-agent`), not a game call to reinterpret.
pub fn route_sleep(timer: &DeterministicTimer, policy: SleepHandling, duration: Duration, is_main_thread: bool) -> SleepOutcome {
    if tas_globalstate::is_native() || tas_globalstate::is_own_code() {
        return SleepOutcome::SleepReal;
    }

    let should_fold = match policy {
        SleepHandling::Never => false,
        SleepHandling::MainOnly => is_main_thread,
        SleepHandling::Always => true,
    };

    if !should_fold {
        return SleepOutcome::SleepReal;
    }

    let needs_non_draw_boundary = timer.add_delay(duration, is_main_thread);
    SleepOutcome::Folded { needs_non_draw_boundary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tas_protocol::framerate::FrameRate;
    use tas_protocol::movie_config::TimetrackConfig;
    use tas_protocol::virtual_time::VirtualTime;

    fn timer() -> DeterministicTimer {
        DeterministicTimer::new(FrameRate::new(60, 1), VirtualTime::ZERO, TimetrackConfig::all_disabled())
    }

    #[test]
    fn never_policy_always_sleeps_real() {
        let t = timer();
        let outcome = route_sleep(&t, SleepHandling::Never, Duration::from_millis(5), true);
        assert_eq!(outcome, SleepOutcome::SleepReal);
    }

    #[test]
    fn main_only_policy_folds_main_thread_and_sleeps_real_on_others() {
        let t = timer();
        let main = route_sleep(&t, SleepHandling::MainOnly, Duration::from_millis(1), true);
        assert!(matches!(main, SleepOutcome::Folded { .. }));
        let secondary = route_sleep(&t, SleepHandling::MainOnly, Duration::from_millis(1), false);
        assert_eq!(secondary, SleepOutcome::SleepReal);
    }

    #[test]
    fn always_policy_folds_regardless_of_thread() {
        let t = timer();
        let outcome = route_sleep(&t, SleepHandling::Always, Duration::from_millis(1), false);
        assert!(matches!(outcome, SleepOutcome::Folded { .. }));
    }

    #[test]
    fn native_scope_bypasses_folding_even_under_always() {
        let t = timer();
        let _guard = tas_globalstate::enter_native();
        let outcome = route_sleep(&t, SleepHandling::Always, Duration::from_secs(1), true);
        assert_eq!(outcome, SleepOutcome::SleepReal);
    }

    #[test]
    fn folding_reports_non_draw_boundary_need_when_debt_overflows_frame() {
        let t = timer();
        t.enter_frame_boundary();
        let outcome = route_sleep(&t, SleepHandling::Always, Duration::from_millis(100), true);
        assert_eq!(outcome, SleepOutcome::Folded { needs_non_draw_boundary: true });
    }
}
