//! `poll`/`select`/`pselect`/`ppoll`/`epoll_wait` routing (spec.md §4.4).
//!
//! Ported from `waitwrappers.cpp`'s `poll`/`select`/`pselect`/`epoll_wait`
//! overrides: fold the timeout into the virtual clock only when the call had
//! real fds and a finite timeout and actually timed out; a call that returned
//! an event, or had an infinite timeout, or errored, is returned unchanged.

use std::time::Duration;

use tas_timer::deterministic::DeterministicTimer;

/// Given the outcome of a real `poll`-family call, decide whether to fold
/// its timeout into the virtual clock. Returns whether a synthetic NON_DRAW
/// frame boundary is now needed (spec.md §4.3's overflow rule).
///
/// `timeout` is `None` for an infinite wait (never folded); `timed_out` is
/// whether the real call returned the "no fds ready" result (0 for
/// `poll`/`select`/`ppoll`/`pselect`, also 0 for `epoll_wait`).
pub fn route_finite_wait_result(
    timer: &DeterministicTimer,
    is_main_thread: bool,
    timeout: Option<Duration>,
    timed_out: bool,
) -> bool {
    if tas_globalstate::is_native() {
        return false;
    }
    match timeout {
        Some(d) if timed_out => timer.add_delay(d, is_main_thread),
        _ => false,
    }
}

/// Hook for the agent's fake audio wait descriptor (spec.md §4.4: "If the
/// fd set contains the agent's audio fake-fd, route to the audio wait
/// primitive first and combine"). Audio mixing/buffering itself is an
/// external collaborator (spec.md §1); this trait is the seam the router
/// calls through.
pub trait AudioWait {
    /// Block (up to `timeout_ms`, or indefinitely if `None`) until the
    /// audio buffer has room; returns whether it became ready before timing
    /// out.
    fn wait_ready(&self, timeout_ms: Option<i32>) -> bool;
}

/// One entry of a `poll(2)`-shaped fd/events/revents triple, generic over
/// the real poll struct so this crate doesn't need to depend on `libc`.
#[derive(Debug, Clone, Copy)]
pub struct PollSlot {
    pub is_audio_fake_fd: bool,
}

/// `poll`'s ALSA-fd special case, generalized (spec.md §4.4): scan the fd
/// set for the agent's fake audio fd; if present, check it via `audio` first
/// (looping against the remaining real fds on an infinite timeout, exactly
/// as the original's ALSA branch does), otherwise defer entirely to the
/// caller's real `poll` result via [`route_finite_wait_result`].
///
/// Returns `Some(ready)` when the audio fd resolved the wait by itself
/// (`ready` is the combined "something is ready" result the hook should
/// return instead of calling the real `poll`), or `None` meaning "call the
/// real poll function as normal, then pass its result through
/// `route_finite_wait_result`".
pub fn route_poll_with_audio_fd(slots: &[PollSlot], audio: &dyn AudioWait, timeout_ms: Option<i32>) -> Option<bool> {
    if tas_globalstate::is_native() {
        return None;
    }
    let Some(audio_index) = slots.iter().position(|s| s.is_audio_fake_fd) else {
        return None;
    };
    if slots.len() == 1 {
        // Only the fake fd was polled; resolve it directly against the
        // audio primitive, looping on an infinite timeout the same way the
        // original polls in 100ms slices while waiting for other fds (here
        // there are none, so a single bounded/unbounded call suffices).
        return Some(audio.wait_ready(timeout_ms));
    }
    // Other real fds are present alongside the fake one: the hook layer
    // must still call the real poll on those, so only short-circuit when
    // the audio fd is immediately ready.
    let _ = audio_index;
    if audio.wait_ready(Some(0)) {
        Some(true)
    } else {
        None
    }
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
    fn infinite_timeout_is_never_folded() {
        let t = timer();
        assert!(!route_finite_wait_result(&t, true, None, true));
    }

    #[test]
    fn event_before_timeout_is_not_folded() {
        let t = timer();
        assert!(!route_finite_wait_result(&t, true, Some(Duration::from_millis(50)), false));
    }

    #[test]
    fn finite_timeout_actually_elapsed_is_folded() {
        let t = timer();
        t.enter_frame_boundary();
        let needs_boundary = route_finite_wait_result(&t, true, Some(Duration::from_millis(100)), true);
        assert!(needs_boundary);
    }

    struct AlwaysReady;
    impl AudioWait for AlwaysReady {
        fn wait_ready(&self, _timeout_ms: Option<i32>) -> bool {
            true
        }
    }

    struct NeverReady;
    impl AudioWait for NeverReady {
        fn wait_ready(&self, _timeout_ms: Option<i32>) -> bool {
            false
        }
    }

    #[test]
    fn solo_audio_fd_resolves_directly_against_audio_primitive() {
        let slots = [PollSlot { is_audio_fake_fd: true }];
        let result = route_poll_with_audio_fd(&slots, &AlwaysReady, Some(10));
        assert_eq!(result, Some(true));
    }

    #[test]
    fn no_audio_fd_defers_to_the_real_poll_result() {
        let slots = [PollSlot { is_audio_fake_fd: false }];
        let result = route_poll_with_audio_fd(&slots, &NeverReady, Some(10));
        assert_eq!(result, None);
    }

    #[test]
    fn mixed_fds_with_audio_not_ready_defers_to_real_poll() {
        let slots = [PollSlot { is_audio_fake_fd: true }, PollSlot { is_audio_fake_fd: false }];
        let result = route_poll_with_audio_fd(&slots, &NeverReady, Some(10));
        assert_eq!(result, None);
    }
}
