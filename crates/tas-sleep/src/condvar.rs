//! Condition-wait-with-timeout routing (glib and pthread equivalents),
//! spec.md §4.4's `wait_handling` policy.

use std::time::Duration;

use tas_protocol::shared_config::WaitHandling;
use tas_timer::deterministic::DeterministicTimer;

/// The real wait primitive the hook layer owns (a `pthread_cond_timedwait`
/// or glib `g_cond_wait_until` call). The router only decides *how many*
/// times to call this and with what bound; it never touches the mutex or
/// condvar itself, so it stays generic over both backends.
pub trait CondWaiter {
    /// Block for at most `bound` (or indefinitely if `None`). Returns `true`
    /// if the condition was signaled, `false` on timeout.
    fn wait(&mut self, bound: Option<Duration>) -> bool;
}

/// Slices used by the `FINITE` policy between virtual-clock yields, and the
/// bounded wait `FULL_INFINITE` performs purely to keep signal delivery
/// alive. Spec.md §4.4 leaves both as implementation-chosen constants.
const FINITE_SLICE: Duration = Duration::from_millis(10);
const SIGNAL_PRESERVING_BOUND: Duration = Duration::from_millis(10);

/// Route one timed condition-wait through the configured policy.
///
/// `deadline` is the caller's full requested wait duration from now.
/// Returns whatever [`CondWaiter::wait`] ultimately reports (signaled or
/// timed out) so the hook can translate it back into the real function's
/// return convention.
pub fn route_condvar_wait(timer: &DeterministicTimer, policy: WaitHandling, is_main_thread: bool, deadline: Duration, waiter: &mut dyn CondWaiter) -> bool {
    if tas_globalstate::is_native() {
        return waiter.wait(Some(deadline));
    }

    match policy {
        WaitHandling::Native => waiter.wait(Some(deadline)),
        WaitHandling::Finite => wait_in_slices(timer, is_main_thread, deadline, waiter),
        WaitHandling::Infinite => {
            timer.add_delay(deadline, is_main_thread);
            waiter.wait(None)
        }
        WaitHandling::FullInfinite => {
            timer.add_delay(deadline, is_main_thread);
            waiter.wait(Some(SIGNAL_PRESERVING_BOUND))
        }
    }
}

/// `FINITE` policy: repeatedly wait in short slices, folding each elapsed
/// slice into the virtual clock, until either the condition is signaled or
/// the logical deadline is exhausted.
fn wait_in_slices(timer: &DeterministicTimer, is_main_thread: bool, mut remaining: Duration, waiter: &mut dyn CondWaiter) -> bool {
    loop {
        if remaining.is_zero() {
            return false;
        }
        let slice = FINITE_SLICE.min(remaining);
        if waiter.wait(Some(slice)) {
            return true;
        }
        timer.add_delay(slice, is_main_thread);
        remaining -= slice;
    }
}
