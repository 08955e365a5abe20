//! The deterministic virtual clock (spec.md §4.3), grounded directly on
//! `DeterministicTimer.cpp`'s `getTicks`/`addDelay`/`enterFrameBoundary`/
//! `exitFrameBoundary` state machine. The raw `TimeHolder` arithmetic is
//! replaced by `tas_protocol::VirtualTime` and `std::time::Duration`, but the
//! fields below are a one-to-one port: `ticks`, `fakeExtraTicks` ->
//! `fake_extra_ticks`, `addedDelay` -> `deferred_delay`, `fractional_part` ->
//! the carried remainder inside `FrameIncrementCarry`, `lastEnterTicks` ->
//! `last_enter_ticks`.

use std::sync::Mutex;
use std::time::Duration;

use log::warn;
use tas_protocol::call_kind::{CallKind, CallTypeCounter};
use tas_protocol::framerate::{FrameIncrementCarry, FrameRate};
use tas_protocol::movie_config::TimetrackConfig;
use tas_protocol::virtual_time::{RealtimeDelta, VirtualTime};

use crate::clock::{RealClock, SystemClock};
use crate::nondeterministic::NonDeterministicTimer;
use crate::sleep_debt::SleepDebt;

struct State {
    framerate: FrameRate,
    fastforward: bool,
    ticks: VirtualTime,
    fake_extra_ticks: Duration,
    deferred_delay: SleepDebt,
    time_increment: Duration,
    carry: FrameIncrementCarry,
    last_enter_ticks: VirtualTime,
    realtime_delta: RealtimeDelta,
    counters: [CallTypeCounter; CallKind::TRACKED.len()],
    force_advance_nudge: Duration,
    last_enter_real_time: std::time::Instant,
}

/// The deterministic timer: one instance per process, shared by every
/// intercepted time-returning call.
pub struct DeterministicTimer {
    state: Mutex<State>,
    non_det: NonDeterministicTimer,
    clock: Box<dyn RealClock>,
}

impl DeterministicTimer {
    pub fn new(framerate: FrameRate, initial_time: VirtualTime, timetrack: TimetrackConfig) -> Self {
        Self::with_clock(framerate, initial_time, timetrack, Box::new(SystemClock))
    }

    pub fn with_clock(
        framerate: FrameRate,
        initial_time: VirtualTime,
        timetrack: TimetrackConfig,
        clock: Box<dyn RealClock>,
    ) -> Self {
        let counters = CallKind::TRACKED.map(|k| CallTypeCounter::with_threshold(timetrack.threshold_for(k)));
        let now = clock.now();
        let non_det = NonDeterministicTimer::new(clock.as_ref());
        DeterministicTimer {
            state: Mutex::new(State {
                framerate,
                fastforward: false,
                ticks: initial_time,
                fake_extra_ticks: Duration::ZERO,
                deferred_delay: SleepDebt::ZERO,
                time_increment: Duration::ZERO,
                carry: framerate.carry(),
                last_enter_ticks: initial_time,
                realtime_delta: RealtimeDelta::default(),
                counters,
                force_advance_nudge: Duration::from_millis(1),
                last_enter_real_time: now,
            }),
            non_det,
            clock,
        }
    }

    /// Mirrors `SharedConfig::fastforward` (spec.md §3); consulted by both
    /// the deterministic and non-deterministic code paths.
    pub fn set_fastforward(&self, fastforward: bool) {
        self.state.lock().unwrap().fastforward = fastforward;
    }

    /// Override the anti-livelock nudge (spec.md §9 open question: the
    /// original hardcodes 1ms; keep it configurable so the spec's own "1ns"
    /// illustrative figure can be exercised directly in tests).
    pub fn set_force_advance_nudge(&self, nudge: Duration) {
        self.state.lock().unwrap().force_advance_nudge = nudge;
    }

    /// Reset virtual time to `vt` (spec.md §4.8 restore step 6: "Reset
    /// `framecount` and virtual time from the header"), called by the
    /// checkpoint engine's `load`. Also clears any deferred sleep debt and
    /// transient fake-advance offset, since neither survives a jump to a
    /// different point in the run.
    pub fn restore_ticks(&self, vt: VirtualTime) {
        let mut state = self.state.lock().unwrap();
        state.ticks = vt;
        state.last_enter_ticks = vt;
        state.fake_extra_ticks = Duration::ZERO;
        state.deferred_delay = SleepDebt::ZERO;
    }

    /// `get_ticks(call_kind)` (spec.md §4.3). Native state forwards straight
    /// to the real clock and bypasses every bit of the state machine below.
    pub fn get_ticks(&self, kind: CallKind, is_main_thread: bool) -> VirtualTime {
        if tas_globalstate::is_native() {
            // The original calls clock_gettime(CLOCK_REALTIME) directly here;
            // this is the one place the virtual clock is never consulted, so
            // it reads the real wall clock rather than going through the
            // injectable `RealClock` (which only models monotonic time).
            let since_epoch = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default();
            return VirtualTime::from_duration(since_epoch);
        }

        let (disabled, fastforward) = {
            let state = self.state.lock().unwrap();
            (state.framerate.is_disabled(), state.fastforward)
        };
        if disabled {
            return self.non_det.get_ticks(self.clock.as_ref(), is_main_thread, fastforward);
        }

        if tas_globalstate::is_own_code() {
            return self.get_ticks_untracked();
        }

        let nudge = {
            let mut state = self.state.lock().unwrap();
            Self::record_and_maybe_trip(&mut state, kind, is_main_thread)
        };

        if let Some(nudge) = nudge {
            // addDelay runs under its own, separately-acquired lock, exactly
            // as in the original (the counting critical section above has
            // already closed by this point).
            self.add_delay(nudge, is_main_thread);
        }

        let state = self.state.lock().unwrap();
        state.ticks + state.fake_extra_ticks
    }

    fn get_ticks_untracked(&self) -> VirtualTime {
        let state = self.state.lock().unwrap();
        state.ticks + state.fake_extra_ticks
    }

    /// Apply the realtime delta on top of `get_ticks` for call kinds that
    /// query the wall clock rather than a monotonic one (spec.md §4.3's
    /// "fixed table").
    pub fn ticks_for_display(&self, kind: CallKind, is_main_thread: bool) -> VirtualTime {
        let ticks = self.get_ticks(kind, is_main_thread);
        if kind.is_realtime() {
            let delta = self.state.lock().unwrap().realtime_delta;
            delta.apply(ticks)
        } else {
            ticks
        }
    }

    /// Sets the realtime delta so that the next realtime-kind call returns
    /// exactly `wall_clock_time`.
    pub fn set_realtime(&self, wall_clock_time: VirtualTime) {
        let mut state = self.state.lock().unwrap();
        let current = state.ticks + state.fake_extra_ticks;
        let diff_nanos = wall_clock_time.as_nanos_u128() as i128 - current.as_nanos_u128() as i128;
        state.realtime_delta = RealtimeDelta {
            secs: (diff_nanos / 1_000_000_000) as i64,
            nanos: (diff_nanos % 1_000_000_000) as i64,
        };
    }

    /// Records one call of `kind` and, if its threshold is exceeded, resets
    /// every kind's counters and returns the force-advance nudge to apply.
    fn record_and_maybe_trip(state: &mut State, kind: CallKind, is_main_thread: bool) -> Option<Duration> {
        if state.framerate.is_disabled() || kind == CallKind::Untracked {
            return None;
        }
        let Some(index) = kind.index() else { return None };
        let tripped = state.counters[index].record(is_main_thread);
        if !tripped {
            return None;
        }
        warn!("time call {kind:?} exceeded its threshold with no frame boundary; force-advancing the virtual clock");
        for counter in &mut state.counters {
            counter.reset();
        }
        Some(state.force_advance_nudge)
    }

    /// `add_delay(d)` (spec.md §4.3). Returns `true` when the accumulated
    /// debt now exceeds one frame's worth and the caller (only ever the main
    /// thread) must drive a synthetic NON_DRAW frame boundary to flush it.
    pub fn add_delay(&self, delay: Duration, is_main_thread: bool) -> bool {
        if tas_globalstate::is_own_code() {
            return false;
        }

        let (disabled, fastforward) = {
            let state = self.state.lock().unwrap();
            (state.framerate.is_disabled(), state.fastforward)
        };
        if disabled {
            self.non_det.add_delay(self.clock.as_ref(), delay, fastforward);
            return false;
        }

        let mut state = self.state.lock().unwrap();
        state.deferred_delay.add(delay);
        state.ticks += delay;
        is_main_thread && state.deferred_delay.exceeds(state.time_increment)
    }

    /// Re-check whether the debt still exceeds one frame, without adding any
    /// new delay. The frame-boundary orchestrator loops on this after each
    /// NON_DRAW boundary (mirrors the original's `while(addedDelay > ...)`).
    pub fn deferred_delay_exceeds_frame(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.deferred_delay.exceeds(state.time_increment)
    }

    /// `enter_frame_boundary()` (spec.md §4.3 steps 1-2). Advances `ticks` by
    /// the carry-corrected per-frame increment (unless debt already covers
    /// it) and returns that increment.
    pub fn enter_frame_boundary(&self) -> Duration {
        let mut state = self.state.lock().unwrap();
        if state.framerate.is_disabled() {
            let is_main_thread = true; // only the main thread ever drives a frame boundary.
            let fastforward = state.fastforward;
            drop(state);
            self.non_det.enter_frame_boundary(self.clock.as_ref(), is_main_thread, fastforward);
            return Duration::ZERO;
        }

        let framerate = state.framerate;
        let one_frame = state.carry.next_increment(framerate);
        state.time_increment = one_frame;

        if one_frame > state.deferred_delay.get() {
            state.ticks = state.last_enter_ticks + one_frame;
        }

        one_frame
    }

    /// `exit_frame_boundary()` (spec.md §4.3). Resets the per-kind call
    /// counters and consumes one frame's worth of deferred delay.
    pub fn exit_frame_boundary(&self) {
        let mut state = self.state.lock().unwrap();
        for counter in &mut state.counters {
            counter.reset();
        }
        if state.framerate.is_disabled() {
            drop(state);
            self.non_det.exit_frame_boundary(self.clock.as_ref());
            return;
        }
        let time_increment = state.time_increment;
        state.deferred_delay.consume_one_frame(time_increment);
        state.last_enter_ticks = state.ticks;
    }

    /// Step 7 of the frame-boundary pseudo-contract (spec.md §4.6): sleep on
    /// the real clock until `speed_divisor · one_frame` has elapsed since the
    /// last call, unless fast-forwarding.
    pub fn pace_real_time(&self, one_frame: Duration, speed_divisor: f64, fastforward: bool) {
        let mut state = self.state.lock().unwrap();
        let desired = state.last_enter_real_time + one_frame.mul_f64(speed_divisor.max(0.0));
        let now = self.clock.now();
        if !fastforward && desired > now {
            self.clock.sleep(desired - now);
        }
        state.last_enter_real_time = self.clock.now();
    }

    /// A transient offset the agent can advertise without permanently
    /// advancing the timer (`fakeAdvanceTimer` in the original).
    pub fn fake_advance(&self, extra: Duration) {
        self.state.lock().unwrap().fake_extra_ticks = extra;
    }

    pub fn current_ticks(&self) -> VirtualTime {
        let state = self.state.lock().unwrap();
        if state.framerate.is_disabled() {
            drop(state);
            return self.non_det.current_ticks();
        }
        state.ticks + state.fake_extra_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    /// A clock whose `now()` only advances when explicitly told to, so tests
    /// never depend on real wall-clock time.
    struct FakeClock {
        base: Instant,
        offset: StdMutex<Duration>,
        slept: StdMutex<Duration>,
    }

    impl FakeClock {
        fn new() -> Self {
            FakeClock {
                base: Instant::now(),
                offset: StdMutex::new(Duration::ZERO),
                slept: StdMutex::new(Duration::ZERO),
            }
        }
    }

    impl RealClock for FakeClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        fn sleep(&self, d: Duration) {
            *self.offset.lock().unwrap() += d;
            *self.slept.lock().unwrap() += d;
        }
    }

    fn timer_60fps() -> DeterministicTimer {
        DeterministicTimer::with_clock(
            FrameRate::new(60, 1),
            VirtualTime::ZERO,
            TimetrackConfig::all_disabled(),
            Box::new(FakeClock::new()),
        )
    }

    #[test]
    fn scenario_1_repeated_get_ticks_within_a_frame_are_stable() {
        // spec.md §8 scenario 1.
        let timer = timer_60fps();
        for _ in 0..10 {
            assert_eq!(
                timer.get_ticks(CallKind::ClockGettimeMonotonic, true),
                VirtualTime::ZERO
            );
        }
        timer.enter_frame_boundary();
        assert_eq!(timer.current_ticks(), VirtualTime::new(0, 16_666_666));
        timer.exit_frame_boundary();

        timer.enter_frame_boundary();
        assert_eq!(timer.current_ticks(), VirtualTime::new(0, 33_333_333));
        timer.exit_frame_boundary();

        for _ in 2..60 {
            timer.enter_frame_boundary();
            timer.exit_frame_boundary();
        }
        assert_eq!(timer.current_ticks(), VirtualTime::new(1, 0));
    }

    #[test]
    fn scenario_2_ntsc_framerate_after_1001_frames() {
        let timer = DeterministicTimer::with_clock(
            FrameRate::new(60000, 1001),
            VirtualTime::ZERO,
            TimetrackConfig::all_disabled(),
            Box::new(FakeClock::new()),
        );
        for _ in 0..1001 {
            timer.enter_frame_boundary();
            timer.exit_frame_boundary();
        }
        assert_eq!(timer.current_ticks(), VirtualTime::new(16, 683_333_333));
    }

    #[test]
    fn scenario_3_threshold_trip_advances_by_configured_nudge_and_resets_counters() {
        // spec.md §8 scenario 3, exercised with the spec's own illustrative
        // "1 ns" nudge rather than the original source's 1ms constant (see
        // the Open Questions ledger in SPEC_FULL.md).
        let mut timetrack = TimetrackConfig::all_disabled();
        timetrack.clock_gettime_monotonic = 100;
        let timer = DeterministicTimer::with_clock(
            FrameRate::new(60, 1),
            VirtualTime::ZERO,
            timetrack,
            Box::new(FakeClock::new()),
        );
        timer.set_force_advance_nudge(Duration::from_nanos(1));

        for _ in 0..100 {
            timer.get_ticks(CallKind::ClockGettimeMonotonic, true);
        }
        assert_eq!(timer.current_ticks(), VirtualTime::ZERO);

        timer.get_ticks(CallKind::ClockGettimeMonotonic, true);
        assert_eq!(timer.current_ticks(), VirtualTime::new(0, 1));
    }

    #[test]
    fn scenario_5_small_delay_absorbed_without_non_draw_frame_at_60hz() {
        let timer = timer_60fps();
        timer.enter_frame_boundary();
        let needs_boundary = timer.add_delay(Duration::from_millis(1), true);
        assert!(!needs_boundary, "1ms debt must fit inside a 16.6ms frame");
    }

    #[test]
    fn scenario_5_analog_at_6000hz_forces_a_non_draw_frame() {
        let timer = DeterministicTimer::with_clock(
            FrameRate::new(6000, 1),
            VirtualTime::ZERO,
            TimetrackConfig::all_disabled(),
            Box::new(FakeClock::new()),
        );
        timer.enter_frame_boundary(); // time_increment = 166_666ns
        let needs_boundary = timer.add_delay(Duration::from_millis(1), true);
        assert!(needs_boundary, "1ms debt must overflow a 166us frame");
    }

    #[test]
    fn own_code_calls_never_trip_the_threshold() {
        let mut timetrack = TimetrackConfig::all_disabled();
        timetrack.time = 1;
        let timer = DeterministicTimer::with_clock(
            FrameRate::new(60, 1),
            VirtualTime::ZERO,
            timetrack,
            Box::new(FakeClock::new()),
        );
        let _guard = tas_globalstate::enter_own_code();
        for _ in 0..10_000 {
            timer.get_ticks(CallKind::Time, true);
        }
        assert_eq!(timer.current_ticks(), VirtualTime::ZERO);
    }

    #[test]
    fn native_state_bypasses_the_virtual_clock_entirely() {
        let timer = timer_60fps();
        timer.enter_frame_boundary();
        assert_ne!(timer.current_ticks(), VirtualTime::ZERO);
        let _guard = tas_globalstate::enter_native();
        // Native calls go straight to the real clock, not the frame-advanced
        // virtual ticks computed above.
        let real = timer.get_ticks(CallKind::ClockGettimeMonotonic, true);
        assert_ne!(real, timer.current_ticks());
    }

    #[test]
    fn disabled_framerate_is_a_non_deterministic_passthrough() {
        let timer = DeterministicTimer::with_clock(
            FrameRate::new(0, 1),
            VirtualTime::ZERO,
            TimetrackConfig::all_disabled(),
            Box::new(FakeClock::new()),
        );
        assert_eq!(timer.enter_frame_boundary(), Duration::ZERO);
        assert!(!timer.add_delay(Duration::from_secs(1), true));
    }

    #[test]
    fn set_realtime_only_affects_realtime_kinds() {
        let timer = timer_60fps();
        timer.set_realtime(VirtualTime::new(1_700_000_000, 0));
        let wall = timer.ticks_for_display(CallKind::GetTimeOfDay, true);
        assert_eq!(wall, VirtualTime::new(1_700_000_000, 0));
        let monotonic = timer.ticks_for_display(CallKind::ClockGettimeMonotonic, true);
        assert_eq!(monotonic, VirtualTime::ZERO);
    }
}
