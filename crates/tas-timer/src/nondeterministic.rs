//! The `framerate_num == 0` passthrough mode (spec.md §4.3): real monotonic
//! time minus the accumulated frame-boundary overhead, so disabling the
//! deterministic timer doesn't also freeze the game.
//!
//! Ported from `NonDeterministicTimer.cpp`: the same accumulate-deltas
//! approach, the same "subtract the last frame-boundary pause once" rule
//! (`frameBoundaryDur`), the same fast-forward 3x multiplier.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tas_protocol::virtual_time::VirtualTime;

use crate::clock::RealClock;

/// Frame-boundary pauses shorter than this are assumed to be normal
/// scheduling jitter, not an actual wait worth excluding (matches the
/// original's `50_000_000` ns literal).
const MIN_EXCLUDED_FRAME_BOUNDARY: Duration = Duration::from_millis(50);

struct State {
    ticks: VirtualTime,
    last_enter_ticks: VirtualTime,
    last_sample: Instant,
    in_frame_boundary: bool,
    last_enter_time: Instant,
    last_exit_time: Instant,
}

pub struct NonDeterministicTimer {
    state: Mutex<State>,
}

impl NonDeterministicTimer {
    pub fn new(clock: &dyn RealClock) -> Self {
        let now = clock.now();
        NonDeterministicTimer {
            state: Mutex::new(State {
                ticks: VirtualTime::ZERO,
                last_enter_ticks: VirtualTime::ZERO,
                last_sample: now,
                in_frame_boundary: false,
                last_enter_time: now,
                last_exit_time: now,
            }),
        }
    }

    pub fn get_ticks(&self, clock: &dyn RealClock, is_main_thread: bool, fastforward: bool) -> VirtualTime {
        let mut state = self.state.lock().unwrap();
        if state.in_frame_boundary || !is_main_thread {
            return state.ticks;
        }

        let now = clock.now();
        let mut delta = now.saturating_duration_since(state.last_sample);
        if fastforward {
            delta = delta.saturating_mul(3);
        }

        let frame_boundary_dur = state.last_exit_time.saturating_duration_since(state.last_enter_time);
        if frame_boundary_dur > MIN_EXCLUDED_FRAME_BOUNDARY {
            delta = delta.saturating_sub(frame_boundary_dur);
            state.last_enter_time = state.last_exit_time;
        }

        state.ticks += delta;
        state.last_sample = now;
        state.ticks
    }

    pub fn enter_frame_boundary(&self, clock: &dyn RealClock, is_main_thread: bool, fastforward: bool) {
        self.get_ticks(clock, is_main_thread, fastforward);
        let mut state = self.state.lock().unwrap();
        state.in_frame_boundary = true;
        state.last_enter_time = clock.now();
        state.last_enter_ticks = state.ticks;
    }

    pub fn exit_frame_boundary(&self, clock: &dyn RealClock) {
        let mut state = self.state.lock().unwrap();
        state.last_exit_time = clock.now();
        state.in_frame_boundary = false;
    }

    pub fn add_delay(&self, clock: &dyn RealClock, delay: Duration, fastforward: bool) {
        if !fastforward {
            clock.sleep(delay);
        }
    }

    pub fn current_ticks(&self) -> VirtualTime {
        self.state.lock().unwrap().ticks
    }
}
