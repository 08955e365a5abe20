//! The deterministic virtual clock (spec.md §4.3, component C3): the single
//! source of truth every intercepted time-returning or time-consuming call
//! reads from or advances, so the game observes a clock that only moves in
//! response to the agent's own frame-boundary and sleep/wait bookkeeping,
//! never real wall-clock jitter.
//!
//! Grounded on `DeterministicTimer.{h,cpp}`; `clock.rs`'s `RealClock`
//! abstraction is the one seam this port adds over the original so tests can
//! drive the timer with a synthetic clock instead of real sleeps.

pub mod clock;
pub mod deterministic;
pub mod frame_type;
pub mod nondeterministic;
pub mod sleep_debt;

pub use clock::{RealClock, SystemClock};
pub use deterministic::DeterministicTimer;
pub use frame_type::FrameType;
pub use nondeterministic::NonDeterministicTimer;
pub use sleep_debt::SleepDebt;
