//! The agent's one real window onto wall-clock time. Both timers call
//! through here instead of `std::time::Instant`/`thread::sleep` directly, so
//! tests can drive them with a synthetic clock instead of real sleeps.

use std::time::{Duration, Instant};

pub trait RealClock: Send + Sync {
    fn now(&self) -> Instant;
    /// Blocking sleep for (approximately) `d`; a no-op for `Duration::ZERO`.
    fn sleep(&self, d: Duration);
}

/// The production clock: `Instant::now()` and `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl RealClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}
