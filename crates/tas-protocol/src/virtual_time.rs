//! The synthetic monotonic time source served to the game (spec.md §3, "VirtualTime").

use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

/// A point in the agent's virtual timeline: a monotonic `(seconds, nanoseconds)`
/// offset, always held normalized (`nanos < 1_000_000_000`).
///
/// The monotonic component never decreases across calls observed by a single
/// logical thread; callers that need to fake wall-clock time do so through
/// the separate `realtime_delta`, not by perturbing this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(C)]
pub struct VirtualTime {
    secs: u64,
    nanos: u32,
}

const NANOS_PER_SEC: u32 = 1_000_000_000;

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime { secs: 0, nanos: 0 };

    pub fn new(secs: u64, nanos: u32) -> Self {
        let extra_secs = (nanos / NANOS_PER_SEC) as u64;
        VirtualTime {
            secs: secs + extra_secs,
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    pub fn from_duration(d: Duration) -> Self {
        VirtualTime::new(d.as_secs(), d.subsec_nanos())
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(self.secs, self.nanos)
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn as_nanos_u128(&self) -> u128 {
        self.secs as u128 * NANOS_PER_SEC as u128 + self.nanos as u128
    }

    pub fn checked_sub(&self, other: VirtualTime) -> Option<VirtualTime> {
        self.as_nanos_u128()
            .checked_sub(other.as_nanos_u128())
            .map(|n| VirtualTime::new((n / NANOS_PER_SEC as u128) as u64, (n % NANOS_PER_SEC as u128) as u32))
    }

    /// Saturating subtraction; clamps to `ZERO` rather than panicking.
    pub fn saturating_sub(&self, other: VirtualTime) -> VirtualTime {
        self.checked_sub(other).unwrap_or(VirtualTime::ZERO)
    }
}

impl Add<Duration> for VirtualTime {
    type Output = VirtualTime;
    fn add(self, rhs: Duration) -> VirtualTime {
        VirtualTime::new(self.secs + rhs.as_secs(), self.nanos + rhs.subsec_nanos())
    }
}

impl AddAssign<Duration> for VirtualTime {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for VirtualTime {
    type Output = Duration;
    /// Panics on underflow, matching `Instant - Instant`'s contract. Use
    /// [`VirtualTime::checked_sub`] when the ordering isn't already known.
    fn sub(self, rhs: VirtualTime) -> Duration {
        self.checked_sub(rhs)
            .expect("VirtualTime subtraction underflow")
            .as_duration()
    }
}

/// The realtime-delta the user can apply on top of monotonic virtual time to
/// fake wall-clock time (spec.md §3), kept as a separate signed offset so
/// that setting it never perturbs the monotonic invariant above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RealtimeDelta {
    pub secs: i64,
    pub nanos: i64,
}

impl RealtimeDelta {
    pub fn apply(&self, base: VirtualTime) -> VirtualTime {
        let total = base.as_nanos_u128() as i128
            + self.secs as i128 * NANOS_PER_SEC as i128
            + self.nanos as i128;
        let total = total.max(0) as u128;
        VirtualTime::new((total / NANOS_PER_SEC as u128) as u64, (total % NANOS_PER_SEC as u128) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_overflowing_nanos() {
        let t = VirtualTime::new(0, 1_500_000_000);
        assert_eq!(t.secs(), 1);
        assert_eq!(t.nanos(), 500_000_000);
    }

    #[test]
    fn add_duration_carries() {
        let t = VirtualTime::new(0, 900_000_000) + Duration::new(0, 200_000_000);
        assert_eq!(t, VirtualTime::new(1, 100_000_000));
    }

    #[test]
    fn monotonic_non_decreasing_under_repeated_add() {
        let mut t = VirtualTime::ZERO;
        let mut prev = t;
        for _ in 0..1000 {
            t += Duration::from_nanos(16_666_666);
            assert!(t >= prev);
            prev = t;
        }
    }

    #[test]
    fn saturating_sub_clamps() {
        let a = VirtualTime::new(0, 0);
        let b = VirtualTime::new(1, 0);
        assert_eq!(a.saturating_sub(b), VirtualTime::ZERO);
    }
}
