//! Wall-clock and monotonic time sources used across a labman session.
//!
//! The wall source stamps observations (it must agree with the host's
//! notion of epoch time, since those stamps end up in a store that
//! outlives the process). The monotonic source is used exclusively for
//! sleep/timeout math, which must never jump backward when the system
//! clock is adjusted (NTP step, DST, user correction).

use std::time::Instant;

/// A source of wall and monotonic time.
///
/// Implementations must be cheap to call repeatedly: `Supervisor::sleep`
/// and the Store's timestamp-uniqueness loop both call `now_wall` in a
/// tight loop under contention.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_wall(&self) -> f64;

    /// Seconds since an arbitrary, process-local, monotonically
    /// non-decreasing origin. Only differences between two calls are
    /// meaningful.
    fn now_monotonic(&self) -> f64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    origin: Option<Instant>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Some(Instant::now()),
        }
    }
}

impl Clock for SystemClock {
    fn now_wall(&self) -> f64 {
        let now = chrono::Utc::now();
        now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1e9
    }

    fn now_monotonic(&self) -> f64 {
        let origin = self.origin.unwrap_or_else(Instant::now);
        Instant::now().saturating_duration_since(origin).as_secs_f64()
    }
}

/// A deterministic clock for tests: wall and monotonic time both advance
/// only when [`FixedClock::advance`] is called, never on their own.
#[derive(Debug)]
pub struct FixedClock {
    inner: parking_lot::Mutex<f64>,
}

impl FixedClock {
    pub fn new(start_wall: f64) -> Self {
        Self {
            inner: parking_lot::Mutex::new(start_wall),
        }
    }

    pub fn advance(&self, seconds: f64) {
        *self.inner.lock() += seconds;
    }
}

impl Clock for FixedClock {
    fn now_wall(&self) -> f64 {
        *self.inner.lock()
    }

    fn now_monotonic(&self) -> f64 {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_monotonic_never_decreases() {
        let clock = SystemClock::new();
        let a = clock.now_monotonic();
        let b = clock.now_monotonic();
        assert!(b >= a);
    }

    #[test]
    fn fixed_clock_advances_on_command_only() {
        let clock = FixedClock::new(1000.0);
        assert_eq!(clock.now_wall(), 1000.0);
        assert_eq!(clock.now_wall(), 1000.0);
        clock.advance(5.0);
        assert_eq!(clock.now_wall(), 1005.0);
    }
}
