//! Clock abstraction for deterministic time control.
//!
//! Components never call `Utc::now()` directly. They receive a [`Clock`] at
//! construction, which lets tests pin the wall clock to a known instant and
//! move it across deadlines without sleeping.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now_system(&self) -> SystemTime;

    /// Current wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from(self.now_system())
    }
}

/// Production clock backed by the system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Controllable clock for tests.
///
/// Time is stored as nanoseconds since the Unix epoch in an atomic counter,
/// so clones observe each other's adjustments. Time only moves when a test
/// calls [`TestClock::advance`] or [`TestClock::jump_to`].
#[derive(Debug, Clone)]
pub struct TestClock {
    system_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Creates a test clock pinned to the given start time.
    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            system_ns: Arc::new(AtomicU64::new(nanos_since_epoch(start))),
        }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let ns = saturating_ns(duration.as_nanos());
        self.system_ns.fetch_add(ns, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute instant, forward or backward.
    pub fn jump_to(&self, instant: SystemTime) {
        self.system_ns
            .store(nanos_since_epoch(instant), Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::SeqCst))
    }
}

fn nanos_since_epoch(instant: SystemTime) -> u64 {
    instant
        .duration_since(UNIX_EPOCH)
        .map(|d| saturating_ns(d.as_nanos()))
        .unwrap_or(0)
}

fn saturating_ns(ns: u128) -> u64 {
    u64::try_from(ns.min(u128::from(u64::MAX))).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_wall_clock() {
        let clock = TestClock::starting_at(UNIX_EPOCH + Duration::from_secs(1_000));
        let before = clock.now_utc();
        clock.advance(Duration::from_secs(90));
        let after = clock.now_utc();
        assert_eq!((after - before).num_seconds(), 90);
    }

    #[test]
    fn clones_share_the_same_time() {
        let clock = TestClock::starting_at(UNIX_EPOCH + Duration::from_secs(5));
        let observer = clock.clone();
        clock.advance(Duration::from_secs(60));
        assert_eq!(observer.now_system(), clock.now_system());
    }

    #[test]
    fn jump_to_sets_absolute_time() {
        let clock = TestClock::new();
        let target = UNIX_EPOCH + Duration::from_secs(42);
        clock.jump_to(target);
        assert_eq!(clock.now_system(), target);
    }

    #[test]
    fn real_clock_is_monotonic_enough_for_timestamps() {
        let clock = RealClock;
        let a = clock.now_utc();
        let b = clock.now_utc();
        assert!(b >= a);
    }
}
