//! Clock abstraction for retry backoff and timestamp freshness.
//!
//! Production code uses `RealClock`. Tests inject `TestClock`, whose
//! `sleep` advances virtual time instantly and records each requested
//! delay so backoff schedules can be asserted without waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone, Utc};

/// Source of wall-clock time and sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns a monotonic instant for measuring elapsed durations.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock for tests.
///
/// Cloning shares the underlying time, so a clone handed to the code under
/// test and the one kept by the test observe the same progression.
#[derive(Debug, Clone)]
pub struct TestClock {
    offset_nanos: Arc<AtomicI64>,
    start_utc: DateTime<Utc>,
    start_instant: Instant,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl TestClock {
    /// Creates a test clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock starting at a fixed wall-clock time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            offset_nanos: Arc::new(AtomicI64::new(0)),
            start_utc: start,
            start_instant: Instant::now(),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates a test clock at the given UTC calendar date, midnight.
    pub fn on_date(year: i32, month: u32, day: u32) -> Self {
        let start = Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single().unwrap_or_default();
        Self::starting_at(start)
    }

    /// Moves time forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        let nanos = self.offset_nanos.load(Ordering::Acquire).max(0);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(0))
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.start_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.start_utc + chrono::Duration::nanoseconds(self.offset_nanos.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_time_sources() {
        let clock = TestClock::on_date(2024, 3, 9);
        let start = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(90));
        assert_eq!(clock.now_utc().to_rfc3339(), "2024-03-09T00:01:30+00:00");
    }

    #[tokio::test]
    async fn sleep_is_recorded_and_instant() {
        let clock = TestClock::new();

        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::from_secs(4)).await;

        assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(2), Duration::from_secs(4)]);
        assert_eq!(clock.elapsed(), Duration::from_secs(6));
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::new();
        let handle = clock.clone();

        handle.advance(Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }
}
