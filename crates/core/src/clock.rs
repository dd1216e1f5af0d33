use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Source of both monotonic (for breaker timing, deadlines) and wall
/// (for calendar boundaries) time. A trait so tests can substitute a
/// controllable clock without touching the real one.
pub trait Clock: Send + Sync {
    /// Nanoseconds on a monotonic, never-decreasing timeline. Not
    /// comparable across process restarts.
    fn monotonic_ns(&self) -> u64;
    fn wall_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock {
    start: once_cell_instant::OnceInstant,
}

mod once_cell_instant {
    use std::sync::OnceLock;
    use std::time::Instant;

    #[derive(Debug, Default)]
    pub struct OnceInstant(OnceLock<Instant>);

    impl OnceInstant {
        pub fn get(&self) -> Instant {
            *self.0.get_or_init(Instant::now)
        }
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn monotonic_ns(&self) -> u64 {
        self.start.get().elapsed().as_nanos() as u64
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock with externally controllable monotonic and wall time, used
/// in tests to simulate cooldown elapsing or day rollover without
/// sleeping.
pub struct TestClock {
    monotonic_ns: std::sync::atomic::AtomicU64,
    wall: parking_lot::Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            monotonic_ns: std::sync::atomic::AtomicU64::new(0),
            wall: parking_lot::Mutex::new(wall),
        }
    }

    pub fn advance_monotonic(&self, delta_ns: u64) {
        self.monotonic_ns
            .fetch_add(delta_ns, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_wall(&self, wall: DateTime<Utc>) {
        *self.wall.lock() = wall;
    }
}

impl Clock for TestClock {
    fn monotonic_ns(&self) -> u64 {
        self.monotonic_ns.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn wall_now(&self) -> DateTime<Utc> {
        *self.wall.lock()
    }
}

/// The local calendar date and fractional hour for `at` in `tz`.
pub fn local_date_and_hour(at: DateTime<Utc>, tz: Tz) -> (NaiveDate, f64) {
    let local = at.with_timezone(&tz);
    let hour = local.hour() as f64
        + local.minute() as f64 / 60.0
        + local.second() as f64 / 3600.0;
    (local.date_naive(), hour)
}

/// The integer hour-of-day bucket `[0, 24)` for `at` in `tz`.
pub fn local_hour_bucket(at: DateTime<Utc>, tz: Tz) -> usize {
    at.with_timezone(&tz).hour() as usize
}

/// Reconstruct a `DateTime<Utc>` for midnight local time on `date` in `tz`.
pub fn local_midnight_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("valid time"))
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid time")))
        .with_timezone(&Utc)
}
