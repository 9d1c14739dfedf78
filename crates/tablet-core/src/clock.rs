//! The revision clock (Design Notes, "Clock source").
//!
//! The original uses a monotonically adjusted wall clock to assign revisions. Here it is a
//! monotonic counter seeded from wall-clock nanoseconds, bounded below by
//! `max(latest_range_revision, last_assigned) + 1`, and re-seeded from the wall clock whenever
//! it lags behind. Tests inject a virtual clock rather than depending on real time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};


/// Source of wall-clock nanoseconds, abstracted so tests can supply a virtual clock.
pub trait WallClock: Send + Sync {
    /// Current time in nanoseconds since an arbitrary but fixed epoch.
    fn now_nanos(&self) -> i64;
}

/// The real system clock, backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_nanos(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        i64::try_from(now.as_nanos()).unwrap_or(i64::MAX)
    }
}

/// A revision clock assigning monotonically non-decreasing server-side revisions.
///
/// `next(floor)` never returns a value less than `floor`, and never returns a value less
/// than any value it has previously returned.
#[derive(Debug)]
pub struct RevisionClock<C> {
    wall_clock:    C,
    last_assigned: AtomicI64,
}

impl<C: WallClock> RevisionClock<C> {
    #[must_use]
    pub fn new(wall_clock: C) -> Self {
        let seed = wall_clock.now_nanos();
        Self {
            wall_clock,
            last_assigned: AtomicI64::new(seed),
        }
    }

    /// Returns the next revision to assign, which is at least `floor` (the range's
    /// `latest_revision`, per §4.8) and strictly greater than every revision this clock has
    /// previously handed out.
    pub fn next(&self, floor: i64) -> i64 {
        loop {
            let prev = self.last_assigned.load(Ordering::Acquire);
            let wall = self.wall_clock.now_nanos();

            // Re-seed from the wall clock whenever it has caught up past our counter, so
            // the clock doesn't permanently drift from real time under bursty load.
            let candidate = prev.max(floor).max(wall).saturating_add(1).max(floor + 1);

            if self.last_assigned
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    /// The most recent revision handed out, without assigning a new one.
    #[must_use]
    pub fn last_assigned(&self) -> i64 {
        self.last_assigned.load(Ordering::Acquire)
    }

    /// The underlying wall-clock reading, independent of any floor. The qualify stage's
    /// clock-skew guard (§4.8, §8 S4) reads this directly rather than through [`Self::next`],
    /// since `next` silently clamps to the floor and would never surface a lagging clock.
    #[must_use]
    pub fn wall_now(&self) -> i64 {
        self.wall_clock.now_nanos()
    }
}
