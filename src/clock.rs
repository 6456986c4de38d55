//! Time sources for the control loop.
//!
//! The hysteresis window is measured on a monotonic clock; session names use
//! wall-clock seconds. Both come from one `Clock` so tests can drive them
//! together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send {
    /// Monotonic instant used for elapsed-time decisions.
    fn now(&self) -> Instant;

    /// Wall-clock time used for naming.
    fn wall_now(&self) -> SystemTime;

    /// Block the loop for `duration` (retry backoff).
    fn sleep(&self, duration: Duration);
}

/// Real time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: SystemTime,
    offset_nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start at `unix_secs` on the wall clock.
    pub fn starting_at(unix_secs: u64) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: UNIX_EPOCH + Duration::from_secs(unix_secs),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(1_700_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall_now(&self) -> SystemTime {
        self.wall_origin + self.elapsed()
    }

    /// Returns at once, moving the clock forward instead.
    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn wall_now(&self) -> SystemTime {
        (**self).wall_now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}
