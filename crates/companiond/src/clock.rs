//! Clock sources.
//!
//! "Elapsed realtime" keeps counting through suspend (CLOCK_BOOTTIME), uptime
//! does not (CLOCK_MONOTONIC). Wall time is microsecond precision scaled to
//! nanoseconds.

use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    /// Nanoseconds since boot, including time spent asleep
    fn elapsed_realtime_nanos(&self) -> i64;

    /// Nanoseconds since boot, excluding time spent asleep
    fn uptime_nanos(&self) -> i64;

    /// Nanoseconds since the Unix epoch
    fn wall_nanos(&self) -> i64;

    fn elapsed_realtime_ms(&self) -> i64 {
        self.elapsed_realtime_nanos() / 1_000_000
    }

    fn uptime_ms(&self) -> i64 {
        self.uptime_nanos() / 1_000_000
    }

    fn wall_ms(&self) -> i64 {
        self.wall_nanos() / 1_000_000
    }
}

/// Kernel-backed clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

fn clock_nanos(id: libc::clockid_t) -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(id, &mut ts) };
    if rc != 0 {
        return 0;
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

impl Clock for SystemClock {
    fn elapsed_realtime_nanos(&self) -> i64 {
        clock_nanos(libc::CLOCK_BOOTTIME)
    }

    fn uptime_nanos(&self) -> i64 {
        clock_nanos(libc::CLOCK_MONOTONIC)
    }

    fn wall_nanos(&self) -> i64 {
        chrono::Utc::now().timestamp_micros() * 1_000
    }
}

/// Hand-driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed_nanos: AtomicI64,
    wall_nanos: AtomicI64,
}

impl ManualClock {
    pub fn new(elapsed_ms: i64, wall_ms: i64) -> Self {
        Self {
            elapsed_nanos: AtomicI64::new(elapsed_ms * 1_000_000),
            wall_nanos: AtomicI64::new(wall_ms * 1_000_000),
        }
    }

    /// Move both clocks forward
    pub fn advance_ms(&self, ms: i64) {
        self.elapsed_nanos.fetch_add(ms * 1_000_000, Ordering::SeqCst);
        self.wall_nanos.fetch_add(ms * 1_000_000, Ordering::SeqCst);
    }

    /// Set the wall clock alone, as a user or time sync would
    pub fn set_wall_ms(&self, ms: i64) {
        self.wall_nanos.store(ms * 1_000_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn elapsed_realtime_nanos(&self) -> i64 {
        self.elapsed_nanos.load(Ordering::SeqCst)
    }

    fn uptime_nanos(&self) -> i64 {
        self.elapsed_nanos.load(Ordering::SeqCst)
    }

    fn wall_nanos(&self) -> i64 {
        self.wall_nanos.load(Ordering::SeqCst)
    }
}
