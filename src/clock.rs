//! Timestamp sources for trace records

use std::cell::Cell;

/// Monotonic microsecond clock
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// `CLOCK_MONOTONIC`, in microseconds.
///
/// Unlike `Instant`, the raw reading is comparable across processes on the
/// same boot, which keeps traces from separate runs on one timeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is
        // always available on the supported platforms.
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000 + (ts.tv_nsec as u64) / 1_000
    }
}

/// Clock advanced by hand, for deterministic traces
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
    step: u64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Cell::new(start),
            step: 0,
        }
    }

    /// Clock that moves forward by `step` after every reading
    pub fn ticking(start: u64, step: u64) -> Self {
        Self {
            now: Cell::new(start),
            step,
        }
    }

    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}
