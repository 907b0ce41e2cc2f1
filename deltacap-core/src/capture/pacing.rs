//! Frame cadence and cancellation.
//!
//! The capture loop sleeps until each cycle's deadline on a condition
//! variable instead of spinning, so `stop` can wake it immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Stop flag that sleeping threads can wait on.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake every waiter.
    pub fn trigger(&self) {
        let _guard = self.lock.lock();
        self.stopped.store(true, Ordering::SeqCst);
        self.cvar.notify_all();
    }

    /// Clear the flag before a new run.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Block until `deadline` or until a stop is requested.
    ///
    /// Returns `true` if a stop was requested. A deadline already in the
    /// past returns immediately.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut guard = self.lock.lock();
        while !self.stopped.load(Ordering::SeqCst) {
            if self.cvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Fixed-interval pacer for one capture loop.
///
/// Each cycle gets `interval` measured from its own start; an overrun
/// cycle is followed immediately by the next one with no catch-up.
#[derive(Debug, Clone, Copy)]
pub struct FramePacer {
    interval: Duration,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline for a cycle that started at `cycle_start`.
    pub fn deadline(&self, cycle_start: Instant) -> Instant {
        cycle_start + self.interval
    }

    /// Time left in the cycle, or zero after an overrun.
    pub fn remaining(&self, cycle_start: Instant) -> Duration {
        self.interval.saturating_sub(cycle_start.elapsed())
    }

    /// Wait out the rest of the cycle. Returns `true` if `stop` fired.
    pub fn pace(&self, cycle_start: Instant, stop: &StopSignal) -> bool {
        if self.remaining(cycle_start).is_zero() {
            return stop.is_triggered();
        }
        stop.wait_until(self.deadline(cycle_start))
    }
}

// ── Tests ────────────────────────────────────────────────────────
