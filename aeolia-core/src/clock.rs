// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Run clocks.
//!
//! All timestamps in the core are nanoseconds since the start of the run.
//! Threaded runs use [`MonotonicClock`]; the simulator and tests drive a
//! [`ManualClock`] by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of run-relative nanosecond timestamps.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Wall clock anchored at construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, delta_ns: u64) {
        self.now.fetch_add(delta_ns, Ordering::AcqRel);
    }

    /// Move forward to `at_ns`; never moves backwards.
    pub fn advance_to(&self, at_ns: u64) {
        self.now.fetch_max(at_ns, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ns(), 0);
        clock.advance(500);
        clock.advance_to(2_000);
        clock.advance_to(1_000);
        assert_eq!(clock.now_ns(), 2_000);
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(clock.now_ns() > a);
    }
}
