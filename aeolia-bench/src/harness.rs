// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Timing harness for driver overhead measurements.
//!
//! Runs an operation through a warmup phase and then collects one latency
//! sample per iteration.

use std::time::Instant;

/// A benchmark harness for measuring operation latency.
pub struct BenchmarkHarness {
    /// Number of warmup iterations before measurement
    warmup_iterations: u64,
    /// Number of measurement iterations
    measurement_iterations: u64,
}

impl BenchmarkHarness {
    pub fn new() -> Self {
        Self {
            warmup_iterations: 100,
            measurement_iterations: 10_000,
        }
    }

    pub fn warmup(mut self, iterations: u64) -> Self {
        self.warmup_iterations = iterations;
        self
    }

    pub fn iterations(mut self, iterations: u64) -> Self {
        self.measurement_iterations = iterations;
        self
    }

    /// Run a benchmark and collect latency samples in nanoseconds.
    ///
    /// The closure performs a single iteration of the measured operation.
    pub fn run<F>(&self, mut operation: F) -> Vec<u64>
    where
        F: FnMut(),
    {
        for _ in 0..self.warmup_iterations {
            operation();
        }

        let mut samples = Vec::with_capacity(self.measurement_iterations as usize);
        for _ in 0..self.measurement_iterations {
            let start = Instant::now();
            operation();
            samples.push(start.elapsed().as_nanos() as u64);
        }
        samples
    }

    /// Like [`run`](Self::run) but only times `operation`; `setup` runs
    /// before each iteration outside the timed region.
    pub fn run_with_setup<S, O>(&self, mut setup: S, mut operation: O) -> Vec<u64>
    where
        S: FnMut(),
        O: FnMut(),
    {
        for _ in 0..self.warmup_iterations {
            setup();
            operation();
        }

        let mut samples = Vec::with_capacity(self.measurement_iterations as usize);
        for _ in 0..self.measurement_iterations {
            setup();
            let start = Instant::now();
            operation();
            samples.push(start.elapsed().as_nanos() as u64);
        }
        samples
    }
}

impl Default for BenchmarkHarness {
    fn default() -> Self {
        Self::new()
    }
}
