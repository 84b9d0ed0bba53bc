// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Deterministic corun simulator.
//!
//! Drives a [`Driver`] against the simulated device on a [`ManualClock`],
//! jumping from one event (a completion becoming deliverable, a retune, the
//! end of the ramp or of the run) to the next. The same configuration and
//! seed always produce the same result.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::{Clock, ManualClock};
use crate::companion::Companion;
use crate::config::RunConfig;
use crate::device::SimulatedDevice;
use crate::dispatcher::JobContext;
use crate::driver::Driver;
use crate::error::{DriverError, DriverResult};
use crate::stats::{collect, CpuUsage, RunResult, RunTotals};
use crate::types::JobId;
use crate::workload::IoStream;

/// One simulated run.
#[derive(Debug)]
pub struct Simulation {
    driver: Driver,
    clock: Arc<ManualClock>,
}

/// Fractional compute progress carried between intervals.
#[derive(Debug)]
struct ComputeTask {
    ctx: JobContext,
    cost_ns: u64,
    carry: f64,
    total: u64,
}

impl Simulation {
    /// Simulate with the companion's enforcement modelled in-process.
    pub fn new(config: RunConfig) -> Self {
        Self::with_companion(config, Companion::Simulated)
    }

    pub fn with_companion(config: RunConfig, companion: Companion) -> Self {
        let clock = Arc::new(ManualClock::new());
        let device = SimulatedDevice::new(
            config.device.clone(),
            config.engine.profile(&config.driver.flags),
            config.seed,
        );
        let driver = Driver::new(config, Arc::new(device), clock.clone(), companion);
        Self { driver, clock }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Run to completion and report. A simulation runs once.
    pub fn run(&self) -> DriverResult<RunResult> {
        let config = self.driver.config();
        tracing::info!(
            engine = config.engine.name(),
            runtime_ms = config.runtime_ms,
            jobs = config.jobs.len(),
            "Simulation started"
        );

        let mut totals = RunTotals::default();
        let outcome = self.drive(&mut totals);
        totals.teardown = self.driver.dispatcher().teardown();
        outcome?;

        let result = collect(&self.driver, &totals);
        tracing::info!(
            elapsed_ms = totals.elapsed_ns / 1_000_000,
            records = self.driver.recorder().total_records(),
            "Simulation finished"
        );
        Ok(result)
    }

    fn drive(&self, totals: &mut RunTotals) -> DriverResult<()> {
        let config = self.driver.config();
        let dispatcher = self.driver.dispatcher();
        let scheduler = self.driver.scheduler();
        let recorder = self.driver.recorder();

        let end = config.runtime_ms * 1_000_000;
        let ramp = config.ramp_ms * 1_000_000;
        let interval = config.scheduler.retune_interval_ns;
        let max_batch = dispatcher.max_batch();
        let delivery = config.engine.delivery(&config.driver.flags);
        let overhead = config.engine.profile(&config.driver.flags).submit_overhead_ns;

        let mut streams: Vec<IoStream> = self
            .driver
            .io_contexts()
            .into_iter()
            .filter_map(|ctx| IoStream::new(ctx, delivery, config.device.capacity_bytes, config.seed))
            .collect();
        let mut compute: Vec<ComputeTask> = self
            .driver
            .compute_contexts()
            .into_iter()
            .filter_map(|ctx| {
                Some(ComputeTask {
                    cost_ns: ctx.batch_cost_ns()?,
                    ctx,
                    carry: 0.0,
                    total: 0,
                })
            })
            .collect();

        let mut next_retune = interval;
        let mut measure_start = 0;
        let mut ramped = ramp == 0;
        let mut base_completed: HashMap<JobId, u64> = HashMap::new();

        loop {
            let now = self.clock.now_ns();
            let mut progressed = false;

            for stream in &mut streams {
                let done = dispatcher.poll_job(stream.context().id, max_batch)?;
                progressed |= !done.is_empty();
                stream.on_completed(done.len());
            }

            if !ramped && now >= ramp {
                recorder.reset();
                for task in &mut compute {
                    task.total = 0;
                }
                base_completed = streams
                    .iter()
                    .map(|s| (s.context().id, s.completed()))
                    .collect();
                measure_start = now;
                ramped = true;
                tracing::debug!(at_ms = now / 1_000_000, "Ramp finished, statistics reset");
            }

            if now < end {
                for stream in &mut streams {
                    while stream.wants_more() {
                        let offset = stream.next_offset();
                        match dispatcher.dispatch(
                            stream.context().id,
                            stream.op_kind(),
                            offset,
                            stream.block_size(),
                        ) {
                            Ok(_) => {
                                stream.on_submitted();
                                progressed = true;
                            }
                            Err(DriverError::Backpressure(_)) => {
                                totals.backpressure += 1;
                                break;
                            }
                            Err(e) => {
                                tracing::error!(job = %stream.context().name, error = %e, "Submission failed");
                                return Err(e);
                            }
                        }
                    }
                }
            }

            if now >= next_retune {
                let mut interval_ops = HashMap::new();
                for task in &mut compute {
                    let share = self.driver.compute_share(&task.ctx);
                    let ops = interval as f64 * share / task.cost_ns as f64 + task.carry;
                    let whole = ops.floor();
                    task.carry = ops - whole;
                    task.total += whole as u64;
                    interval_ops.insert(task.ctx.id, whole as u64);
                }
                let rates = self.driver.compute_rates(&interval_ops, interval);
                scheduler.retune_all(&rates);
                next_retune += interval;
            }

            let finished = !streams.is_empty()
                && streams.iter().all(|s| s.is_done() && s.in_flight() == 0);
            if now >= end || finished {
                break;
            }

            let next = [
                dispatcher.next_ready_at(),
                Some(next_retune),
                Some(end),
                (!ramped).then_some(ramp),
            ]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(end);

            if next > now {
                self.clock.advance_to(next);
            } else if !progressed {
                self.clock.advance(1);
            }
        }

        let stop = self.clock.now_ns().min(end);
        totals.elapsed_ns = stop.saturating_sub(measure_start);
        for stream in &streams {
            let id = stream.context().id;
            let ops = stream.completed() - base_completed.get(&id).copied().unwrap_or(0);
            totals
                .cpu
                .insert(id, CpuUsage::modelled(config.engine, delivery, ops, overhead, totals.elapsed_ns));
        }
        for task in &compute {
            totals.compute_ops.insert(task.ctx.id, task.total);
        }
        Ok(())
    }
}
