// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Threaded run in real time.
//!
//! One thread per job context, pinned to its cores, plus the control loop
//! on the calling thread that retunes the scheduler every interval. I/O
//! threads keep up to `iodepth` requests in flight; compute threads run
//! fixed-cost batches duty-cycled by their cores' compute share.

use std::collections::HashMap;
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::time::TimeValLike;

use crate::affinity;
use crate::clock::MonotonicClock;
use crate::config::RunConfig;
use crate::dispatcher::JobContext;
use crate::driver::Driver;
use crate::error::{DriverError, DriverResult};
use crate::retry::RetryPolicy;
use crate::stats::{collect, CpuUsage, RunResult, RunTotals};
use crate::types::{CoreId, JobId};
use crate::workload::IoStream;

/// How long I/O threads keep reaping after submissions stop.
pub const DRAIN_GRACE: Duration = Duration::from_millis(100);

struct IoOutcome {
    id: JobId,
    cpu: CpuUsage,
    backpressure: u64,
}

struct ControlOutcome {
    measure_start_ns: u64,
    stop_ns: u64,
    compute_base: HashMap<JobId, u64>,
}

/// Executes one configuration with real threads.
#[derive(Debug)]
pub struct Runner {
    driver: Driver,
    abort: Arc<AtomicBool>,
    retry: RetryPolicy,
}

impl Runner {
    /// Open the configured device on a fresh monotonic clock.
    pub fn new(config: RunConfig) -> DriverResult<Self> {
        Ok(Self::from_driver(Driver::open(
            config,
            Arc::new(MonotonicClock::new()),
        )?))
    }

    pub fn from_driver(driver: Driver) -> Self {
        Self {
            driver,
            abort: Arc::new(AtomicBool::new(false)),
            retry: RetryPolicy::default(),
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Setting the flag stops the run early; it then ends in `Aborted`.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn run(&self) -> DriverResult<RunResult> {
        let config = self.driver.config();
        let delivery = config.engine.delivery(&config.driver.flags);

        let wanted: Vec<CoreId> = self.driver.board().cores();
        let offline = affinity::offline_cores(&wanted);
        if !offline.is_empty() {
            tracing::warn!(cores = ?offline, "Configured cores are not online, threads run unpinned");
        }

        let streams: Vec<IoStream> = self
            .driver
            .io_contexts()
            .into_iter()
            .filter_map(|ctx| IoStream::new(ctx, delivery, config.device.capacity_bytes, config.seed))
            .collect();
        let compute = self.driver.compute_contexts();
        let counters: Vec<(JobId, AtomicU64)> =
            compute.iter().map(|c| (c.id, AtomicU64::new(0))).collect();
        let stop = AtomicBool::new(false);
        let finished = AtomicUsize::new(0);
        let io_count = streams.len();

        tracing::info!(
            engine = config.engine.name(),
            io_threads = io_count,
            compute_threads = compute.len(),
            runtime_ms = config.runtime_ms,
            "Run started"
        );

        let (io_results, control) = thread::scope(|s| {
            let io_handles: Vec<_> = streams
                .into_iter()
                .map(|stream| {
                    let (stop, finished) = (&stop, &finished);
                    s.spawn(move || {
                        let out = self.io_worker(stream, stop);
                        finished.fetch_add(1, Ordering::AcqRel);
                        out
                    })
                })
                .collect();

            for (ctx, (_, counter)) in compute.iter().zip(&counters) {
                let stop = &stop;
                s.spawn(move || self.compute_worker(ctx, counter, stop));
            }

            let control = self.control_loop(&counters, &finished, io_count);
            stop.store(true, Ordering::Release);

            let io_results: Vec<DriverResult<IoOutcome>> = io_handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(DriverError::Aborted {
                            reason: "I/O thread panicked".to_string(),
                        })
                    })
                })
                .collect();
            (io_results, control)
        });

        let mut totals = RunTotals {
            teardown: self.driver.dispatcher().teardown(),
            elapsed_ns: control.stop_ns.saturating_sub(control.measure_start_ns),
            ..RunTotals::default()
        };
        for (id, counter) in &counters {
            let base = control.compute_base.get(id).copied().unwrap_or(0);
            totals
                .compute_ops
                .insert(*id, counter.load(Ordering::Acquire).saturating_sub(base));
        }

        let mut first_error = None;
        for outcome in io_results {
            match outcome {
                Ok(o) => {
                    totals.backpressure += o.backpressure;
                    totals.cpu.insert(o.id, o.cpu);
                }
                Err(e) => {
                    tracing::error!(error = %e, "I/O thread failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if self.abort.load(Ordering::Acquire) {
            return Err(DriverError::Aborted {
                reason: "run cancelled".to_string(),
            });
        }

        tracing::info!(
            elapsed_ms = totals.elapsed_ns / 1_000_000,
            drained = totals.teardown.drained,
            abandoned = totals.teardown.abandoned,
            "Run finished"
        );
        Ok(collect(&self.driver, &totals))
    }

    /// Pin and renice the calling thread; failures only cost accuracy.
    fn place(&self, ctx: &JobContext) {
        if let Err(e) = affinity::pin_current_thread(&ctx.cores) {
            tracing::warn!(job = %ctx.name, error = %e, "Could not pin thread");
        }
        if ctx.nice.value() != 0 {
            if let Err(e) = affinity::set_current_nice(ctx.nice) {
                tracing::warn!(job = %ctx.name, nice = ctx.nice.value(), error = %e, "Could not set nice");
            }
        }
    }

    fn io_worker(&self, mut stream: IoStream, stop: &AtomicBool) -> DriverResult<IoOutcome> {
        let ctx = stream.context().clone();
        self.place(&ctx);

        let started = Instant::now();
        let cpu_start = thread_cpu_ns();
        let dispatcher = self.driver.dispatcher();
        let max_batch = dispatcher.max_batch();
        let (op, bs) = (stream.op_kind(), stream.block_size());
        let mut backpressure = 0;

        let result = (|| -> DriverResult<()> {
            while !stop.load(Ordering::Acquire) && !stream.is_done() {
                let reaped = dispatcher.poll_job(ctx.id, max_batch)?.len();
                stream.on_completed(reaped);

                while stream.wants_more() {
                    let offset = stream.next_offset();
                    self.retry.run(|attempt| {
                        if attempt > 1 {
                            backpressure += 1;
                            let n = dispatcher.poll_job(ctx.id, max_batch)?.len();
                            stream.on_completed(n);
                        }
                        dispatcher.dispatch(ctx.id, op, offset, bs)
                    })?;
                    stream.on_submitted();
                }

                if reaped == 0 {
                    thread::yield_now();
                }
            }

            let deadline = Instant::now() + DRAIN_GRACE;
            while stream.in_flight() > 0 && Instant::now() < deadline {
                let n = dispatcher.poll_job(ctx.id, max_batch)?.len();
                stream.on_completed(n);
                if n == 0 {
                    thread::yield_now();
                }
            }
            Ok(())
        })();

        if result.is_err() {
            self.abort.store(true, Ordering::Release);
        }
        result?;

        let elapsed = started.elapsed().as_nanos() as u64;
        let cpu = match (cpu_start, thread_cpu_ns()) {
            (Some((u0, s0)), Some((u1, s1))) => {
                CpuUsage::measured(u1.saturating_sub(u0), s1.saturating_sub(s0), elapsed)
            }
            _ => CpuUsage::default(),
        };

        tracing::debug!(job = %ctx.name, completed = stream.completed(), "I/O thread done");
        Ok(IoOutcome {
            id: ctx.id,
            cpu,
            backpressure,
        })
    }

    fn compute_worker(&self, ctx: &JobContext, counter: &AtomicU64, stop: &AtomicBool) {
        self.place(ctx);
        let cost = Duration::from_nanos(ctx.batch_cost_ns().unwrap_or(1_000_000));

        while !stop.load(Ordering::Acquire) {
            let share = self.driver.compute_share(ctx);
            if share <= 0.0 {
                thread::sleep(cost);
                continue;
            }
            spin_for(cost);
            counter.fetch_add(1, Ordering::AcqRel);
            if share < 1.0 {
                thread::sleep(cost.mul_f64((1.0 - share) / share));
            }
        }
    }

    fn control_loop(
        &self,
        counters: &[(JobId, AtomicU64)],
        finished: &AtomicUsize,
        io_count: usize,
    ) -> ControlOutcome {
        let config = self.driver.config();
        let clock = self.driver.clock();
        let scheduler = self.driver.scheduler();
        let end_ns = config.runtime_ms * 1_000_000;
        let ramp_ns = config.ramp_ms * 1_000_000;
        let interval = Duration::from_nanos(config.scheduler.retune_interval_ns);

        let snapshot = || -> HashMap<JobId, u64> {
            counters
                .iter()
                .map(|(id, c)| (*id, c.load(Ordering::Acquire)))
                .collect()
        };

        let mut outcome = ControlOutcome {
            measure_start_ns: clock.now_ns(),
            stop_ns: 0,
            compute_base: HashMap::new(),
        };
        let mut ramped = ramp_ns == 0;
        let mut last = snapshot();
        let mut last_ns = clock.now_ns();

        loop {
            let remaining = end_ns.saturating_sub(clock.now_ns());
            thread::sleep(interval.min(Duration::from_nanos(remaining.max(1))));
            let now = clock.now_ns();

            if self.abort.load(Ordering::Acquire) {
                tracing::warn!(at_ms = now / 1_000_000, "Run aborted");
                outcome.stop_ns = now;
                break;
            }

            let current = snapshot();
            if !ramped && now >= ramp_ns {
                self.driver.recorder().reset();
                outcome.compute_base = current.clone();
                outcome.measure_start_ns = now;
                ramped = true;
                tracing::debug!(at_ms = now / 1_000_000, "Ramp finished, statistics reset");
            }

            let delta: HashMap<JobId, u64> = current
                .iter()
                .map(|(id, v)| (*id, v.saturating_sub(last.get(id).copied().unwrap_or(0))))
                .collect();
            let rates = self.driver.compute_rates(&delta, now.saturating_sub(last_ns));
            scheduler.retune_all(&rates);
            last = current;
            last_ns = now;

            if now >= end_ns || finished.load(Ordering::Acquire) == io_count {
                outcome.stop_ns = now;
                break;
            }
        }
        outcome
    }
}

/// User and system CPU time of the calling thread, in nanoseconds.
fn thread_cpu_ns() -> Option<(u64, u64)> {
    let usage = getrusage(UsageWho::RUSAGE_THREAD).ok()?;
    Some((
        usage.user_time().num_nanoseconds().max(0) as u64,
        usage.system_time().num_nanoseconds().max(0) as u64,
    ))
}

/// Burn CPU for `d`.
fn spin_for(d: Duration) {
    let start = Instant::now();
    let mut x = 1u64;
    while start.elapsed() < d {
        x = black_box(x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407));
    }
}
