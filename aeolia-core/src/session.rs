// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Engine-plugin facade.
//!
//! Mirrors the load generator's I/O engine contract: `init` once, `queue`
//! requests, `commit` them, reap with `getevents`/`event`, and `close`.
//! A session that is dropped without `close` still tears down.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::clock::MonotonicClock;
use crate::config::RunConfig;
use crate::dispatcher::TeardownReport;
use crate::driver::Driver;
use crate::error::{DriverError, DriverResult};
use crate::request::{CompletionRecord, OpKind};
use crate::types::JobId;

/// Answer to [`Session::queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Held until the next `commit`.
    Queued,
    /// The job already has `iodepth` requests queued or in flight.
    Busy,
}

#[derive(Debug, Clone, Copy)]
struct PendingIo {
    job: JobId,
    op: OpKind,
    offset: u64,
    length: u32,
}

#[derive(Debug)]
pub struct Session {
    driver: Driver,
    pending: VecDeque<PendingIo>,
    /// Queued plus in-flight requests per job.
    busy: HashMap<JobId, u32>,
    events: Vec<CompletionRecord>,
    closed: bool,
}

impl Session {
    /// Open the configured device and start a session on the wall clock.
    pub fn init(config: RunConfig) -> DriverResult<Self> {
        let driver = Driver::open(config, Arc::new(MonotonicClock::new()))?;
        Ok(Self::with_driver(driver))
    }

    pub fn with_driver(driver: Driver) -> Self {
        Self {
            driver,
            pending: VecDeque::new(),
            busy: HashMap::new(),
            events: Vec::new(),
            closed: false,
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Requests waiting for `commit`.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Hold a request for the next `commit`.
    pub fn queue(
        &mut self,
        job: JobId,
        op: OpKind,
        offset: u64,
        length: u32,
    ) -> DriverResult<QueueStatus> {
        let depth = self
            .driver
            .dispatcher()
            .job(job)
            .and_then(|c| c.iodepth())
            .ok_or(DriverError::UnknownJob(job))?;

        let busy = self.busy.entry(job).or_default();
        if *busy >= depth {
            return Ok(QueueStatus::Busy);
        }
        *busy += 1;
        self.pending.push_back(PendingIo {
            job,
            op,
            offset,
            length,
        });
        Ok(QueueStatus::Queued)
    }

    /// Submit queued requests in order.
    ///
    /// Stops at the first backpressure and leaves the rest queued; returns
    /// how many were submitted. Any other error drops the failed request.
    pub fn commit(&mut self) -> DriverResult<usize> {
        let dispatcher = Arc::clone(self.driver.dispatcher());
        let mut submitted = 0;

        while let Some(io) = self.pending.front().copied() {
            match dispatcher.dispatch(io.job, io.op, io.offset, io.length) {
                Ok(_) => {
                    self.pending.pop_front();
                    submitted += 1;
                }
                Err(DriverError::Backpressure(bp)) => {
                    tracing::debug!(job = %bp.job, core = %bp.core, "Commit stopped on backpressure");
                    break;
                }
                Err(e) => {
                    self.pending.pop_front();
                    self.release(io.job, 1);
                    return Err(e);
                }
            }
        }
        Ok(submitted)
    }

    /// Reap up to `max` completions without blocking.
    ///
    /// Replaces the previous batch; read it with [`event`](Self::event).
    pub fn getevents(&mut self, max: usize) -> usize {
        let dispatcher = Arc::clone(self.driver.dispatcher());
        self.events.clear();
        for core in dispatcher.cores() {
            let room = max.saturating_sub(self.events.len());
            if room == 0 {
                break;
            }
            self.events.extend(dispatcher.poll(core, room));
        }

        let done: Vec<JobId> = self.events.iter().map(|e| e.job_id).collect();
        for job in done {
            self.release(job, 1);
        }
        self.events.len()
    }

    pub fn event(&self, index: usize) -> Option<&CompletionRecord> {
        self.events.get(index)
    }

    /// Drop queued requests, drain what is ready and abandon the rest.
    pub fn close(mut self) -> TeardownReport {
        self.shutdown()
    }

    fn release(&mut self, job: JobId, n: u32) {
        if let Some(busy) = self.busy.get_mut(&job) {
            *busy = busy.saturating_sub(n);
        }
    }

    fn shutdown(&mut self) -> TeardownReport {
        self.closed = true;
        if !self.pending.is_empty() {
            tracing::debug!(dropped = self.pending.len(), "Dropping uncommitted requests");
            self.pending.clear();
        }
        self.busy.clear();
        self.driver.dispatcher().teardown()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.shutdown();
        }
    }
}
