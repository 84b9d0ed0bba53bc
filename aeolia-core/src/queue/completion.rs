// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-core bounded completion queue.

use std::sync::Arc;

use crate::budget::{BudgetBoard, CoreBudget};
use crate::clock::Clock;
use crate::device::Device;
use crate::error::{DriverResult, QueueFull};
use crate::request::{CompletionRecord, CompletionStatus, Request, Ticket};
use crate::telemetry::LatencyRecorder;
use crate::types::{CoreId, JobId};

use super::coalesce::{coalesced_trigger, fair_order, Deliverable};

#[derive(Debug)]
struct InFlight {
    request: Request,
    seq: u64,
    ready_ns: u64,
    /// Set once the request is part of a fired coalesced batch.
    batch_ns: Option<u64>,
}

/// Shared collaborators of every queue in a run.
#[derive(Clone)]
pub struct QueueContext {
    pub device: Arc<dyn Device>,
    pub recorder: Arc<LatencyRecorder>,
    pub budgets: Arc<BudgetBoard>,
    pub clock: Arc<dyn Clock>,
    /// Interrupt-to-wakeup cost of the engine.
    pub wakeup_ns: u64,
    pub coalescing_threshold: u32,
}

/// Tracks the in-flight requests of one core and hands out their
/// completions.
///
/// The outstanding count includes completed requests that have not been
/// polled yet, so a full queue stays full until a completion is polled.
pub struct CompletionQueue {
    core: CoreId,
    depth: u32,
    slots: Vec<Option<InFlight>>,
    free: Vec<usize>,
    outstanding: u32,
    next_seq: u64,
    ctx: QueueContext,
}

impl std::fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("core", &self.core)
            .field("depth", &self.depth)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

impl CompletionQueue {
    pub fn new(core: CoreId, depth: u32, ctx: QueueContext) -> Self {
        let depth = depth.max(1);
        Self {
            core,
            depth,
            slots: (0..depth).map(|_| None).collect(),
            free: (0..depth as usize).rev().collect(),
            outstanding: 0,
            next_seq: 0,
            ctx,
        }
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn is_full(&self) -> bool {
        self.outstanding == self.depth
    }

    fn budget(&self) -> Arc<CoreBudget> {
        self.ctx
            .budgets
            .snapshot(self.core)
            .unwrap_or_else(|| Arc::new(CoreBudget::initial(self.core, false, 0, false)))
    }

    fn full(&self) -> QueueFull {
        QueueFull {
            core: self.core,
            depth: self.depth,
        }
    }

    /// Accept a request, or fail with `QueueFull` without touching any state.
    ///
    /// Device errors (out of range, transfer failure) are returned as-is and
    /// also leave the queue unchanged.
    pub fn submit(&mut self, request: Request) -> DriverResult<Ticket> {
        if self.is_full() {
            return Err(self.full().into());
        }
        let service_ns = self.ctx.device.service(&request, &self.budget())?;
        self.admit(request, service_ns)
    }

    /// Accept a request the device has already serviced in `service_ns`.
    pub fn admit(&mut self, request: Request, service_ns: u64) -> DriverResult<Ticket> {
        if self.is_full() {
            return Err(self.full().into());
        }
        // outstanding < depth guarantees a free slot
        let Some(slot) = self.free.pop() else {
            return Err(self.full().into());
        };

        let ready_ns = request.submit_ns.saturating_add(service_ns);
        let ticket = Ticket {
            request_id: request.id,
            core: self.core,
            ready_ns,
        };
        self.slots[slot] = Some(InFlight {
            request,
            seq: self.next_seq,
            ready_ns,
            batch_ns: None,
        });
        self.next_seq += 1;
        self.outstanding += 1;

        Ok(ticket)
    }

    /// Fire every coalesced batch whose trigger has passed by `now`.
    fn fire_batches(&mut self, budget: &CoreBudget, now: u64) {
        loop {
            let mut held: Vec<(u64, usize)> = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| match s {
                    Some(f) if f.batch_ns.is_none() => Some((f.ready_ns, i)),
                    _ => None,
                })
                .collect();
            held.sort_unstable();
            let ready: Vec<u64> = held.iter().map(|(r, _)| *r).collect();

            let threshold = self.ctx.coalescing_threshold as usize;
            let Some(trigger) = coalesced_trigger(&ready, threshold, budget.coalescing_window_ns)
            else {
                return;
            };
            if trigger > now {
                return;
            }

            let stamp = trigger + self.ctx.wakeup_ns;
            for &(_, slot) in held.iter().take_while(|(r, _)| *r <= trigger) {
                if let Some(f) = self.slots[slot].as_mut() {
                    f.batch_ns = Some(stamp);
                }
            }
        }
    }

    /// Delivery instant of an in-flight request under `budget`, if known.
    fn deliver_at(&self, f: &InFlight, budget: &CoreBudget) -> Option<u64> {
        if let Some(stamp) = f.batch_ns {
            return Some(stamp);
        }
        if budget.coalescing() {
            None
        } else if budget.interrupt_enabled {
            Some(f.ready_ns + self.ctx.wakeup_ns)
        } else {
            Some(f.ready_ns)
        }
    }

    /// Completions deliverable now, in fair order, at most `max_batch`.
    ///
    /// The returned iterator is lazy: each `next()` removes one request from
    /// the queue and records it. Anything not pulled stays outstanding for
    /// the next poll. Never blocks.
    pub fn poll_completions(&mut self, max_batch: usize) -> Completions<'_> {
        self.poll_filtered(None, max_batch)
    }

    /// Like [`poll_completions`](Self::poll_completions) but only hands out
    /// completions of `job`.
    pub fn poll_job_completions(&mut self, job: JobId, max_batch: usize) -> Completions<'_> {
        self.poll_filtered(Some(job), max_batch)
    }

    fn poll_filtered(&mut self, job: Option<JobId>, max_batch: usize) -> Completions<'_> {
        let now = self.ctx.clock.now_ns();
        let budget = self.budget();
        if budget.coalescing() {
            self.fire_batches(&budget, now);
        }

        let deliverable: Vec<Deliverable> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| {
                let f = s.as_ref().filter(|f| job.map_or(true, |j| f.request.job_id == j))?;
                let at = self.deliver_at(f, &budget)?;
                (at <= now).then_some(Deliverable {
                    slot,
                    job: f.request.job_id,
                    seq: f.seq,
                    deliver_ns: at,
                })
            })
            .collect();

        let mut order = fair_order(deliverable);
        order.truncate(max_batch);

        Completions {
            queue: self,
            order: order.into_iter(),
        }
    }

    /// Earliest instant a completion becomes deliverable, assuming no new
    /// submissions.
    pub fn next_ready_at(&self) -> Option<u64> {
        let budget = self.budget();
        let known = self
            .slots
            .iter()
            .flatten()
            .filter_map(|f| self.deliver_at(f, &budget))
            .min();

        if !budget.coalescing() {
            return known;
        }

        let mut held: Vec<u64> = self
            .slots
            .iter()
            .flatten()
            .filter(|f| f.batch_ns.is_none())
            .map(|f| f.ready_ns)
            .collect();
        held.sort_unstable();
        let pending = coalesced_trigger(
            &held,
            self.ctx.coalescing_threshold as usize,
            budget.coalescing_window_ns,
        )
        .map(|t| t + self.ctx.wakeup_ns);

        match (known, pending) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn take(&mut self, slot: usize, deliver_ns: u64) -> Option<CompletionRecord> {
        let f = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        self.outstanding -= 1;

        let rec = CompletionRecord::complete(&f.request, deliver_ns, CompletionStatus::Ok);
        self.ctx.recorder.record(&rec);
        Some(rec)
    }

    /// Mark every outstanding request abandoned and free all slots.
    ///
    /// Each one is reported to the recorder, which counts it but keeps it out
    /// of the latency population. Returns how many were abandoned.
    pub fn abandon_all(&mut self) -> u32 {
        let now = self.ctx.clock.now_ns();
        let mut abandoned = 0;
        for slot in 0..self.slots.len() {
            if let Some(f) = self.slots[slot].take() {
                let rec = CompletionRecord::complete(&f.request, now, CompletionStatus::Abandoned);
                self.ctx.recorder.record(&rec);
                self.free.push(slot);
                abandoned += 1;
            }
        }
        self.outstanding = 0;
        if abandoned > 0 {
            tracing::warn!(core = %self.core, abandoned, "Abandoned in-flight requests");
        }
        abandoned
    }
}

/// Lazy, finite iterator over polled completions.
pub struct Completions<'a> {
    queue: &'a mut CompletionQueue,
    order: std::vec::IntoIter<Deliverable>,
}

impl Iterator for Completions<'_> {
    type Item = CompletionRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for d in self.order.by_ref() {
            if let Some(rec) = self.queue.take(d.slot, d.deliver_ns) {
                return Some(rec);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.order.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DeviceConfig;
    use crate::device::SimulatedDevice;
    use crate::engine::EngineProfile;
    use crate::error::DriverError;
    use crate::request::OpKind;
    use crate::types::RequestId;

    const CORE: CoreId = CoreId::new(0);

    struct Fixture {
        clock: Arc<ManualClock>,
        recorder: Arc<LatencyRecorder>,
        budgets: Arc<BudgetBoard>,
        queue: CompletionQueue,
    }

    /// Device with a fixed 10us service time.
    fn fixture(depth: u32, budget: CoreBudget, threshold: u32) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let recorder = Arc::new(LatencyRecorder::new(64));
        let budgets = BudgetBoard::new_shared([budget]);
        let device = SimulatedDevice::new(
            DeviceConfig {
                baseline_latency_ns: 10_000,
                jitter_ns: 0,
                bandwidth_mbps: u64::MAX,
                ..DeviceConfig::default()
            },
            EngineProfile {
                submit_overhead_ns: 0,
                wakeup_ns: 0,
            },
            0,
        );
        let ctx = QueueContext {
            device: Arc::new(device),
            recorder: Arc::clone(&recorder),
            budgets: Arc::clone(&budgets),
            clock: clock.clone(),
            wakeup_ns: 1_000,
            coalescing_threshold: threshold,
        };
        Fixture {
            clock,
            recorder,
            budgets,
            queue: CompletionQueue::new(CORE, depth, ctx),
        }
    }

    fn polling() -> CoreBudget {
        CoreBudget::initial(CORE, false, 0, false)
    }

    fn request(id: u64, job: u32, submit_ns: u64) -> Request {
        Request {
            id: RequestId::new(id),
            job_id: JobId::new(job),
            op_kind: OpKind::Read,
            offset: id * 4096,
            length: 4096,
            submit_ns,
            target_core: CORE,
        }
    }

    #[test]
    fn test_submit_then_poll_single_record() {
        let mut fx = fixture(4, polling(), 8);
        let ticket = fx.queue.submit(request(1, 0, 0)).unwrap();
        assert_eq!(ticket.ready_ns, 10_000);

        // not ready yet
        assert_eq!(fx.queue.poll_completions(8).count(), 0);

        fx.clock.advance_to(10_000);
        let recs: Vec<_> = fx.queue.poll_completions(8).collect();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].latency_ns, 10_000);
        assert_eq!(recs[0].complete_ns, 10_000);
        assert_eq!(fx.queue.outstanding(), 0);
        assert_eq!(fx.recorder.total_records(), 1);

        // delivered exactly once
        fx.clock.advance(50_000);
        assert_eq!(fx.queue.poll_completions(8).count(), 0);
        assert_eq!(fx.recorder.total_records(), 1);
    }

    #[test]
    fn test_queue_full_until_polled() {
        let mut fx = fixture(2, polling(), 8);
        fx.queue.submit(request(1, 0, 0)).unwrap();
        fx.queue.submit(request(2, 0, 0)).unwrap();

        for attempt in 0..3u64 {
            fx.clock.advance(20_000);
            let err = fx.queue.submit(request(10 + attempt, 0, 0)).unwrap_err();
            assert!(matches!(err, DriverError::QueueFull(QueueFull { depth: 2, .. })));
            assert_eq!(fx.queue.outstanding(), 2);
        }

        // completed but unpolled requests still count
        assert!(fx.queue.is_full());
        assert_eq!(fx.queue.poll_completions(1).count(), 1);
        assert!(fx.queue.submit(request(3, 0, fx.clock.now_ns())).is_ok());
    }

    #[test]
    fn test_dropped_iterator_leaves_rest_outstanding() {
        let mut fx = fixture(8, polling(), 8);
        for id in 0..5 {
            fx.queue.submit(request(id, 0, 0)).unwrap();
        }
        fx.clock.advance_to(10_000);

        let mut it = fx.queue.poll_completions(8);
        assert!(it.next().is_some());
        assert!(it.next().is_some());
        drop(it);
        assert_eq!(fx.queue.outstanding(), 3);
        assert_eq!(fx.queue.poll_completions(8).count(), 3);
    }

    #[test]
    fn test_max_batch_bounds_poll() {
        let mut fx = fixture(8, polling(), 8);
        for id in 0..6 {
            fx.queue.submit(request(id, 0, 0)).unwrap();
        }
        fx.clock.advance_to(10_000);
        assert_eq!(fx.queue.poll_completions(4).count(), 4);
        assert_eq!(fx.queue.poll_completions(4).count(), 2);
    }

    #[test]
    fn test_interrupt_adds_wakeup() {
        let mut fx = fixture(4, CoreBudget::initial(CORE, false, 0, true), 8);
        fx.queue.submit(request(1, 0, 0)).unwrap();
        assert_eq!(fx.queue.next_ready_at(), Some(11_000));

        fx.clock.advance_to(10_500);
        assert_eq!(fx.queue.poll_completions(8).count(), 0);
        fx.clock.advance_to(11_000);
        let rec = fx.queue.poll_completions(8).next().unwrap();
        assert_eq!(rec.latency_ns, 11_000);
    }

    #[test]
    fn test_coalesced_waits_for_threshold() {
        let budget = CoreBudget::initial(CORE, false, 100_000, true);
        let mut fx = fixture(8, budget, 3);
        fx.queue.submit(request(1, 0, 0)).unwrap();
        fx.queue.submit(request(2, 0, 2_000)).unwrap();
        fx.queue.submit(request(3, 0, 4_000)).unwrap();
        fx.queue.submit(request(4, 0, 500_000)).unwrap();

        // two ready, threshold is three
        fx.clock.advance_to(12_000);
        assert_eq!(fx.queue.poll_completions(8).count(), 0);

        // third ready at 14us fires the batch, delivered at 15us
        fx.clock.advance_to(15_000);
        let recs: Vec<_> = fx.queue.poll_completions(8).collect();
        assert_eq!(recs.len(), 3);
        assert!(recs.iter().all(|r| r.complete_ns == 15_000));
        assert_eq!(fx.queue.outstanding(), 1);
    }

    #[test]
    fn test_coalesced_window_expiry() {
        let budget = CoreBudget::initial(CORE, false, 20_000, true);
        let mut fx = fixture(8, budget, 4);
        fx.queue.submit(request(1, 0, 0)).unwrap();
        fx.queue.submit(request(2, 0, 1_000_000)).unwrap();

        // oldest ready at 10us, window 20us, wakeup 1us
        assert_eq!(fx.queue.next_ready_at(), Some(31_000));
        fx.clock.advance_to(29_000);
        assert_eq!(fx.queue.poll_completions(8).count(), 0);
        fx.clock.advance_to(31_000);
        let rec = fx.queue.poll_completions(8).next().unwrap();
        assert_eq!(rec.request_id, RequestId::new(1));
        assert_eq!(rec.complete_ns, 31_000);
    }

    #[test]
    fn test_coalescing_threshold_capped_by_outstanding() {
        let budget = CoreBudget::initial(CORE, false, 1_000_000, true);
        let mut fx = fixture(8, budget, 8);
        fx.queue.submit(request(1, 0, 0)).unwrap();
        fx.queue.submit(request(2, 0, 0)).unwrap();

        // only two outstanding, so two ready completions are enough
        fx.clock.advance_to(11_000);
        assert_eq!(fx.queue.poll_completions(8).count(), 2);
    }

    #[test]
    fn test_fair_interleaving_across_jobs() {
        let mut fx = fixture(8, polling(), 8);
        fx.queue.submit(request(1, 1, 0)).unwrap();
        fx.queue.submit(request(2, 1, 0)).unwrap();
        fx.queue.submit(request(3, 1, 0)).unwrap();
        fx.queue.submit(request(4, 0, 500)).unwrap();
        fx.clock.advance_to(20_000);

        let jobs: Vec<u32> = fx
            .queue
            .poll_completions(8)
            .map(|r| r.job_id.value())
            .collect();
        assert_eq!(jobs, vec![1, 0, 1, 1]);
    }

    #[test]
    fn test_poll_job_leaves_other_jobs() {
        let mut fx = fixture(8, polling(), 8);
        fx.queue.submit(request(1, 0, 0)).unwrap();
        fx.queue.submit(request(2, 1, 0)).unwrap();
        fx.queue.submit(request(3, 1, 0)).unwrap();
        fx.clock.advance_to(10_000);

        let mine: Vec<_> = fx.queue.poll_job_completions(JobId::new(1), 8).collect();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.job_id == JobId::new(1)));
        assert_eq!(fx.queue.outstanding(), 1);
    }

    #[test]
    fn test_budget_change_takes_effect_at_poll() {
        let mut fx = fixture(4, polling(), 8);
        fx.queue.submit(request(1, 0, 0)).unwrap();
        fx.budgets
            .publish(CoreBudget::initial(CORE, false, 0, true))
            .unwrap();
        fx.clock.advance_to(10_000);
        // interrupt delivery now applies
        assert_eq!(fx.queue.poll_completions(8).count(), 0);
        fx.clock.advance_to(11_000);
        assert_eq!(fx.queue.poll_completions(8).count(), 1);
    }

    #[test]
    fn test_abandon_all() {
        let mut fx = fixture(4, polling(), 8);
        for id in 0..3 {
            fx.queue.submit(request(id, 0, 0)).unwrap();
        }
        assert_eq!(fx.queue.abandon_all(), 3);
        assert_eq!(fx.queue.outstanding(), 0);
        assert_eq!(fx.recorder.total_records(), 3);
        assert_eq!(fx.recorder.job_summary(JobId::new(0)).abandoned, 3);
        assert_eq!(fx.recorder.percentile(50.0), None);

        fx.clock.advance(1_000_000);
        assert_eq!(fx.queue.poll_completions(8).count(), 0);
        // slots are reusable
        for id in 10..14 {
            assert!(fx.queue.submit(request(id, 0, 0)).is_ok());
        }
    }

    #[test]
    fn test_device_error_leaves_queue_unchanged() {
        let mut fx = fixture(4, polling(), 8);
        let mut bad = request(1, 0, 0);
        bad.offset = 3;
        assert!(matches!(
            fx.queue.submit(bad),
            Err(DriverError::Device(_))
        ));
        assert_eq!(fx.queue.outstanding(), 0);
    }
}
