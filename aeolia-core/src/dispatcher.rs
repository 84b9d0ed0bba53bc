// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Submission dispatcher.
//!
//! Accepts requests from job contexts, routes them to a per-core completion
//! queue and turns a full queue into backpressure for the caller. Queues
//! live in a sharded map, so submissions on different cores do not share a
//! lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetBoard, CoreBudget};
use crate::clock::Clock;
use crate::config::{JobKind, JobSpec};
use crate::device::Device;
use crate::engine::CpuPolicy;
use crate::error::{Backpressure, DriverError, DriverResult, QueueFull};
use crate::queue::{CompletionQueue, QueueContext};
use crate::request::{CompletionRecord, OpKind, Request, Ticket};
use crate::types::{CoreId, JobId, Nice, RequestId, MAX_IO_DEPTH};

/// One running instance of a job group (one FIO thread).
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub id: JobId,
    /// Group name plus context index, e.g. `test.2`.
    pub name: String,
    pub group: String,
    pub kind: JobKind,
    /// Cores the context may run and submit on, ascending.
    pub cores: Vec<CoreId>,
    pub policy: CpuPolicy,
    pub nice: Nice,
    pub number_ios: Option<u64>,
}

impl JobContext {
    /// Expand a job group into its `numjobs` contexts, numbering ids from
    /// `first_id`.
    ///
    /// Under `split` context `i` is pinned to `cpus_allowed[i]` alone;
    /// under `shared` every context gets the whole set.
    pub fn expand(spec: &JobSpec, first_id: u32) -> Vec<JobContext> {
        let all = spec.cpus_allowed.cores();
        (0..spec.numjobs)
            .map(|i| {
                let cores = match spec.policy {
                    CpuPolicy::Split => vec![all[i as usize % all.len()]],
                    CpuPolicy::Shared => all.to_vec(),
                };
                JobContext {
                    id: JobId::new(first_id + i),
                    name: format!("{}.{}", spec.name, i),
                    group: spec.name.clone(),
                    kind: spec.kind.clone(),
                    cores,
                    policy: spec.policy,
                    nice: spec.nice,
                    number_ios: spec.number_ios,
                }
            })
            .collect()
    }

    /// Expand every group of a run, ids assigned in declaration order.
    pub fn expand_all(specs: &[JobSpec]) -> Vec<JobContext> {
        let mut contexts = Vec::new();
        for spec in specs {
            let first = contexts.len() as u32;
            contexts.extend(Self::expand(spec, first));
        }
        contexts
    }

    pub fn is_io(&self) -> bool {
        matches!(self.kind, JobKind::Io { .. })
    }

    pub fn iodepth(&self) -> Option<u32> {
        match &self.kind {
            JobKind::Io { iodepth, .. } => Some(iodepth.value()),
            JobKind::Compute { .. } => None,
        }
    }

    pub fn block_size(&self) -> Option<u32> {
        match &self.kind {
            JobKind::Io { bs, .. } => Some(bs.bytes()),
            JobKind::Compute { .. } => None,
        }
    }

    pub fn op_kind(&self) -> Option<OpKind> {
        match &self.kind {
            JobKind::Io { iotype, .. } => Some(iotype.op_kind()),
            JobKind::Compute { .. } => None,
        }
    }

    pub fn batch_cost_ns(&self) -> Option<u64> {
        match &self.kind {
            JobKind::Compute { batch_cost_ns } => Some(*batch_cost_ns),
            JobKind::Io { .. } => None,
        }
    }
}

/// Outcome of draining the dispatcher at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub drained: u64,
    pub abandoned: u64,
}

/// Routes requests from job contexts to per-core completion queues.
pub struct Dispatcher {
    jobs: HashMap<JobId, JobContext>,
    queues: DashMap<CoreId, CompletionQueue>,
    next_request: AtomicU64,
    device: Arc<dyn Device>,
    budgets: Arc<BudgetBoard>,
    clock: Arc<dyn Clock>,
    max_batch: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("jobs", &self.jobs.len())
            .field("queues", &self.queues)
            .field("max_batch", &self.max_batch)
            .finish()
    }
}

impl Dispatcher {
    /// Build one queue per core used by any I/O context.
    ///
    /// A core's depth is the sum of the iodepths of the contexts that may
    /// submit to it.
    pub fn new(contexts: Vec<JobContext>, ctx: QueueContext, max_batch: usize) -> Self {
        let mut depths: HashMap<CoreId, u32> = HashMap::new();
        for job in contexts.iter().filter(|j| j.is_io()) {
            let depth = job.iodepth().unwrap_or(1);
            for &core in &job.cores {
                let d = depths.entry(core).or_default();
                *d = d.saturating_add(depth).min(MAX_IO_DEPTH);
            }
        }

        let queues = DashMap::new();
        for (core, depth) in depths {
            queues.insert(core, CompletionQueue::new(core, depth, ctx.clone()));
        }

        tracing::debug!(
            jobs = contexts.len(),
            queues = queues.len(),
            "Dispatcher ready"
        );

        Self {
            jobs: contexts.into_iter().map(|j| (j.id, j)).collect(),
            queues,
            next_request: AtomicU64::new(0),
            device: ctx.device,
            budgets: ctx.budgets,
            clock: ctx.clock,
            max_batch: max_batch.max(1),
        }
    }

    pub fn job(&self, id: JobId) -> Option<&JobContext> {
        self.jobs.get(&id)
    }

    /// Contexts ordered by id.
    pub fn contexts(&self) -> Vec<&JobContext> {
        let mut jobs: Vec<&JobContext> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Cores that own a completion queue, ascending.
    pub fn cores(&self) -> Vec<CoreId> {
        let set: BTreeSet<CoreId> = self.queues.iter().map(|q| *q.key()).collect();
        set.into_iter().collect()
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    pub fn outstanding(&self, core: CoreId) -> Option<u32> {
        self.queues.get(&core).map(|q| q.outstanding())
    }

    pub fn total_outstanding(&self) -> u64 {
        self.queues.iter().map(|q| q.outstanding() as u64).sum()
    }

    fn io_job(&self, id: JobId) -> DriverResult<&JobContext> {
        self.jobs
            .get(&id)
            .filter(|j| j.is_io())
            .ok_or(DriverError::UnknownJob(id))
    }

    /// Pick the target core: the pinned core under `split`, the least loaded
    /// pinned core under `shared` (ties to the lowest id).
    fn route(&self, job: &JobContext) -> CoreId {
        match job.policy {
            CpuPolicy::Split => job.cores[0],
            CpuPolicy::Shared => job
                .cores
                .iter()
                .copied()
                .min_by_key(|c| (self.outstanding(*c).unwrap_or(u32::MAX), *c))
                .unwrap_or(job.cores[0]),
        }
    }

    /// Build a request for `job`, route it and submit it.
    ///
    /// A full queue is reported as `Backpressure`; an id that is not an I/O
    /// context is `UnknownJob`; device errors pass through.
    pub fn dispatch(
        &self,
        job_id: JobId,
        op_kind: OpKind,
        offset: u64,
        length: u32,
    ) -> DriverResult<Ticket> {
        let job = self.io_job(job_id)?;
        let core = self.route(job);
        let backpressure = |full: QueueFull| DriverError::from(Backpressure::from_queue_full(job_id, full));

        match self.queues.get(&core) {
            None => return Err(DriverError::UnknownJob(job_id)),
            Some(q) if q.is_full() => {
                return Err(backpressure(QueueFull {
                    core,
                    depth: q.depth(),
                }))
            }
            Some(_) => {}
        }

        let request = Request {
            id: RequestId::new(self.next_request.fetch_add(1, Ordering::Relaxed)),
            job_id,
            op_kind,
            offset,
            length,
            submit_ns: self.clock.now_ns(),
            target_core: core,
        };

        // the device is serviced outside the queue's shard lock
        let budget = self
            .budgets
            .snapshot(core)
            .unwrap_or_else(|| Arc::new(CoreBudget::initial(core, false, 0, false)));
        let service_ns = self.device.service(&request, &budget)?;

        let mut queue = self
            .queues
            .get_mut(&core)
            .ok_or(DriverError::UnknownJob(job_id))?;
        queue.admit(request, service_ns).map_err(|e| match e {
            DriverError::QueueFull(full) => backpressure(full),
            other => other,
        })
    }

    /// Poll one core's queue.
    pub fn poll(&self, core: CoreId, max_batch: usize) -> Vec<CompletionRecord> {
        match self.queues.get_mut(&core) {
            Some(mut q) => q.poll_completions(max_batch).collect(),
            None => Vec::new(),
        }
    }

    /// Poll every core `job` is pinned to, taking only its completions.
    pub fn poll_job(&self, job_id: JobId, max_batch: usize) -> DriverResult<Vec<CompletionRecord>> {
        let job = self.io_job(job_id)?;
        let mut out = Vec::new();
        for core in &job.cores {
            let room = max_batch.saturating_sub(out.len());
            if room == 0 {
                break;
            }
            if let Some(mut q) = self.queues.get_mut(core) {
                out.extend(q.poll_job_completions(job_id, room));
            }
        }
        Ok(out)
    }

    /// Earliest deliverable instant over all queues.
    pub fn next_ready_at(&self) -> Option<u64> {
        self.queues.iter().filter_map(|q| q.next_ready_at()).min()
    }

    /// Deliver whatever is ready now, then abandon the rest.
    pub fn teardown(&self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for core in self.cores() {
            if let Some(mut q) = self.queues.get_mut(&core) {
                loop {
                    let n = q.poll_completions(self.max_batch).count();
                    if n == 0 {
                        break;
                    }
                    report.drained += n as u64;
                }
                report.abandoned += q.abandon_all() as u64;
            }
        }

        tracing::info!(
            drained = report.drained,
            abandoned = report.abandoned,
            "Dispatcher torn down"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetBoard, CoreBudget};
    use crate::clock::ManualClock;
    use crate::config::DeviceConfig;
    use crate::device::SimulatedDevice;
    use crate::engine::EngineProfile;
    use crate::request::IoType;
    use crate::telemetry::LatencyRecorder;
    use crate::types::{BlockSize, CpuList, IoDepth};

    fn io_spec(numjobs: u32, cpus: &str, policy: CpuPolicy, depth: u32) -> JobSpec {
        JobSpec::io(
            "test",
            IoType::RandRead,
            IoDepth::new(depth).unwrap(),
            BlockSize::new(4096).unwrap(),
            numjobs,
            cpus.parse::<CpuList>().unwrap(),
            policy,
        )
    }

    fn dispatcher(specs: &[JobSpec]) -> (Dispatcher, Arc<ManualClock>, Arc<LatencyRecorder>) {
        let contexts = JobContext::expand_all(specs);
        let cores: BTreeSet<CoreId> = contexts.iter().flat_map(|c| c.cores.clone()).collect();
        let budgets = BudgetBoard::new_shared(
            cores
                .into_iter()
                .map(|c| CoreBudget::initial(c, false, 0, false)),
        );
        let clock = Arc::new(ManualClock::new());
        let recorder = Arc::new(LatencyRecorder::new(64));
        let device = SimulatedDevice::new(
            DeviceConfig {
                jitter_ns: 0,
                ..DeviceConfig::default()
            },
            EngineProfile {
                submit_overhead_ns: 0,
                wakeup_ns: 0,
            },
            1,
        );
        let ctx = QueueContext {
            device: Arc::new(device),
            recorder: Arc::clone(&recorder),
            budgets,
            clock: clock.clone(),
            wakeup_ns: 0,
            coalescing_threshold: 1,
        };
        (Dispatcher::new(contexts, ctx, 32), clock, recorder)
    }

    #[test]
    fn test_split_expansion_is_disjoint() {
        let contexts = JobContext::expand(&io_spec(4, "0-3", CpuPolicy::Split, 1), 0);
        assert_eq!(contexts.len(), 4);
        let mut seen = BTreeSet::new();
        for (i, ctx) in contexts.iter().enumerate() {
            assert_eq!(ctx.cores, vec![CoreId::new(i as u16)]);
            assert!(seen.insert(ctx.cores[0]));
            assert_eq!(ctx.name, format!("test.{}", i));
        }
    }

    #[test]
    fn test_shared_expansion() {
        let contexts = JobContext::expand(&io_spec(3, "2-3", CpuPolicy::Shared, 1), 10);
        assert_eq!(contexts[0].id, JobId::new(10));
        assert!(contexts.iter().all(|c| c.cores.len() == 2));
    }

    #[test]
    fn test_expand_all_numbers_sequentially() {
        let compute = JobSpec::compute("comp", "0-3".parse().unwrap(), 1_000_000);
        let contexts = JobContext::expand_all(&[io_spec(2, "0-1", CpuPolicy::Split, 1), compute]);
        let ids: Vec<u32> = contexts.iter().map(|c| c.id.value()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(!contexts[2].is_io());
    }

    /// Device whose service blocks until the test releases it.
    struct GatedDevice {
        entered: std::sync::Barrier,
        release: std::sync::Barrier,
    }

    impl Device for GatedDevice {
        fn capacity(&self) -> u64 {
            1 << 30
        }

        fn service(&self, _request: &Request, _budget: &CoreBudget) -> Result<u64, crate::error::DeviceError> {
            self.entered.wait();
            self.release.wait();
            Ok(1_000)
        }
    }

    #[test]
    fn test_queue_usable_while_device_services() {
        let contexts = JobContext::expand_all(&[io_spec(1, "0", CpuPolicy::Split, 2)]);
        let device = Arc::new(GatedDevice {
            entered: std::sync::Barrier::new(2),
            release: std::sync::Barrier::new(2),
        });
        let ctx = QueueContext {
            device: device.clone(),
            recorder: Arc::new(LatencyRecorder::new(64)),
            budgets: BudgetBoard::new_shared([CoreBudget::initial(CoreId::new(0), false, 0, false)]),
            clock: Arc::new(ManualClock::new()),
            wakeup_ns: 0,
            coalescing_threshold: 1,
        };
        let d = Dispatcher::new(contexts, ctx, 32);
        let core = CoreId::new(0);

        std::thread::scope(|s| {
            let submitter = s.spawn(|| d.dispatch(JobId::new(0), OpKind::Read, 0, 4096));
            device.entered.wait();
            // the core's queue is not locked while the transfer runs
            assert!(d.poll(core, 1).is_empty());
            assert_eq!(d.outstanding(core), Some(0));
            device.release.wait();
            assert_eq!(submitter.join().unwrap().unwrap().ready_ns, 1_000);
        });
        assert_eq!(d.outstanding(core), Some(1));
    }

    #[test]
    fn test_backpressure_at_iodepth() {
        let (d, _clock, _) = dispatcher(&[io_spec(1, "0", CpuPolicy::Split, 2)]);
        let job = JobId::new(0);
        d.dispatch(job, OpKind::Read, 0, 4096).unwrap();
        d.dispatch(job, OpKind::Read, 4096, 4096).unwrap();

        for _ in 0..3 {
            let err = d.dispatch(job, OpKind::Read, 8192, 4096).unwrap_err();
            match err {
                DriverError::Backpressure(bp) => {
                    assert_eq!(bp.job, job);
                    assert_eq!(bp.core, CoreId::new(0));
                    assert_eq!(bp.depth, 2);
                }
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(d.outstanding(CoreId::new(0)), Some(2));
        }
    }

    #[test]
    fn test_unknown_job() {
        let compute = JobSpec::compute("comp", "0".parse().unwrap(), 1_000_000);
        let (d, _, _) = dispatcher(&[io_spec(1, "0", CpuPolicy::Split, 1), compute]);
        assert!(matches!(
            d.dispatch(JobId::new(99), OpKind::Read, 0, 4096),
            Err(DriverError::UnknownJob(_))
        ));
        // compute contexts have no queue
        assert!(matches!(
            d.dispatch(JobId::new(1), OpKind::Read, 0, 4096),
            Err(DriverError::UnknownJob(_))
        ));
    }

    #[test]
    fn test_shared_routes_to_least_loaded() {
        let (d, _, _) = dispatcher(&[io_spec(2, "0-1", CpuPolicy::Shared, 4)]);
        let t1 = d.dispatch(JobId::new(0), OpKind::Read, 0, 4096).unwrap();
        let t2 = d.dispatch(JobId::new(1), OpKind::Read, 0, 4096).unwrap();
        let t3 = d.dispatch(JobId::new(0), OpKind::Read, 0, 4096).unwrap();
        assert_eq!(t1.core, CoreId::new(0));
        assert_eq!(t2.core, CoreId::new(1));
        assert_eq!(t3.core, CoreId::new(0));
        // both contexts share both queues
        assert_eq!(d.cores(), vec![CoreId::new(0), CoreId::new(1)]);
        assert_eq!(d.outstanding(CoreId::new(0)), Some(2));
    }

    #[test]
    fn test_poll_job_takes_only_own_completions() {
        let (d, clock, _) = dispatcher(&[io_spec(2, "0", CpuPolicy::Shared, 4)]);
        d.dispatch(JobId::new(0), OpKind::Read, 0, 4096).unwrap();
        d.dispatch(JobId::new(1), OpKind::Read, 4096, 4096).unwrap();
        clock.advance(1_000_000);

        let mine = d.poll_job(JobId::new(1), 8).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].job_id, JobId::new(1));
        assert_eq!(d.outstanding(CoreId::new(0)), Some(1));
        assert_eq!(d.poll(CoreId::new(0), 8).len(), 1);
    }

    #[test]
    fn test_request_ids_unique() {
        let (d, _, _) = dispatcher(&[io_spec(1, "0", CpuPolicy::Split, 8)]);
        let ids: BTreeSet<RequestId> = (0..8)
            .map(|i| d.dispatch(JobId::new(0), OpKind::Write, i * 4096, 4096).unwrap().request_id)
            .collect();
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn test_teardown_drains_then_abandons() {
        let (d, clock, recorder) = dispatcher(&[io_spec(1, "0", CpuPolicy::Split, 4)]);
        d.dispatch(JobId::new(0), OpKind::Read, 0, 4096).unwrap();
        clock.advance(1_000_000);
        d.dispatch(JobId::new(0), OpKind::Read, 4096, 4096).unwrap();

        let report = d.teardown();
        assert_eq!(report, TeardownReport { drained: 1, abandoned: 1 });
        assert_eq!(d.total_outstanding(), 0);
        assert_eq!(recorder.total_records(), 2);
    }
}
