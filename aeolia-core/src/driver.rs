// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Assembly of one run: contexts, queues, scheduler and recorder wired
//! together from a [`RunConfig`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::budget::BudgetBoard;
use crate::clock::Clock;
use crate::companion::{self, Companion};
use crate::config::RunConfig;
use crate::device::{Device, FileDevice, SimulatedDevice};
use crate::dispatcher::{Dispatcher, JobContext};
use crate::error::DriverResult;
use crate::queue::QueueContext;
use crate::scheduler::{CrossTaskScheduler, SchedulerMode, SchedulerPolicy};
use crate::telemetry::LatencyRecorder;
use crate::types::{CoreId, JobId};

/// Pick how budgets are applied for an engine and companion.
pub fn scheduler_mode(config: &RunConfig, companion: &Companion) -> SchedulerMode {
    if !config.engine.is_tunable() {
        SchedulerMode::Static
    } else if companion.is_available() {
        SchedulerMode::Adaptive
    } else {
        SchedulerMode::Degraded
    }
}

/// Open `filename`, or model the device when none is configured.
pub fn open_device(config: &RunConfig) -> DriverResult<Arc<dyn Device>> {
    Ok(match &config.filename {
        Some(path) => Arc::new(FileDevice::open(path)?),
        None => Arc::new(SimulatedDevice::new(
            config.device.clone(),
            config.engine.profile(&config.driver.flags),
            config.seed,
        )),
    })
}

/// A modelled device enforces shares itself; a real one needs the
/// companion scheduler.
pub fn detect_companion(config: &RunConfig) -> Companion {
    if config.filename.is_none() {
        Companion::Simulated
    } else {
        companion::probe(&config.scheduler.companion_paths)
    }
}

/// Everything a run shares between its threads.
pub struct Driver {
    config: RunConfig,
    companion: Companion,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<CrossTaskScheduler>,
    recorder: Arc<LatencyRecorder>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("engine", &self.config.engine)
            .field("companion", &self.companion)
            .field("dispatcher", &self.dispatcher)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Driver {
    pub fn new(
        config: RunConfig,
        device: Arc<dyn Device>,
        clock: Arc<dyn Clock>,
        companion: Companion,
    ) -> Self {
        let contexts = JobContext::expand_all(&config.jobs);
        let cores: BTreeSet<CoreId> = contexts.iter().flat_map(|c| c.cores.clone()).collect();
        let compute_cores: BTreeSet<CoreId> = contexts
            .iter()
            .filter(|c| !c.is_io())
            .flat_map(|c| c.cores.clone())
            .collect();

        let recorder = Arc::new(LatencyRecorder::new(config.scheduler.window));
        let mode = scheduler_mode(&config, &companion);
        let scheduler = Arc::new(CrossTaskScheduler::new(
            SchedulerPolicy::from_config(&config),
            mode,
            &cores,
            &compute_cores,
            Arc::clone(&recorder),
            Arc::clone(&clock),
        ));

        let profile = config.engine.profile(&config.driver.flags);
        let ctx = QueueContext {
            device,
            recorder: Arc::clone(&recorder),
            budgets: scheduler.board(),
            clock: Arc::clone(&clock),
            wakeup_ns: profile.wakeup_ns,
            coalescing_threshold: config.driver.coalescing_threshold,
        };
        let dispatcher = Arc::new(Dispatcher::new(
            contexts,
            ctx,
            config.driver.max_batch as usize,
        ));

        tracing::info!(
            engine = config.engine.name(),
            mode = ?mode,
            cores = cores.len(),
            compute_cores = compute_cores.len(),
            "Driver initialized"
        );

        Self {
            config,
            companion,
            dispatcher,
            scheduler,
            recorder,
            clock,
        }
    }

    /// Open the configured device and probe for the companion.
    pub fn open(config: RunConfig, clock: Arc<dyn Clock>) -> DriverResult<Self> {
        let device = open_device(&config)?;
        let companion = detect_companion(&config);
        Ok(Self::new(config, device, clock, companion))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn companion(&self) -> &Companion {
        &self.companion
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<CrossTaskScheduler> {
        &self.scheduler
    }

    pub fn recorder(&self) -> &Arc<LatencyRecorder> {
        &self.recorder
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn board(&self) -> Arc<BudgetBoard> {
        self.scheduler.board()
    }

    pub fn io_contexts(&self) -> Vec<JobContext> {
        self.dispatcher
            .contexts()
            .into_iter()
            .filter(|c| c.is_io())
            .cloned()
            .collect()
    }

    pub fn compute_contexts(&self) -> Vec<JobContext> {
        self.dispatcher
            .contexts()
            .into_iter()
            .filter(|c| !c.is_io())
            .cloned()
            .collect()
    }

    /// Mean compute share over the cores of `job`.
    pub fn compute_share(&self, job: &JobContext) -> f64 {
        if job.cores.is_empty() {
            return 0.0;
        }
        let board = self.board();
        let total: f64 = job
            .cores
            .iter()
            .map(|c| board.snapshot(*c).map_or(0.0, |b| b.compute_share()))
            .sum();
        total / job.cores.len() as f64
    }

    /// Attribute compute ops finished in an interval to the cores they ran on.
    ///
    /// A context's rate counts fully on each of its cores.
    pub fn compute_rates(&self, ops: &HashMap<JobId, u64>, interval_ns: u64) -> HashMap<CoreId, f64> {
        let mut rates = HashMap::new();
        if interval_ns == 0 {
            return rates;
        }
        let secs = interval_ns as f64 / 1e9;
        for job in self.compute_contexts() {
            let rate = ops.get(&job.id).copied().unwrap_or(0) as f64 / secs;
            for core in &job.cores {
                *rates.entry(*core).or_insert(0.0) += rate;
            }
        }
        rates
    }
}
