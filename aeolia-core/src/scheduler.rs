// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cross-task scheduler.
//!
//! Each core runs a small state machine (Balanced, IoFavored,
//! ComputeFavored) driven by the tail latency of its recent completions and
//! the throughput of its co-running compute task. Every retune publishes a
//! new [`CoreBudget`] to the budget board.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetBoard, CoreBudget};
use crate::clock::Clock;
use crate::config::RunConfig;
use crate::engine::Delivery;
use crate::telemetry::LatencyRecorder;
use crate::types::CoreId;

/// Per-core scheduling states. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Shares held, coalescing at its configured base.
    Balanced,
    /// Tail latency over the SLO; I/O gains share, coalescing off.
    IoFavored,
    /// Latency well within the SLO while compute is starved.
    ComputeFavored,
}

impl SchedulerState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Balanced => "Balanced",
            Self::IoFavored => "IoFavored",
            Self::ComputeFavored => "ComputeFavored",
        }
    }

    /// Any state may move to any other.
    pub fn can_transition_to(&self, target: SchedulerState) -> bool {
        *self != target
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What the scheduler observed on one core during the last interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub samples: usize,
    pub p999_ns: Option<u64>,
    /// Batch operations per second of the core's compute task.
    pub compute_ops_per_sec: f64,
}

impl WindowStats {
    pub fn is_empty(&self) -> bool {
        self.samples == 0 || self.p999_ns.is_none()
    }
}

/// Thresholds and step sizes of the retune rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerPolicy {
    pub slo_p999_ns: u64,
    pub low_watermark: f64,
    pub compute_target_ops: f64,
    pub step_permille: u32,
    pub min_io_permille: u32,
    pub min_compute_permille: u32,
    pub base_coalescing_ns: u64,
    pub max_coalescing_ns: u64,
    /// Driver `intr` flag.
    pub interrupt_enabled: bool,
    /// Driver `coalescing` flag.
    pub coalescing_enabled: bool,
}

impl SchedulerPolicy {
    /// Driver flags only apply to aeolia; other engines take their fixed
    /// delivery path and never coalesce.
    pub fn from_config(config: &RunConfig) -> Self {
        let s = &config.scheduler;
        let interrupt_enabled =
            config.engine.delivery(&config.driver.flags) == Delivery::Interrupt;
        let coalescing_enabled = config.engine.is_tunable()
            && config.driver.flags.coalescing
            && interrupt_enabled;
        let base_coalescing_ns = if coalescing_enabled {
            config.driver.base_coalescing_ns()
        } else {
            0
        };
        Self {
            slo_p999_ns: s.slo_p999_ns,
            low_watermark: s.low_watermark,
            compute_target_ops: s.compute_target_ops,
            step_permille: s.step_permille,
            min_io_permille: s.min_io_permille,
            min_compute_permille: s.min_compute_permille,
            base_coalescing_ns,
            max_coalescing_ns: s.max_coalescing_ns.max(base_coalescing_ns),
            interrupt_enabled,
            coalescing_enabled,
        }
    }

    /// Budget a core gets when nothing is being tuned.
    pub fn static_budget(&self, core: CoreId, has_compute: bool) -> CoreBudget {
        CoreBudget::initial(
            core,
            has_compute,
            self.clamp_coalescing(self.base_coalescing_ns),
            self.interrupt_enabled,
        )
    }

    fn clamp_coalescing(&self, window_ns: u64) -> u64 {
        if self.coalescing_enabled {
            window_ns.min(self.max_coalescing_ns)
        } else {
            0
        }
    }
}

/// State the rules move to from `current` given `stats`.
///
/// An empty window holds the current state.
pub fn next_state(
    current: SchedulerState,
    stats: &WindowStats,
    has_compute: bool,
    policy: &SchedulerPolicy,
) -> SchedulerState {
    let Some(p999) = stats.p999_ns.filter(|_| stats.samples > 0) else {
        return current;
    };
    let compute_met = !has_compute || stats.compute_ops_per_sec >= policy.compute_target_ops;
    let low_mark = policy.slo_p999_ns as f64 * policy.low_watermark;

    if p999 > policy.slo_p999_ns {
        SchedulerState::IoFavored
    } else if (p999 as f64) <= low_mark && !compute_met {
        SchedulerState::ComputeFavored
    } else if compute_met {
        SchedulerState::Balanced
    } else {
        current
    }
}

/// Compute the next budget of a core.
///
/// Pure: depends only on the previous budget, the current state and the
/// window. Never fails; the result always has `io + compute <= 1000`.
pub fn retune(
    prev: &CoreBudget,
    state: SchedulerState,
    stats: &WindowStats,
    has_compute: bool,
    policy: &SchedulerPolicy,
) -> (SchedulerState, CoreBudget) {
    let next = next_state(state, stats, has_compute, policy);
    let mut budget = CoreBudget {
        core: prev.core,
        io_permille: prev.io_permille.min(1000),
        compute_permille: prev.compute_permille.min(1000 - prev.io_permille.min(1000)),
        coalescing_window_ns: policy.clamp_coalescing(prev.coalescing_window_ns),
        interrupt_enabled: policy.interrupt_enabled,
        epoch: prev.epoch,
    };

    if stats.is_empty() {
        return (next, finish(budget, has_compute));
    }

    let p999 = stats.p999_ns.unwrap_or(0);
    let low_mark = policy.slo_p999_ns as f64 * policy.low_watermark;
    match next {
        // shares only move while the triggering condition holds
        SchedulerState::IoFavored if p999 <= policy.slo_p999_ns => {}
        SchedulerState::ComputeFavored if p999 as f64 > low_mark => {}
        SchedulerState::IoFavored => {
            let cap = 1000 - policy.min_compute_permille;
            budget.io_permille = (budget.io_permille + policy.step_permille).min(cap);
            budget.compute_permille = 1000 - budget.io_permille;
            budget.coalescing_window_ns = 0;
        }
        SchedulerState::ComputeFavored => {
            let cap = 1000 - policy.min_io_permille;
            budget.compute_permille = (budget.compute_permille + policy.step_permille).min(cap);
            budget.io_permille = 1000 - budget.compute_permille;
            let from = budget.coalescing_window_ns.max(policy.base_coalescing_ns);
            budget.coalescing_window_ns = policy.clamp_coalescing(from.saturating_mul(2));
        }
        SchedulerState::Balanced => {
            budget.coalescing_window_ns = policy.clamp_coalescing(policy.base_coalescing_ns);
        }
    }

    (next, finish(budget, has_compute))
}

/// Cores without a compute task give everything to I/O.
fn finish(mut budget: CoreBudget, has_compute: bool) -> CoreBudget {
    if !has_compute {
        budget.io_permille = 1000;
        budget.compute_permille = 0;
    }
    budget
}

/// How the scheduler's decisions reach the cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// Shares are retuned and enforced.
    Adaptive,
    /// The companion scheduler is missing; static budgets only.
    Degraded,
    /// The engine exposes no knobs; static budgets only.
    Static,
}

/// State machine of one core.
#[derive(Debug)]
pub struct CoreStateMachine {
    core: CoreId,
    has_compute: bool,
    state: SchedulerState,
    entered_ns: u64,
    transition_count: u64,
    /// Highest compute share not yet seen to breach the SLO.
    compute_ceiling: u32,
}

impl CoreStateMachine {
    pub fn new(core: CoreId, has_compute: bool, now_ns: u64) -> Self {
        Self {
            core,
            has_compute,
            state: SchedulerState::Balanced,
            entered_ns: now_ns,
            transition_count: 0,
            compute_ceiling: 1000,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn compute_ceiling(&self) -> u32 {
        self.compute_ceiling
    }

    /// Keep compute below a share that breached, so growing compute cannot
    /// walk straight back into the breach.
    fn limit_compute(
        &mut self,
        prev: &CoreBudget,
        stats: &WindowStats,
        budget: &mut CoreBudget,
        policy: &SchedulerPolicy,
    ) {
        if stats.p999_ns.is_some_and(|p| p > policy.slo_p999_ns) && stats.samples > 0 {
            self.compute_ceiling = prev
                .compute_permille
                .saturating_sub(policy.step_permille)
                .max(policy.min_compute_permille);
        }
        if self.state == SchedulerState::ComputeFavored && budget.compute_permille > self.compute_ceiling {
            let held = prev.compute_permille.min(budget.compute_permille);
            budget.compute_permille = self.compute_ceiling.max(held);
            budget.io_permille = 1000 - budget.compute_permille;
        }
    }

    pub fn time_in_state_ns(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.entered_ns)
    }

    /// Move to `target`; returns whether the state changed.
    pub fn transition_to(&mut self, target: SchedulerState, now_ns: u64) -> bool {
        if !self.state.can_transition_to(target) {
            return false;
        }

        tracing::debug!(
            core = %self.core,
            from = self.state.name(),
            to = target.name(),
            "State transition"
        );

        self.state = target;
        self.entered_ns = now_ns;
        self.transition_count += 1;
        true
    }
}

/// Per-core scheduler metrics for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub core: u16,
    pub state: String,
    pub time_in_state_ms: u64,
    pub transition_count: u64,
    pub io_share: f64,
    pub compute_share: f64,
    pub coalescing_window_ns: u64,
}

/// Owns the per-core state machines and is the only writer of budgets.
pub struct CrossTaskScheduler {
    policy: SchedulerPolicy,
    mode: SchedulerMode,
    cores: DashMap<CoreId, CoreStateMachine>,
    board: Arc<BudgetBoard>,
    recorder: Arc<LatencyRecorder>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CrossTaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossTaskScheduler")
            .field("mode", &self.mode)
            .field("cores", &self.cores)
            .finish()
    }
}

impl CrossTaskScheduler {
    /// Create the scheduler and the budget board it publishes to.
    ///
    /// `cores` is every core that carries I/O or compute; `compute_cores`
    /// are those with a co-running compute task.
    pub fn new(
        policy: SchedulerPolicy,
        mode: SchedulerMode,
        cores: &BTreeSet<CoreId>,
        compute_cores: &BTreeSet<CoreId>,
        recorder: Arc<LatencyRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if mode == SchedulerMode::Degraded {
            tracing::warn!("Companion scheduler not found, falling back to OS default scheduling");
        }

        let now = clock.now_ns();
        let board = BudgetBoard::new_shared(
            cores
                .iter()
                .map(|&c| policy.static_budget(c, compute_cores.contains(&c))),
        );
        let machines = DashMap::new();
        for &core in cores {
            machines.insert(
                core,
                CoreStateMachine::new(core, compute_cores.contains(&core), now),
            );
        }

        Self {
            policy,
            mode,
            cores: machines,
            board,
            recorder,
            clock,
        }
    }

    pub fn board(&self) -> Arc<BudgetBoard> {
        Arc::clone(&self.board)
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    pub fn state(&self, core: CoreId) -> Option<SchedulerState> {
        self.cores.get(&core).map(|m| m.state())
    }

    /// Retune one core from `stats` and publish the result.
    ///
    /// Outside adaptive mode, and for unknown cores, this returns the static
    /// budget without changing anything.
    pub fn retune(&self, core: CoreId, stats: &WindowStats) -> CoreBudget {
        let Some(mut machine) = self.cores.get_mut(&core) else {
            return self.policy.static_budget(core, false);
        };
        if self.mode != SchedulerMode::Adaptive {
            return self.policy.static_budget(core, machine.has_compute);
        }

        let prev = self
            .board
            .snapshot(core)
            .unwrap_or_else(|| Arc::new(self.policy.static_budget(core, machine.has_compute)));
        let (next_state, mut budget) =
            retune(&prev, machine.state(), stats, machine.has_compute, &self.policy);

        let now = self.clock.now_ns();
        let moved = machine.transition_to(next_state, now);
        machine.limit_compute(&prev, stats, &mut budget, &self.policy);
        if moved {
            tracing::info!(
                core = %core,
                state = next_state.name(),
                p999_ns = stats.p999_ns.unwrap_or(0),
                io_share = budget.io_share(),
                compute_share = budget.compute_share(),
                "Scheduler state changed"
            );
        }

        let changed = budget.io_permille != prev.io_permille
            || budget.compute_permille != prev.compute_permille
            || budget.coalescing_window_ns != prev.coalescing_window_ns
            || budget.interrupt_enabled != prev.interrupt_enabled;
        if changed {
            let mut published = budget.clone();
            if let Some(epoch) = self.board.publish(budget) {
                published.epoch = epoch;
            }
            // decisions after a change only look at samples taken under it
            self.recorder.clear_window(core);
            return published;
        }

        budget
    }

    /// Retune every core from the recorder's windows.
    ///
    /// `compute_rates` holds batch ops/sec per core for the last interval;
    /// cores missing from it report zero.
    pub fn retune_all(&self, compute_rates: &HashMap<CoreId, f64>) -> Vec<CoreBudget> {
        let mut cores: Vec<CoreId> = self.cores.iter().map(|m| *m.key()).collect();
        cores.sort_unstable();
        cores
            .into_iter()
            .map(|core| {
                let window = self.recorder.window_snapshot(core);
                let stats = WindowStats {
                    samples: window.samples,
                    p999_ns: window.p999_ns,
                    compute_ops_per_sec: compute_rates.get(&core).copied().unwrap_or(0.0),
                };
                self.retune(core, &stats)
            })
            .collect()
    }

    /// Snapshot of every core for reporting.
    pub fn metrics(&self) -> Vec<SchedulerMetrics> {
        let now = self.clock.now_ns();
        let mut out: Vec<SchedulerMetrics> = self
            .cores
            .iter()
            .map(|m| {
                let budget = self.board.snapshot(*m.key());
                SchedulerMetrics {
                    core: m.key().value(),
                    state: m.state().name().to_string(),
                    time_in_state_ms: m.time_in_state_ns(now) / 1_000_000,
                    transition_count: m.transition_count(),
                    io_share: budget.as_ref().map_or(1.0, |b| b.io_share()),
                    compute_share: budget.as_ref().map_or(0.0, |b| b.compute_share()),
                    coalescing_window_ns: budget.as_ref().map_or(0, |b| b.coalescing_window_ns),
                }
            })
            .collect();
        out.sort_by_key(|m| m.core);
        out
    }
}
