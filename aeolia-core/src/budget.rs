// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-core budget state, published copy-on-write.
//!
//! The scheduler is the only writer. Completion queues and compute threads
//! take an `Arc<CoreBudget>` snapshot and never see a half-written budget.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::types::CoreId;

/// Share of a core granted to I/O and to compute, plus completion knobs.
///
/// Shares are integer permille so `io + compute <= 1000` holds exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreBudget {
    pub core: CoreId,
    pub io_permille: u32,
    pub compute_permille: u32,
    pub coalescing_window_ns: u64,
    pub interrupt_enabled: bool,
    pub epoch: u64,
}

impl CoreBudget {
    /// Budget a core starts a configuration with.
    pub fn initial(
        core: CoreId,
        has_compute: bool,
        coalescing_window_ns: u64,
        interrupt_enabled: bool,
    ) -> Self {
        let (io_permille, compute_permille) = if has_compute { (500, 500) } else { (1000, 0) };
        Self {
            core,
            io_permille,
            compute_permille,
            coalescing_window_ns,
            interrupt_enabled,
            epoch: 0,
        }
    }

    pub fn io_share(&self) -> f64 {
        self.io_permille as f64 / 1000.0
    }

    pub fn compute_share(&self) -> f64 {
        self.compute_permille as f64 / 1000.0
    }

    pub fn is_valid(&self) -> bool {
        self.io_permille + self.compute_permille <= 1000
    }

    /// Coalesced interrupts are active under this budget.
    pub fn coalescing(&self) -> bool {
        self.interrupt_enabled && self.coalescing_window_ns > 0
    }
}

/// One atomically swappable budget per core.
#[derive(Debug)]
pub struct BudgetBoard {
    slots: HashMap<CoreId, ArcSwap<CoreBudget>>,
}

impl BudgetBoard {
    pub fn new(budgets: impl IntoIterator<Item = CoreBudget>) -> Self {
        Self {
            slots: budgets
                .into_iter()
                .map(|b| (b.core, ArcSwap::from_pointee(b)))
                .collect(),
        }
    }

    pub fn new_shared(budgets: impl IntoIterator<Item = CoreBudget>) -> Arc<Self> {
        Arc::new(Self::new(budgets))
    }

    /// Consistent snapshot of a core's budget.
    pub fn snapshot(&self, core: CoreId) -> Option<Arc<CoreBudget>> {
        self.slots.get(&core).map(|slot| slot.load_full())
    }

    /// Replace a core's budget, stamping the next epoch.
    ///
    /// Returns the published epoch, or `None` for an unknown core.
    pub fn publish(&self, mut budget: CoreBudget) -> Option<u64> {
        let slot = self.slots.get(&budget.core)?;
        budget.epoch = slot.load().epoch + 1;
        let epoch = budget.epoch;
        slot.store(Arc::new(budget));
        Some(epoch)
    }

    pub fn cores(&self) -> Vec<CoreId> {
        let mut cores: Vec<CoreId> = self.slots.keys().copied().collect();
        cores.sort_unstable();
        cores
    }

    pub fn snapshot_all(&self) -> Vec<Arc<CoreBudget>> {
        self.cores()
            .into_iter()
            .filter_map(|c| self.snapshot(c))
            .collect()
    }
}
