// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Delivery planning: when completions become visible and in what order.
//!
//! Pure functions over slot snapshots; the queue owns the state.

use std::collections::BTreeMap;

use crate::types::JobId;

/// A completion that may be handed out at `deliver_ns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deliverable {
    pub slot: usize,
    pub job: JobId,
    pub seq: u64,
    pub deliver_ns: u64,
}

/// Instant at which the held completions trigger a coalesced interrupt.
///
/// `ready` must be sorted ascending. The batch fires when `threshold`
/// completions are ready or when the oldest one has waited `window_ns`,
/// whichever is first. Returns `None` when nothing is held.
pub(crate) fn coalesced_trigger(ready: &[u64], threshold: usize, window_ns: u64) -> Option<u64> {
    let oldest = *ready.first()?;
    let window_at = oldest.saturating_add(window_ns);
    let threshold = threshold.clamp(1, ready.len());
    Some(ready[threshold - 1].min(window_at))
}

/// Order deliverable completions for fair interleaving across jobs.
///
/// Jobs take turns round-robin. A job's turn order is its earliest
/// delivery instant, ties broken by job id; within a job completions keep
/// arrival order.
pub(crate) fn fair_order(items: Vec<Deliverable>) -> Vec<Deliverable> {
    let mut per_job: BTreeMap<JobId, Vec<Deliverable>> = BTreeMap::new();
    for item in items {
        per_job.entry(item.job).or_default().push(item);
    }

    let mut queues: Vec<Vec<Deliverable>> = per_job
        .into_values()
        .map(|mut q| {
            q.sort_by_key(|d| (d.deliver_ns, d.seq));
            q.reverse();
            q
        })
        .collect();
    // each queue is reversed, so the earliest entry is last
    queues.sort_by_key(|q| q.last().map(|d| (d.deliver_ns, d.job)));

    let total = queues.iter().map(Vec::len).sum();
    let mut ordered = Vec::with_capacity(total);
    while ordered.len() < total {
        for q in queues.iter_mut() {
            if let Some(d) = q.pop() {
                ordered.push(d);
            }
        }
    }
    ordered
}
