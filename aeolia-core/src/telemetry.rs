// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Latency recorder.
//!
//! Populations are HDR histograms kept per (core, job) so cores never
//! contend on the same entry; they are merged read-only at reporting time.
//! Each core also keeps a bounded sliding window of recent latencies for the
//! scheduler.

use std::collections::VecDeque;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hdrhistogram::{CreationError, Histogram};
use serde::Serialize;

use crate::request::{CompletionRecord, CompletionStatus, OpKind};
use crate::types::{CoreId, JobId};

/// Percentiles reported for every job group.
pub const PERCENTILE_LIST: [f64; 6] = [50.0, 99.0, 99.5, 99.9, 99.99, 99.999];

/// Histogram precision. Latencies below 2048ns are exact, larger ones are
/// bucketed with a relative error under 0.1%.
pub const SIGNIFICANT_FIGURES: u8 = 3;

/// 1-based nearest rank of `p` in a population of `n`.
fn rank(n: u64, p: f64) -> u64 {
    // work in thousandths of a percent so 99.9 does not round up a rank
    let p_milli = (p.clamp(0.0, 100.0) * 1000.0).round() as u128;
    let n = n as u128;
    (p_milli * n).div_ceil(100_000).clamp(1, n) as u64
}

/// Nearest-rank percentile of a sorted slice.
///
/// `rank = ceil(p / 100 * N)`, 1-based; `None` when the slice is empty.
pub fn nearest_rank(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    Some(sorted[rank(sorted.len() as u64, p) as usize - 1])
}

/// Nearest-rank percentile of a histogram, reported as the highest value
/// of the bucket holding that rank.
pub fn histogram_rank(histogram: &Histogram<u64>, p: f64) -> Option<u64> {
    if histogram.is_empty() {
        return None;
    }
    let target = rank(histogram.len(), p);
    let mut seen = 0u64;
    for v in histogram.iter_recorded() {
        seen += v.count_at_value();
        if seen >= target {
            return Some(histogram.highest_equivalent(v.value_iterated_to()));
        }
    }
    Some(histogram.highest_equivalent(histogram.max()))
}

/// Key used for FIO percentile maps, e.g. `99.900000`.
pub fn percentile_key(p: f64) -> String {
    format!("{:.6}", p)
}

#[derive(Debug)]
struct Population {
    histogram: Histogram<u64>,
    read_ops: u64,
    write_ops: u64,
    bytes: u64,
    abandoned: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u128,
}

impl Population {
    fn new() -> Result<Self, CreationError> {
        Ok(Self {
            histogram: Histogram::new(SIGNIFICANT_FIGURES)?,
            read_ops: 0,
            write_ops: 0,
            bytes: 0,
            abandoned: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
        })
    }

    fn record(&mut self, rec: &CompletionRecord) {
        match rec.status {
            CompletionStatus::Ok => {
                if let Err(e) = self.histogram.record(rec.latency_ns) {
                    tracing::warn!(latency_ns = rec.latency_ns, error = %e, "Latency not recorded");
                    return;
                }
                self.min_ns = self.min_ns.min(rec.latency_ns);
                self.max_ns = self.max_ns.max(rec.latency_ns);
                self.sum_ns += rec.latency_ns as u128;
                self.bytes += rec.length as u64;
                match rec.op_kind {
                    OpKind::Read => self.read_ops += 1,
                    OpKind::Write => self.write_ops += 1,
                }
            }
            CompletionStatus::Abandoned => self.abandoned += 1,
        }
    }
}

/// Aggregate over one or more jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub ops: u64,
    pub read_ops: u64,
    pub write_ops: u64,
    pub bytes: u64,
    pub abandoned: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    /// `(p, value)` for each entry of [`PERCENTILE_LIST`].
    pub percentiles: Vec<(f64, u64)>,
}

/// Recent latencies of one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub samples: usize,
    pub p999_ns: Option<u64>,
}

/// Concurrent latency recorder.
#[derive(Debug)]
pub struct LatencyRecorder {
    populations: DashMap<(CoreId, JobId), Population>,
    windows: DashMap<CoreId, VecDeque<u64>>,
    window_size: usize,
}

impl LatencyRecorder {
    pub fn new(window_size: usize) -> Self {
        Self {
            populations: DashMap::new(),
            windows: DashMap::new(),
            window_size: window_size.max(1),
        }
    }

    /// Record one completion.
    pub fn record(&self, rec: &CompletionRecord) {
        match self.populations.entry((rec.core, rec.job_id)) {
            Entry::Occupied(mut e) => e.get_mut().record(rec),
            Entry::Vacant(e) => match Population::new() {
                Ok(mut pop) => {
                    pop.record(rec);
                    e.insert(pop);
                }
                Err(err) => {
                    tracing::error!(core = %rec.core, job = %rec.job_id, error = %err, "Failed to create latency histogram");
                    return;
                }
            },
        }

        if rec.status == CompletionStatus::Ok {
            let mut window = self.windows.entry(rec.core).or_default();
            if window.len() == self.window_size {
                window.pop_front();
            }
            window.push_back(rec.latency_ns);
        }
    }

    /// Merge the histograms of every population `filter` accepts.
    fn merged(&self, filter: impl Fn(CoreId, JobId) -> bool) -> Option<Histogram<u64>> {
        let mut merged: Option<Histogram<u64>> = None;
        for entry in self.populations.iter().filter(|e| filter(e.key().0, e.key().1)) {
            let histogram = &entry.value().histogram;
            if let Some(m) = merged.as_mut() {
                if let Err(e) = m.add(histogram) {
                    tracing::warn!(error = %e, "Failed to merge latency histograms");
                }
            } else {
                merged = Some(histogram.clone());
            }
        }
        merged
    }

    fn percentile_where(&self, p: f64, filter: impl Fn(CoreId, JobId) -> bool) -> Option<u64> {
        self.merged(filter).and_then(|h| histogram_rank(&h, p))
    }

    /// Percentile over every successful completion recorded so far.
    pub fn percentile(&self, p: f64) -> Option<u64> {
        self.percentile_where(p, |_, _| true)
    }

    pub fn percentile_for_job(&self, job: JobId, p: f64) -> Option<u64> {
        self.percentile_where(p, |_, j| j == job)
    }

    pub fn percentile_for_core(&self, core: CoreId, p: f64) -> Option<u64> {
        self.percentile_where(p, |c, _| c == core)
    }

    /// Recent-latency view the scheduler retunes from.
    pub fn window_snapshot(&self, core: CoreId) -> WindowSnapshot {
        let mut samples: Vec<u64> = self
            .windows
            .get(&core)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default();
        samples.sort_unstable();
        WindowSnapshot {
            samples: samples.len(),
            p999_ns: nearest_rank(&samples, 99.9),
        }
    }

    /// Forget a core's recent latencies, e.g. after its budget changed.
    pub fn clear_window(&self, core: CoreId) {
        if let Some(mut window) = self.windows.get_mut(&core) {
            window.clear();
        }
    }

    /// Summary of one job across every core it ran on.
    pub fn job_summary(&self, job: JobId) -> LatencySummary {
        self.summary(&[job])
    }

    /// Summary over a group of jobs, as FIO reports with `group_reporting`.
    pub fn summary(&self, jobs: &[JobId]) -> LatencySummary {
        let mut summary = LatencySummary::default();
        let mut min_ns = u64::MAX;
        let mut sum_ns = 0u128;

        for entry in self.populations.iter().filter(|e| jobs.contains(&e.key().1)) {
            let pop = entry.value();
            summary.read_ops += pop.read_ops;
            summary.write_ops += pop.write_ops;
            summary.bytes += pop.bytes;
            summary.abandoned += pop.abandoned;
            min_ns = min_ns.min(pop.min_ns);
            summary.max_ns = summary.max_ns.max(pop.max_ns);
            sum_ns += pop.sum_ns;
        }

        summary.ops = summary.read_ops + summary.write_ops;
        if summary.ops == 0 {
            return summary;
        }
        summary.min_ns = min_ns;
        summary.mean_ns = sum_ns as f64 / summary.ops as f64;

        if let Some(histogram) = self.merged(|_, j| jobs.contains(&j)) {
            summary.percentiles = PERCENTILE_LIST
                .iter()
                .filter_map(|&p| histogram_rank(&histogram, p).map(|v| (p, v)))
                .collect();
        }
        summary
    }

    /// Records seen, including abandoned requests.
    pub fn total_records(&self) -> u64 {
        self.populations
            .iter()
            .map(|e| {
                let p = e.value();
                p.read_ops + p.write_ops + p.abandoned
            })
            .sum()
    }

    /// Drop all state between configurations.
    pub fn reset(&self) {
        self.populations.clear();
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestId;

    fn rec(core: u16, job: u32, latency_ns: u64, status: CompletionStatus) -> CompletionRecord {
        CompletionRecord {
            request_id: RequestId::new(0),
            job_id: JobId::new(job),
            core: CoreId::new(core),
            op_kind: OpKind::Read,
            length: 4096,
            complete_ns: latency_ns,
            status,
            latency_ns,
        }
    }

    #[test]
    fn test_nearest_rank() {
        let sorted: Vec<u64> = (1..=1000).collect();
        assert_eq!(nearest_rank(&sorted, 50.0), Some(500));
        assert_eq!(nearest_rank(&sorted, 99.0), Some(990));
        assert_eq!(nearest_rank(&sorted, 99.9), Some(999));
        assert_eq!(nearest_rank(&sorted, 99.99), Some(1000));
        assert_eq!(nearest_rank(&sorted, 100.0), Some(1000));
        assert_eq!(nearest_rank(&sorted, 0.0), Some(1));
        assert_eq!(nearest_rank(&[], 50.0), None);
    }

    #[test]
    fn test_nearest_rank_small_population() {
        assert_eq!(nearest_rank(&[7], 99.999), Some(7));
        assert_eq!(nearest_rank(&[1, 2, 3, 4], 50.0), Some(2));
        assert_eq!(nearest_rank(&[1, 2, 3, 4], 51.0), Some(3));
    }

    #[test]
    fn test_percentile_key() {
        assert_eq!(percentile_key(50.0), "50.000000");
        assert_eq!(percentile_key(99.99), "99.990000");
    }

    #[test]
    fn test_percentile_idempotent() {
        let recorder = LatencyRecorder::new(16);
        for l in [30, 10, 20, 50, 40] {
            recorder.record(&rec(0, 0, l, CompletionStatus::Ok));
        }
        let first = recorder.percentile(99.9);
        assert_eq!(first, Some(50));
        assert_eq!(recorder.percentile(99.9), first);
        assert_eq!(recorder.percentile(50.0), Some(30));
    }

    #[test]
    fn test_empty_population() {
        let recorder = LatencyRecorder::new(16);
        assert_eq!(recorder.percentile(50.0), None);
        assert_eq!(recorder.window_snapshot(CoreId::new(0)).samples, 0);
        let summary = recorder.job_summary(JobId::new(0));
        assert_eq!(summary.ops, 0);
        assert!(summary.percentiles.is_empty());
    }

    #[test]
    fn test_abandoned_not_in_population() {
        let recorder = LatencyRecorder::new(16);
        recorder.record(&rec(0, 1, 100, CompletionStatus::Ok));
        recorder.record(&rec(0, 1, 0, CompletionStatus::Abandoned));

        let summary = recorder.job_summary(JobId::new(1));
        assert_eq!(summary.ops, 1);
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.min_ns, 100);
        assert_eq!(recorder.total_records(), 2);
        assert_eq!(recorder.window_snapshot(CoreId::new(0)).samples, 1);
    }

    #[test]
    fn test_window_slides() {
        let recorder = LatencyRecorder::new(4);
        for l in 1..=10 {
            recorder.record(&rec(2, 0, l * 100, CompletionStatus::Ok));
        }
        let snap = recorder.window_snapshot(CoreId::new(2));
        assert_eq!(snap.samples, 4);
        assert_eq!(snap.p999_ns, Some(1000));

        recorder.clear_window(CoreId::new(2));
        assert_eq!(recorder.window_snapshot(CoreId::new(2)).p999_ns, None);
        // population is unaffected
        assert_eq!(recorder.percentile_for_core(CoreId::new(2), 0.0), Some(100));
    }

    #[test]
    fn test_group_summary() {
        let recorder = LatencyRecorder::new(16);
        recorder.record(&rec(0, 0, 100, CompletionStatus::Ok));
        recorder.record(&rec(1, 1, 300, CompletionStatus::Ok));
        recorder.record(&rec(2, 2, 900, CompletionStatus::Ok));

        let group = recorder.summary(&[JobId::new(0), JobId::new(1)]);
        assert_eq!(group.ops, 2);
        assert_eq!(group.bytes, 8192);
        assert_eq!(group.max_ns, 300);
        assert_eq!(group.mean_ns, 200.0);
        assert_eq!(group.percentiles.len(), PERCENTILE_LIST.len());
        assert_eq!(recorder.percentile_for_job(JobId::new(2), 50.0), Some(900));
    }

    #[test]
    fn test_reset() {
        let recorder = LatencyRecorder::new(16);
        recorder.record(&rec(0, 0, 100, CompletionStatus::Ok));
        recorder.reset();
        assert_eq!(recorder.total_records(), 0);
        assert_eq!(recorder.percentile(50.0), None);
    }

    #[test]
    fn test_concurrent_recording() {
        let recorder = std::sync::Arc::new(LatencyRecorder::new(128));
        let handles: Vec<_> = (0..4u16)
            .map(|core| {
                let recorder = std::sync::Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for l in 0..250 {
                        recorder.record(&rec(core, core as u32, l, CompletionStatus::Ok));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(recorder.total_records(), 1000);
    }

    #[test]
    fn test_histogram_matches_exact_rank_in_low_range() {
        let recorder = LatencyRecorder::new(16);
        let mut sorted = Vec::new();
        for i in 0..2_000u64 {
            let l = 1 + (i * 7919) % 2_000;
            recorder.record(&rec(0, 0, l, CompletionStatus::Ok));
            sorted.push(l);
        }
        sorted.sort_unstable();
        for p in PERCENTILE_LIST {
            assert_eq!(recorder.percentile(p), nearest_rank(&sorted, p));
        }
    }

    #[test]
    fn test_bucketed_percentile_within_precision() {
        let recorder = LatencyRecorder::new(16);
        for l in [8_000u64, 9_000, 10_001, 12_345, 20_000_000] {
            recorder.record(&rec(1, 0, l, CompletionStatus::Ok));
        }
        let p50 = recorder.percentile(50.0).unwrap();
        assert!(p50 >= 10_001 && p50 <= 10_001 + 10_001 / 1000, "p50 {}", p50);

        // exact extremes and mean come from the raw values
        let summary = recorder.job_summary(JobId::new(0));
        assert_eq!(summary.min_ns, 8_000);
        assert_eq!(summary.max_ns, 20_000_000);
        assert_eq!(summary.mean_ns, 20_039_346.0 / 5.0);
    }

    #[test]
    fn test_memory_independent_of_population() {
        let recorder = LatencyRecorder::new(16);
        for i in 0..100_000u64 {
            recorder.record(&rec(0, 0, 5_000 + i % 50_000, CompletionStatus::Ok));
        }
        let pop = recorder.populations.get(&(CoreId::new(0), JobId::new(0))).unwrap();
        assert_eq!(pop.histogram.len(), 100_000);
        let buckets = pop.histogram.distinct_values();
        drop(pop);
        // more samples in the same range add no buckets
        for i in 0..400_000u64 {
            recorder.record(&rec(0, 0, 5_000 + i % 50_000, CompletionStatus::Ok));
        }
        let pop = recorder.populations.get(&(CoreId::new(0), JobId::new(0))).unwrap();
        assert_eq!(pop.histogram.distinct_values(), buckets);
    }
}
