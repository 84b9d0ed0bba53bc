// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Run results in the load generator's JSON shape.
//!
//! The harness reads `global options.rw`, each job's `read`/`write` block,
//! `lat_ns.percentile` keyed like `99.900000`, and `usr_cpu`/`sys_cpu`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::companion::Companion;
use crate::dispatcher::{JobContext, TeardownReport};
use crate::driver::Driver;
use crate::engine::{Delivery, Engine};
use crate::request::OpKind;
use crate::scheduler::{SchedulerMetrics, SchedulerMode};
use crate::telemetry::{percentile_key, LatencySummary, PERCENTILE_LIST};
use crate::types::JobId;

/// Written into the `fio version` field.
pub const RESULT_VERSION: &str = concat!("aeolia-", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub percentile: BTreeMap<String, u64>,
}

/// One direction (`read` or `write`) of a job group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoStats {
    pub io_bytes: u64,
    pub io_kbytes: u64,
    /// KiB/s
    pub bw: u64,
    pub iops: f64,
    /// Milliseconds.
    pub runtime: u64,
    pub total_ios: u64,
    pub lat_ns: LatencyStats,
}

impl IoStats {
    fn from_summary(summary: &LatencySummary, elapsed_ns: u64) -> Self {
        let secs = elapsed_ns as f64 / 1e9;
        let (iops, bw) = if secs > 0.0 {
            (
                summary.ops as f64 / secs,
                (summary.bytes as f64 / 1024.0 / secs) as u64,
            )
        } else {
            (0.0, 0)
        };
        Self {
            io_bytes: summary.bytes,
            io_kbytes: summary.bytes / 1024,
            bw,
            iops,
            runtime: elapsed_ns / 1_000_000,
            total_ios: summary.ops,
            lat_ns: LatencyStats {
                min: summary.min_ns,
                max: summary.max_ns,
                mean: summary.mean_ns,
                percentile: summary
                    .percentiles
                    .iter()
                    .map(|&(p, v)| (percentile_key(p), v))
                    .collect(),
            },
        }
    }

    /// Value at `p`, if it was reported.
    pub fn percentile(&self, p: f64) -> Option<u64> {
        self.lat_ns.percentile.get(&percentile_key(p)).copied()
    }
}

/// CPU utilisation of a job group, in percent of one core.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuUsage {
    pub usr: f64,
    pub sys: f64,
}

impl CpuUsage {
    /// Usage measured from thread CPU times over `elapsed_ns`.
    pub fn measured(user_ns: u64, system_ns: u64, elapsed_ns: u64) -> Self {
        if elapsed_ns == 0 {
            return Self::default();
        }
        let pct = |ns: u64| (ns as f64 / elapsed_ns as f64 * 100.0).min(100.0);
        Self {
            usr: pct(user_ns),
            sys: pct(system_ns),
        }
    }

    /// Usage the simulator assigns an I/O context.
    ///
    /// Polling contexts spin the whole run. Others are busy for the
    /// submission overhead of each request. Userspace engines account it
    /// as user time, kernel engines as system time.
    pub fn modelled(engine: Engine, delivery: Delivery, ops: u64, overhead_ns: u64, elapsed_ns: u64) -> Self {
        if elapsed_ns == 0 {
            return Self::default();
        }
        let busy = match delivery {
            Delivery::Poll => 100.0,
            Delivery::Inline | Delivery::Interrupt => {
                (ops.saturating_mul(overhead_ns) as f64 / elapsed_ns as f64 * 100.0).min(100.0)
            }
        };
        if engine.needs_preload() {
            Self { usr: busy, sys: 0.0 }
        } else {
            Self { usr: 0.0, sys: busy }
        }
    }
}

/// One job group, reported as FIO does with `group_reporting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub jobname: String,
    pub groupid: u32,
    #[serde(rename = "job options", default)]
    pub job_options: BTreeMap<String, String>,
    pub read: IoStats,
    pub write: IoStats,
    pub usr_cpu: f64,
    pub sys_cpu: f64,
    #[serde(default)]
    pub abandoned: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeResult {
    pub jobname: String,
    pub batch_ops: u64,
    pub batch_ops_per_sec: f64,
}

/// Driver-side view of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverReport {
    pub engine: Engine,
    pub mode: SchedulerMode,
    #[serde(flatten)]
    pub companion: Companion,
    pub teardown: TeardownReport,
    pub backpressure: u64,
    pub scheduler: Vec<SchedulerMetrics>,
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(rename = "fio version")]
    pub version: String,
    #[serde(rename = "global options")]
    pub global_options: BTreeMap<String, String>,
    pub jobs: Vec<JobResult>,
    #[serde(default)]
    pub compute: Vec<ComputeResult>,
    pub driver: DriverReport,
}

impl RunResult {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn job(&self, name: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.jobname == name)
    }

    /// The direction `global options.rw` selects for `job`.
    pub fn io_of<'a>(&self, job: &'a JobResult) -> &'a IoStats {
        match self.global_options.get("rw").map(String::as_str) {
            Some("randwrite") => &job.write,
            _ => &job.read,
        }
    }
}

/// Counters a run collects besides the recorder.
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    /// Measured span, after any ramp.
    pub elapsed_ns: u64,
    pub compute_ops: HashMap<JobId, u64>,
    pub cpu: HashMap<JobId, CpuUsage>,
    pub teardown: TeardownReport,
    pub backpressure: u64,
}

/// Build the result of a finished run.
pub fn collect(driver: &Driver, totals: &RunTotals) -> RunResult {
    let config = driver.config();
    let recorder = driver.recorder();
    let contexts = driver.dispatcher().contexts();

    let mut global_options = BTreeMap::new();
    global_options.insert("ioengine".to_string(), config.engine.fio_ioengine().to_string());
    global_options.insert("runtime".to_string(), (config.runtime_ms / 1000).max(1).to_string());
    global_options.insert(
        "percentile_list".to_string(),
        PERCENTILE_LIST.map(|p| p.to_string()).join(":"),
    );
    if let Some(first) = config.io_jobs().next() {
        if let crate::config::JobKind::Io { iotype, .. } = &first.kind {
            global_options.insert("rw".to_string(), iotype.name().to_string());
        }
        global_options.insert("cpus_allowed_policy".to_string(), first.policy.name().to_string());
    }
    if config.engine.is_tunable() {
        for option in config.driver.flags.fio_options() {
            if let Some((k, v)) = option.split_once('=') {
                global_options.insert(k.to_string(), v.to_string());
            }
        }
    }

    let mut jobs = Vec::new();
    let mut compute = Vec::new();
    let secs = totals.elapsed_ns as f64 / 1e9;

    for (groupid, spec) in config.jobs.iter().enumerate() {
        let members: Vec<&JobContext> = contexts.iter().copied().filter(|c| c.group == spec.name).collect();
        let ids: Vec<JobId> = members.iter().map(|c| c.id).collect();

        if !spec.is_io() {
            let ops: u64 = ids.iter().filter_map(|id| totals.compute_ops.get(id)).sum();
            compute.push(ComputeResult {
                jobname: spec.name.clone(),
                batch_ops: ops,
                batch_ops_per_sec: if secs > 0.0 { ops as f64 / secs } else { 0.0 },
            });
            continue;
        }

        let summary = recorder.summary(&ids);
        let (read, write) = match members.first().and_then(|c| c.op_kind()) {
            Some(OpKind::Write) => (IoStats::default(), IoStats::from_summary(&summary, totals.elapsed_ns)),
            _ => (IoStats::from_summary(&summary, totals.elapsed_ns), IoStats::default()),
        };

        let usage: Vec<CpuUsage> = ids.iter().filter_map(|id| totals.cpu.get(id).copied()).collect();
        let n = usage.len().max(1) as f64;

        let mut job_options = BTreeMap::new();
        if let crate::config::JobKind::Io { iodepth, bs, .. } = &spec.kind {
            job_options.insert("iodepth".to_string(), iodepth.to_string());
            job_options.insert("bs".to_string(), bs.to_string());
        }
        job_options.insert("numjobs".to_string(), spec.numjobs.to_string());
        job_options.insert("cpus_allowed".to_string(), spec.cpus_allowed.to_string());
        job_options.insert("nice".to_string(), spec.nice.value().to_string());

        jobs.push(JobResult {
            jobname: spec.name.clone(),
            groupid: groupid as u32,
            job_options,
            read,
            write,
            usr_cpu: usage.iter().map(|u| u.usr).sum::<f64>() / n,
            sys_cpu: usage.iter().map(|u| u.sys).sum::<f64>() / n,
            abandoned: summary.abandoned,
        });
    }

    RunResult {
        version: RESULT_VERSION.to_string(),
        global_options,
        jobs,
        compute,
        driver: DriverReport {
            engine: config.engine,
            mode: driver.scheduler().mode(),
            companion: driver.companion().clone(),
            teardown: totals.teardown,
            backpressure: totals.backpressure,
            scheduler: driver.scheduler().metrics(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_usage_measured() {
        let u = CpuUsage::measured(250_000_000, 50_000_000, 1_000_000_000);
        assert!((u.usr - 25.0).abs() < 1e-9);
        assert!((u.sys - 5.0).abs() < 1e-9);
        assert_eq!(CpuUsage::measured(1, 1, 0), CpuUsage::default());
    }

    #[test]
    fn test_cpu_usage_modelled() {
        let poll = CpuUsage::modelled(Engine::Spdk, Delivery::Poll, 10, 250, 1_000_000);
        assert_eq!(poll, CpuUsage { usr: 100.0, sys: 0.0 });

        let kernel = CpuUsage::modelled(Engine::IoUringDefault, Delivery::Interrupt, 1000, 900, 1_000_000_000);
        assert_eq!(kernel.usr, 0.0);
        assert!((kernel.sys - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_io_stats_from_summary() {
        let summary = LatencySummary {
            ops: 2000,
            read_ops: 2000,
            bytes: 2000 * 4096,
            min_ns: 10_000,
            max_ns: 20_000,
            mean_ns: 12_000.0,
            percentiles: vec![(50.0, 11_000), (99.9, 19_000)],
            ..LatencySummary::default()
        };
        let io = IoStats::from_summary(&summary, 2_000_000_000);
        assert_eq!(io.total_ios, 2000);
        assert!((io.iops - 1000.0).abs() < 1e-9);
        assert_eq!(io.bw, 4000);
        assert_eq!(io.runtime, 2000);
        assert_eq!(io.percentile(99.9), Some(19_000));
        assert_eq!(io.lat_ns.percentile["50.000000"], 11_000);
    }

    #[test]
    fn test_result_json_shape() {
        let mut global_options = BTreeMap::new();
        global_options.insert("rw".to_string(), "randwrite".to_string());
        let job = JobResult {
            jobname: "test".to_string(),
            groupid: 0,
            job_options: BTreeMap::new(),
            read: IoStats::default(),
            write: IoStats {
                total_ios: 7,
                ..IoStats::default()
            },
            usr_cpu: 1.0,
            sys_cpu: 2.0,
            abandoned: 0,
        };
        let result = RunResult {
            version: RESULT_VERSION.to_string(),
            global_options,
            jobs: vec![job],
            compute: vec![],
            driver: DriverReport {
                engine: Engine::Aeolia,
                mode: SchedulerMode::Degraded,
                companion: Companion::Absent,
                teardown: TeardownReport::default(),
                backpressure: 0,
                scheduler: vec![],
            },
        };

        let json = result.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["global options"]["rw"], "randwrite");
        assert_eq!(value["jobs"][0]["write"]["total_ios"], 7);
        assert_eq!(value["driver"]["engine"], "aeolia");
        assert_eq!(value["driver"]["companion"], "absent");

        let back = RunResult::from_json(&json).unwrap();
        assert_eq!(back.io_of(&back.jobs[0]).total_ios, 7);
        assert!(back.job("test").is_some());
    }
}
