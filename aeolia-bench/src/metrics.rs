// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Result types of a sweep and of the overhead micro-benchmarks.

use std::collections::HashMap;
use std::fmt;

use aeolia_core::affinity::online_cores;
use aeolia_core::telemetry::nearest_rank;
use aeolia_core::{BlockSize, Engine, IoType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// One configuration of the parameter product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub engine: Engine,
    pub iotype: IoType,
    pub iodepth: u32,
    pub iosize: BlockSize,
    pub numjobs: u32,
}

impl SweepPoint {
    /// `{iotype}_{iodepth}_{iosize}_{numjobs}`, the result file stem suffix.
    pub fn param(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.iotype, self.iodepth, self.iosize, self.numjobs
        )
    }
}

impl fmt::Display for SweepPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: iotype={} iodepth={} iosize={} numjobs={}",
            self.engine, self.iotype, self.iodepth, self.iosize, self.numjobs
        )
    }
}

/// Headline numbers of one finished configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub point: SweepPoint,
    /// Result file written for this configuration.
    pub result_file: String,
    pub attempts: u32,
    pub iops: f64,
    pub p50_ns: Option<u64>,
    pub p999_ns: Option<u64>,
    /// Only present when a compute task co-ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_ops_per_sec: Option<f64>,
}

impl SweepEntry {
    /// Pull the headline numbers out of a result blob.
    ///
    /// Works on both the driver's own results and raw FIO output: only the
    /// first job's `read`/`write` section and the optional `compute` list
    /// are read.
    pub fn from_result(
        point: SweepPoint,
        result_file: String,
        attempts: u32,
        result: &serde_json::Value,
    ) -> Self {
        let io = &result["jobs"][0][point.iotype.op_kind().name()];
        let pct = |key: &str| io["lat_ns"]["percentile"][key].as_u64();
        let batch_ops_per_sec = result["compute"]
            .as_array()
            .and_then(|c| c.first())
            .and_then(|c| c["batch_ops_per_sec"].as_f64());

        Self {
            point,
            result_file,
            attempts,
            iops: io["iops"].as_f64().unwrap_or(0.0),
            p50_ns: pct("50.000000"),
            p999_ns: pct("99.900000"),
            batch_ops_per_sec,
        }
    }
}

/// Latency distribution of an overhead micro-benchmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
    pub std_dev_ns: f64,
}

impl LatencyMetrics {
    /// Summarise samples in nanoseconds; an empty set is all zeros.
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        samples.sort_unstable();
        let (Some(&min_ns), Some(&max_ns)) = (samples.first(), samples.last()) else {
            return Self::default();
        };

        let n = samples.len() as f64;
        let mean_ns = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
        let sq = samples.iter().map(|&x| (x as f64 - mean_ns).powi(2)).sum::<f64>();
        let at = |p| nearest_rank(&samples, p).unwrap_or(max_ns);

        Self {
            min_ns,
            max_ns,
            mean_ns,
            p50_ns: at(50.0),
            p99_ns: at(99.0),
            p999_ns: at(99.9),
            std_dev_ns: (sq / n).sqrt(),
        }
    }

    /// Render `ns` with the largest unit that keeps it at or above one.
    pub fn format_latency(ns: u64) -> String {
        match ns {
            0..=999 => format!("{}ns", ns),
            1_000..=999_999 => format!("{:.2}μs", ns as f64 / 1e3),
            1_000_000..=999_999_999 => format!("{:.2}ms", ns as f64 / 1e6),
            _ => format!("{:.2}s", ns as f64 / 1e9),
        }
    }
}

/// One overhead micro-benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverheadResult {
    pub name: String,
    pub iterations: u64,
    pub latency: LatencyMetrics,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OverheadResult {
    pub fn new(name: impl Into<String>, samples: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            iterations: samples.len() as u64,
            latency: LatencyMetrics::from_samples(samples),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Host the sweep ran on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub kernel_version: Option<String>,
    pub cpu_model: String,
    pub logical_cpus: usize,
    /// Cores the driver can pin to.
    pub online_cores: Vec<u16>,
    pub memory_bytes: u64,
    pub hostname: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        let unknown = |v: Option<String>| v.unwrap_or_else(|| "unknown".to_string());

        Self {
            os: format!(
                "{} {}",
                unknown(System::name()),
                unknown(System::os_version())
            ),
            kernel_version: System::kernel_version(),
            cpu_model: unknown(sys.cpus().first().map(|c| c.brand().trim().to_string())),
            logical_cpus: sys.cpus().len(),
            online_cores: online_cores().into_iter().map(|c| c.value()).collect(),
            memory_bytes: sys.total_memory(),
            hostname: unknown(System::host_name()),
        }
    }
}

/// Summary of a whole sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub benchmark_suite: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub system_info: SystemInfo,
    pub sweep: Vec<SweepEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overhead: Vec<OverheadResult>,
}

impl BenchmarkReport {
    pub fn new() -> Self {
        Self {
            benchmark_suite: "aeolia-benchmarks".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            system_info: SystemInfo::collect(),
            sweep: Vec::new(),
            overhead: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, entry: SweepEntry) {
        self.sweep.push(entry);
    }

    pub fn add_overhead(&mut self, result: OverheadResult) {
        self.overhead.push(result);
    }

    /// Entries of one engine, in sweep order.
    pub fn entries_for(&self, engine: Engine) -> impl Iterator<Item = &SweepEntry> {
        self.sweep.iter().filter(move |e| e.point.engine == engine)
    }
}

impl Default for BenchmarkReport {
    fn default() -> Self {
        Self::new()
    }
}
