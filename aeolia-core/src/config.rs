// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML run configuration with strict validation.
//!
//! A configuration is parsed into raw structs and then validated into typed
//! values. Any invalid field is a `ConfigError`, reported before any I/O is
//! issued.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::{CpuPolicy, DriverFlags, Engine};
use crate::error::{ConfigError, DriverError, DriverResult};
use crate::request::IoType;
use crate::types::{BlockSize, CpuList, IoDepth, Nice};

/// Default pinned-map path of the companion scheduler.
pub const DEFAULT_COMPANION_PATH: &str = "/sys/fs/bpf/scx_rq_ctx_stor";
/// Default scheduler time slice (SCX_SLICE_DFL).
pub const DEFAULT_PREEMPT_SLICE_NS: u64 = 20_000_000;
/// Capacity of the evaluation device.
pub const DEFAULT_CAPACITY_BYTES: u64 = 40_008_845_721;

const MAX_RUNTIME_MS: u64 = 3_600_000;

// =============================================================================
// Raw configuration (as parsed from YAML)
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDriverConfig {
    #[serde(rename = "type", default = "default_one")]
    class: u8,
    #[serde(default = "default_one")]
    intr: u8,
    #[serde(default = "default_one")]
    coalescing: u8,
    #[serde(default = "default_coalescing_window_us")]
    coalescing_window_us: u64,
    #[serde(default = "default_coalescing_threshold")]
    coalescing_threshold: u32,
    #[serde(default = "default_max_batch")]
    max_batch: u32,
}

fn default_one() -> u8 {
    1
}

fn default_coalescing_window_us() -> u64 {
    20
}

fn default_coalescing_threshold() -> u32 {
    8
}

fn default_max_batch() -> u32 {
    32
}

impl Default for RawDriverConfig {
    fn default() -> Self {
        Self {
            class: 1,
            intr: 1,
            coalescing: 1,
            coalescing_window_us: default_coalescing_window_us(),
            coalescing_threshold: default_coalescing_threshold(),
            max_batch: default_max_batch(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDeviceConfig {
    #[serde(default = "default_baseline_latency_ns")]
    baseline_latency_ns: u64,
    #[serde(default = "default_jitter_ns")]
    jitter_ns: u64,
    #[serde(default = "default_bandwidth_mbps")]
    bandwidth_mbps: u64,
    #[serde(default = "default_capacity_bytes")]
    capacity_bytes: u64,
    #[serde(default = "default_preempt_slice_ns")]
    preempt_slice_ns: u64,
}

fn default_baseline_latency_ns() -> u64 {
    8_000
}

fn default_jitter_ns() -> u64 {
    2_000
}

fn default_bandwidth_mbps() -> u64 {
    3_000
}

fn default_capacity_bytes() -> u64 {
    DEFAULT_CAPACITY_BYTES
}

fn default_preempt_slice_ns() -> u64 {
    DEFAULT_PREEMPT_SLICE_NS
}

impl Default for RawDeviceConfig {
    fn default() -> Self {
        Self {
            baseline_latency_ns: default_baseline_latency_ns(),
            jitter_ns: default_jitter_ns(),
            bandwidth_mbps: default_bandwidth_mbps(),
            capacity_bytes: default_capacity_bytes(),
            preempt_slice_ns: default_preempt_slice_ns(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchedulerConfig {
    #[serde(default = "default_slo_p999_us")]
    slo_p999_us: u64,
    #[serde(default = "default_low_watermark")]
    low_watermark: f64,
    #[serde(default = "default_compute_target_ops")]
    compute_target_ops: f64,
    #[serde(default = "default_window")]
    window: usize,
    #[serde(default = "default_retune_interval_ms")]
    retune_interval_ms: u64,
    #[serde(default = "default_step")]
    step: f64,
    #[serde(default = "default_min_io_share")]
    min_io_share: f64,
    #[serde(default = "default_min_compute_share")]
    min_compute_share: f64,
    #[serde(default = "default_max_coalescing_us")]
    max_coalescing_us: u64,
    #[serde(default = "default_companion_paths")]
    companion_paths: Vec<PathBuf>,
}

fn default_slo_p999_us() -> u64 {
    10_000
}

fn default_low_watermark() -> f64 {
    0.5
}

fn default_compute_target_ops() -> f64 {
    1.0
}

fn default_window() -> usize {
    1024
}

fn default_retune_interval_ms() -> u64 {
    10
}

fn default_step() -> f64 {
    0.1
}

fn default_min_io_share() -> f64 {
    0.1
}

fn default_min_compute_share() -> f64 {
    0.05
}

fn default_max_coalescing_us() -> u64 {
    200
}

fn default_companion_paths() -> Vec<PathBuf> {
    vec![PathBuf::from(DEFAULT_COMPANION_PATH)]
}

impl Default for RawSchedulerConfig {
    fn default() -> Self {
        Self {
            slo_p999_us: default_slo_p999_us(),
            low_watermark: default_low_watermark(),
            compute_target_ops: default_compute_target_ops(),
            window: default_window(),
            retune_interval_ms: default_retune_interval_ms(),
            step: default_step(),
            min_io_share: default_min_io_share(),
            min_compute_share: default_min_compute_share(),
            max_coalescing_us: default_max_coalescing_us(),
            companion_paths: default_companion_paths(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJobConfig {
    name: String,
    #[serde(default = "default_kind")]
    kind: String,
    iotype: Option<String>,
    iodepth: Option<u32>,
    bs: Option<String>,
    #[serde(default = "default_numjobs")]
    numjobs: u32,
    cpus_allowed: String,
    cpus_allowed_policy: Option<String>,
    #[serde(default)]
    nice: i32,
    #[serde(default = "default_batch_cost_ns")]
    batch_cost_ns: u64,
    number_ios: Option<u64>,
}

fn default_kind() -> String {
    "io".to_string()
}

fn default_numjobs() -> u32 {
    1
}

fn default_batch_cost_ns() -> u64 {
    1_000_000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    engine: String,
    #[serde(default = "default_runtime_ms")]
    runtime_ms: u64,
    #[serde(default)]
    ramp_ms: u64,
    filename: Option<PathBuf>,
    #[serde(default)]
    seed: u64,
    #[serde(default)]
    driver: RawDriverConfig,
    #[serde(default)]
    device: RawDeviceConfig,
    #[serde(default)]
    scheduler: RawSchedulerConfig,
    jobs: Vec<RawJobConfig>,
}

fn default_runtime_ms() -> u64 {
    10_000
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Driver knobs and completion-path thresholds.
#[derive(Debug, Clone, Serialize)]
pub struct DriverConfig {
    pub flags: DriverFlags,
    /// Base coalescing window; zero disables coalescing.
    pub coalescing_window_ns: u64,
    /// Completions that trigger an early coalesced delivery.
    pub coalescing_threshold: u32,
    /// Upper bound on completions handed out per poll.
    pub max_batch: u32,
}

impl DriverConfig {
    /// Window the scheduler starts from; zero unless coalescing is on.
    pub fn base_coalescing_ns(&self) -> u64 {
        if self.flags.coalescing && self.flags.interrupt_enabled() {
            self.coalescing_window_ns
        } else {
            0
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            flags: DriverFlags::default(),
            coalescing_window_ns: default_coalescing_window_us() * 1_000,
            coalescing_threshold: default_coalescing_threshold(),
            max_batch: default_max_batch(),
        }
    }
}

/// Parameters of the simulated device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceConfig {
    pub baseline_latency_ns: u64,
    pub jitter_ns: u64,
    pub bandwidth_mbps: u64,
    pub capacity_bytes: u64,
    /// Time slice a compute task may hold a core before preemption.
    pub preempt_slice_ns: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            baseline_latency_ns: default_baseline_latency_ns(),
            jitter_ns: default_jitter_ns(),
            bandwidth_mbps: default_bandwidth_mbps(),
            capacity_bytes: default_capacity_bytes(),
            preempt_slice_ns: default_preempt_slice_ns(),
        }
    }
}

/// Cross-task scheduler policy. Shares are in permille.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerConfig {
    pub slo_p999_ns: u64,
    pub low_watermark: f64,
    /// Compute batch ops per second below which compute is starved.
    pub compute_target_ops: f64,
    /// Sliding window size, in samples.
    pub window: usize,
    pub retune_interval_ns: u64,
    pub step_permille: u32,
    pub min_io_permille: u32,
    pub min_compute_permille: u32,
    pub max_coalescing_ns: u64,
    pub companion_paths: Vec<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slo_p999_ns: default_slo_p999_us() * 1_000,
            low_watermark: default_low_watermark(),
            compute_target_ops: default_compute_target_ops(),
            window: default_window(),
            retune_interval_ns: default_retune_interval_ms() * 1_000_000,
            step_permille: to_permille(default_step()),
            min_io_permille: to_permille(default_min_io_share()),
            min_compute_permille: to_permille(default_min_compute_share()),
            max_coalescing_ns: default_max_coalescing_us() * 1_000,
            companion_paths: default_companion_paths(),
        }
    }
}

/// What a job group does.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobKind {
    Io {
        iotype: IoType,
        iodepth: IoDepth,
        bs: BlockSize,
    },
    Compute {
        batch_cost_ns: u64,
    },
}

/// One job group (a FIO `[section]`), expanded to `numjobs` contexts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    pub name: String,
    pub kind: JobKind,
    pub numjobs: u32,
    pub cpus_allowed: CpuList,
    pub policy: CpuPolicy,
    pub nice: Nice,
    /// Stop each context after this many completions.
    pub number_ios: Option<u64>,
}

impl JobSpec {
    /// Convenience constructor for an I/O group.
    pub fn io(
        name: impl Into<String>,
        iotype: IoType,
        iodepth: IoDepth,
        bs: BlockSize,
        numjobs: u32,
        cpus_allowed: CpuList,
        policy: CpuPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            kind: JobKind::Io { iotype, iodepth, bs },
            numjobs,
            cpus_allowed,
            policy,
            nice: Nice::default(),
            number_ios: None,
        }
    }

    /// Convenience constructor for a compute group.
    pub fn compute(name: impl Into<String>, cpus_allowed: CpuList, batch_cost_ns: u64) -> Self {
        Self {
            name: name.into(),
            kind: JobKind::Compute { batch_cost_ns },
            numjobs: 1,
            cpus_allowed,
            policy: CpuPolicy::Shared,
            nice: Nice::default(),
            number_ios: None,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self.kind, JobKind::Io { .. })
    }

    /// Check group-level rules that do not depend on other groups.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.numjobs == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "numjobs",
                value: "0".to_string(),
                reason: format!("Job '{}' needs at least one context", self.name),
            });
        }
        if self.number_ios == Some(0) {
            return Err(ConfigError::InvalidFieldValue {
                field: "number_ios",
                value: "0".to_string(),
                reason: format!("Job '{}' must issue at least one request", self.name),
            });
        }
        if self.policy == CpuPolicy::Split && self.numjobs as usize > self.cpus_allowed.len() {
            return Err(ConfigError::SplitOversubscribed {
                job: self.name.clone(),
                numjobs: self.numjobs,
                cores: self.cpus_allowed.len(),
            });
        }
        Ok(())
    }
}

/// Complete validated configuration for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub engine: Engine,
    pub runtime_ms: u64,
    /// Warm-up discarded from the statistics.
    pub ramp_ms: u64,
    /// Block device or file; `None` runs against the simulated device.
    pub filename: Option<PathBuf>,
    pub seed: u64,
    pub driver: DriverConfig,
    pub device: DeviceConfig,
    pub scheduler: SchedulerConfig,
    pub jobs: Vec<JobSpec>,
}

impl RunConfig {
    /// Build a configuration with default sections and validate it.
    pub fn with_jobs(engine: Engine, jobs: Vec<JobSpec>) -> Result<Self, ConfigError> {
        let config = Self {
            engine,
            runtime_ms: default_runtime_ms(),
            ramp_ms: 0,
            filename: None,
            seed: 0,
            driver: DriverConfig::default(),
            device: DeviceConfig::default(),
            scheduler: SchedulerConfig::default(),
            jobs,
        };
        config.validate_jobs()?;
        Ok(config)
    }

    pub fn io_jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.jobs.iter().filter(|j| j.is_io())
    }

    pub fn compute_jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.jobs.iter().filter(|j| !j.is_io())
    }

    /// Re-run the cross-group job checks, e.g. after a sweep edits the jobs.
    pub fn validate_jobs(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.name.as_str()) {
                return Err(ConfigError::DuplicateJobName {
                    name: job.name.clone(),
                });
            }
            job.validate()?;
        }
        if self.io_jobs().next().is_none() {
            return Err(ConfigError::SchemaValidation {
                message: "At least one I/O job must be defined".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> DriverResult<RunConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DriverError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| DriverError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> DriverResult<RunConfig> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| DriverError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Ok(Self::validate(raw)?)
    }

    fn validate(raw: RawConfig) -> Result<RunConfig, ConfigError> {
        let engine: Engine = raw.engine.parse()?;

        if raw.runtime_ms == 0 || raw.runtime_ms > MAX_RUNTIME_MS {
            return Err(ConfigError::InvalidFieldValue {
                field: "runtime_ms",
                value: raw.runtime_ms.to_string(),
                reason: format!("Must be between 1 and {}", MAX_RUNTIME_MS),
            });
        }

        if raw.ramp_ms >= raw.runtime_ms {
            return Err(ConfigError::InvalidFieldValue {
                field: "ramp_ms",
                value: raw.ramp_ms.to_string(),
                reason: "Must be shorter than runtime_ms".to_string(),
            });
        }

        let driver = Self::validate_driver(raw.driver)?;
        let device = Self::validate_device(raw.device)?;
        let scheduler = Self::validate_scheduler(raw.scheduler)?;

        let mut jobs = Vec::with_capacity(raw.jobs.len());
        for raw_job in raw.jobs {
            jobs.push(Self::validate_job(raw_job, engine)?);
        }

        let config = RunConfig {
            engine,
            runtime_ms: raw.runtime_ms,
            ramp_ms: raw.ramp_ms,
            filename: raw.filename,
            seed: raw.seed,
            driver,
            device,
            scheduler,
            jobs,
        };
        config.validate_jobs()?;
        Ok(config)
    }

    fn validate_driver(raw: RawDriverConfig) -> Result<DriverConfig, ConfigError> {
        let flags = DriverFlags::from_raw(raw.class, raw.intr, raw.coalescing)?;

        if raw.max_batch == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "max_batch",
                value: "0".to_string(),
                reason: "Must be at least 1".to_string(),
            });
        }
        if raw.coalescing_threshold == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "coalescing_threshold",
                value: "0".to_string(),
                reason: "Must be at least 1".to_string(),
            });
        }

        Ok(DriverConfig {
            flags,
            coalescing_window_ns: to_ns("coalescing_window_us", raw.coalescing_window_us, 1_000)?,
            coalescing_threshold: raw.coalescing_threshold,
            max_batch: raw.max_batch,
        })
    }

    fn validate_device(raw: RawDeviceConfig) -> Result<DeviceConfig, ConfigError> {
        if raw.bandwidth_mbps == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "bandwidth_mbps",
                value: "0".to_string(),
                reason: "Must be positive".to_string(),
            });
        }
        if raw.capacity_bytes < crate::types::MAX_BLOCK_SIZE as u64 {
            return Err(ConfigError::InvalidFieldValue {
                field: "capacity_bytes",
                value: raw.capacity_bytes.to_string(),
                reason: "Device must hold at least one maximum-size block".to_string(),
            });
        }

        Ok(DeviceConfig {
            baseline_latency_ns: raw.baseline_latency_ns,
            jitter_ns: raw.jitter_ns,
            bandwidth_mbps: raw.bandwidth_mbps,
            capacity_bytes: raw.capacity_bytes,
            preempt_slice_ns: raw.preempt_slice_ns,
        })
    }

    fn validate_scheduler(raw: RawSchedulerConfig) -> Result<SchedulerConfig, ConfigError> {
        let fraction = |field: &'static str, value: f64| -> Result<u32, ConfigError> {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidFieldValue {
                    field,
                    value: value.to_string(),
                    reason: "Must be in (0, 1]".to_string(),
                });
            }
            Ok(to_permille(value))
        };

        let step_permille = fraction("step", raw.step)?;
        let min_io_permille = fraction("min_io_share", raw.min_io_share)?;
        let min_compute_permille = fraction("min_compute_share", raw.min_compute_share)?;
        fraction("low_watermark", raw.low_watermark)?;

        if min_io_permille + min_compute_permille > 1000 {
            return Err(ConfigError::InvalidFieldValue {
                field: "min_io_share",
                value: raw.min_io_share.to_string(),
                reason: "min_io_share + min_compute_share must not exceed 1".to_string(),
            });
        }
        if raw.slo_p999_us == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "slo_p999_us",
                value: "0".to_string(),
                reason: "Must be positive".to_string(),
            });
        }
        if raw.window == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "window",
                value: "0".to_string(),
                reason: "Must hold at least one sample".to_string(),
            });
        }
        if raw.retune_interval_ms == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "retune_interval_ms",
                value: "0".to_string(),
                reason: "Must be positive".to_string(),
            });
        }
        if !(raw.compute_target_ops >= 0.0 && raw.compute_target_ops.is_finite()) {
            return Err(ConfigError::InvalidFieldValue {
                field: "compute_target_ops",
                value: raw.compute_target_ops.to_string(),
                reason: "Must be a non-negative rate".to_string(),
            });
        }

        Ok(SchedulerConfig {
            slo_p999_ns: to_ns("slo_p999_us", raw.slo_p999_us, 1_000)?,
            low_watermark: raw.low_watermark,
            compute_target_ops: raw.compute_target_ops,
            window: raw.window,
            retune_interval_ns: to_ns("retune_interval_ms", raw.retune_interval_ms, 1_000_000)?,
            step_permille,
            min_io_permille,
            min_compute_permille,
            max_coalescing_ns: to_ns("max_coalescing_us", raw.max_coalescing_us, 1_000)?,
            companion_paths: raw.companion_paths,
        })
    }

    fn validate_job(raw: RawJobConfig, engine: Engine) -> Result<JobSpec, ConfigError> {
        let context = || format!("job '{}'", raw.name);

        let kind = match raw.kind.as_str() {
            "io" => JobKind::Io {
                iotype: raw
                    .iotype
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingRequiredField {
                        field: "iotype",
                        context: context(),
                    })?
                    .parse()?,
                iodepth: IoDepth::new(raw.iodepth.ok_or_else(|| {
                    ConfigError::MissingRequiredField {
                        field: "iodepth",
                        context: context(),
                    }
                })?)?,
                bs: raw
                    .bs
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingRequiredField {
                        field: "bs",
                        context: context(),
                    })?
                    .parse()?,
            },
            "compute" => {
                if raw.batch_cost_ns == 0 {
                    return Err(ConfigError::InvalidFieldValue {
                        field: "batch_cost_ns",
                        value: "0".to_string(),
                        reason: "Must be positive".to_string(),
                    });
                }
                JobKind::Compute {
                    batch_cost_ns: raw.batch_cost_ns,
                }
            }
            other => {
                return Err(ConfigError::InvalidFieldValue {
                    field: "kind",
                    value: other.to_string(),
                    reason: "Expected 'io' or 'compute'".to_string(),
                })
            }
        };

        let policy = match raw.cpus_allowed_policy.as_deref() {
            Some(p) => p.parse()?,
            None if matches!(kind, JobKind::Compute { .. }) => CpuPolicy::Shared,
            None => engine.default_policy(),
        };

        Ok(JobSpec {
            name: raw.name,
            kind,
            numjobs: raw.numjobs,
            cpus_allowed: raw.cpus_allowed.parse()?,
            policy,
            nice: Nice::new(raw.nice)?,
            number_ios: raw.number_ios,
        })
    }
}

/// Scale a configured duration to nanoseconds, rejecting overflow.
fn to_ns(field: &'static str, value: u64, ns_per_unit: u64) -> Result<u64, ConfigError> {
    value
        .checked_mul(ns_per_unit)
        .ok_or_else(|| ConfigError::InvalidFieldValue {
            field,
            value: value.to_string(),
            reason: "Too large to express in nanoseconds".to_string(),
        })
}

/// Convert a share in [0, 1] to integer permille.
pub fn to_permille(share: f64) -> u32 {
    (share.clamp(0.0, 1.0) * 1000.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
engine: aeolia
runtime_ms: 5000
seed: 42
driver: { type: 1, intr: 1, coalescing: 1, coalescing_window_us: 20,
          coalescing_threshold: 8, max_batch: 32 }
device: { baseline_latency_ns: 8000, jitter_ns: 2000, bandwidth_mbps: 3000,
          capacity_bytes: 40008845721, preempt_slice_ns: 20000000 }
scheduler: { slo_p999_us: 10000, low_watermark: 0.5, compute_target_ops: 1.0,
             window: 1024, retune_interval_ms: 10, step: 0.1,
             min_io_share: 0.1, min_compute_share: 0.05,
             max_coalescing_us: 200 }
jobs:
  - { name: test, kind: io, iotype: randread, iodepth: 1, bs: 4K,
      numjobs: 1, cpus_allowed: 0-3, cpus_allowed_policy: split, nice: -1 }
  - { name: comp, kind: compute, cpus_allowed: 0-3, nice: 0,
      batch_cost_ns: 1000000 }
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(FULL).unwrap();
        assert_eq!(config.engine, Engine::Aeolia);
        assert_eq!(config.runtime_ms, 5000);
        assert_eq!(config.scheduler.slo_p999_ns, 10_000_000);
        assert_eq!(config.scheduler.step_permille, 100);
        assert_eq!(config.scheduler.min_compute_permille, 50);
        assert_eq!(config.driver.coalescing_window_ns, 20_000);
        assert_eq!(
            config.scheduler.companion_paths,
            vec![PathBuf::from(DEFAULT_COMPANION_PATH)]
        );
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.io_jobs().count(), 1);
        assert_eq!(config.jobs[0].nice.value(), -1);
        assert_eq!(config.jobs[1].policy, CpuPolicy::Shared);
    }

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
engine: iou_dfl
jobs:
  - { name: test, iotype: randwrite, iodepth: 32, bs: 128K, cpus_allowed: "0" }
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert_eq!(config.runtime_ms, 10_000);
        assert_eq!(config.driver.max_batch, 32);
        assert_eq!(config.device.capacity_bytes, DEFAULT_CAPACITY_BYTES);
        // io_uring runs use the shared policy unless told otherwise
        assert_eq!(config.jobs[0].policy, CpuPolicy::Shared);
        assert!(config.filename.is_none());
    }

    #[test]
    fn test_unknown_engine() {
        let yaml = "engine: libaio\njobs: []\n";
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ConfigInvalid(ConfigError::UnknownEngine { .. })
        ));
    }

    #[test]
    fn test_missing_iotype() {
        let yaml = r#"
engine: psync
jobs:
  - { name: test, iodepth: 1, bs: 4K, cpus_allowed: "0" }
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ConfigInvalid(ConfigError::MissingRequiredField { field: "iotype", .. })
        ));
    }

    #[test]
    fn test_split_oversubscribed() {
        let yaml = r#"
engine: aeolia
jobs:
  - { name: test, iotype: randread, iodepth: 1, bs: 4K, numjobs: 4,
      cpus_allowed: 0-1, cpus_allowed_policy: split }
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ConfigInvalid(ConfigError::SplitOversubscribed { numjobs: 4, cores: 2, .. })
        ));
    }

    #[test]
    fn test_shared_allows_more_jobs_than_cores() {
        let yaml = r#"
engine: aeolia
jobs:
  - { name: test, iotype: randread, iodepth: 1, bs: 4K, numjobs: 4,
      cpus_allowed: 0-1, cpus_allowed_policy: shared }
"#;
        assert!(ConfigLoader::load_string(yaml).is_ok());
    }

    #[test]
    fn test_duplicate_job_names() {
        let yaml = r#"
engine: psync
jobs:
  - { name: test, iotype: randread, iodepth: 1, bs: 4K, cpus_allowed: "0" }
  - { name: test, iotype: randwrite, iodepth: 1, bs: 4K, cpus_allowed: "1" }
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ConfigInvalid(ConfigError::DuplicateJobName { .. })
        ));
    }

    #[test]
    fn test_needs_io_job() {
        let yaml = r#"
engine: aeolia
jobs:
  - { name: comp, kind: compute, cpus_allowed: 0-3 }
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ConfigInvalid(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_share_out_of_range() {
        let yaml = r#"
engine: aeolia
scheduler: { step: 1.5 }
jobs:
  - { name: test, iotype: randread, iodepth: 1, bs: 4K, cpus_allowed: "0" }
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ConfigInvalid(ConfigError::InvalidFieldValue { field: "step", .. })
        ));
    }

    #[test]
    fn test_duration_overflow_rejected() {
        let cases = [
            ("driver", "coalescing_window_us"),
            ("scheduler", "slo_p999_us"),
            ("scheduler", "retune_interval_ms"),
            ("scheduler", "max_coalescing_us"),
        ];
        for (section, key) in cases {
            let yaml = format!(
                "engine: aeolia\n{}: {{ {}: {} }}\njobs:\n  - {{ name: test, iotype: randread, iodepth: 1, bs: 4K, cpus_allowed: \"0\" }}\n",
                section,
                key,
                u64::MAX
            );
            match ConfigLoader::load_string(&yaml) {
                Err(DriverError::ConfigInvalid(ConfigError::InvalidFieldValue { field, .. })) => {
                    assert_eq!(field, key)
                }
                other => panic!("{} accepted: {:?}", key, other.map(|c| c.engine)),
            }
        }
    }

    #[test]
    fn test_runtime_bounds() {
        let yaml = r#"
engine: psync
runtime_ms: 0
jobs:
  - { name: test, iotype: randread, iodepth: 1, bs: 4K, cpus_allowed: "0" }
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_invalid_driver_flag() {
        let yaml = r#"
engine: aeolia
driver: { intr: 3 }
jobs:
  - { name: test, iotype: randread, iodepth: 1, bs: 4K, cpus_allowed: "0" }
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
engine: psync
colour: green
jobs:
  - { name: test, iotype: randread, iodepth: 1, bs: 4K, cpus_allowed: "0" }
"#;
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(DriverError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_file_not_found() {
        let err = ConfigLoader::load_file("/nonexistent/aeolia.yaml").unwrap_err();
        assert!(matches!(err, DriverError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, FULL).unwrap();
        let config = ConfigLoader::load_file(&path).unwrap();
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_ramp_and_number_ios() {
        let yaml = r#"
engine: psync
runtime_ms: 2000
ramp_ms: 500
jobs:
  - { name: test, iotype: randread, iodepth: 1, bs: 4K, cpus_allowed: "0",
      number_ios: 1000 }
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert_eq!(config.ramp_ms, 500);
        assert_eq!(config.jobs[0].number_ios, Some(1000));

        let too_long = yaml.replace("ramp_ms: 500", "ramp_ms: 2000");
        assert!(ConfigLoader::load_string(&too_long).is_err());
        let zero = yaml.replace("number_ios: 1000", "number_ios: 0");
        assert!(ConfigLoader::load_string(&zero).is_err());
    }

    #[test]
    fn test_base_coalescing_requires_flags() {
        let mut driver = DriverConfig::default();
        assert_eq!(driver.base_coalescing_ns(), 20_000);
        driver.flags.coalescing = false;
        assert_eq!(driver.base_coalescing_ns(), 0);
    }
}
