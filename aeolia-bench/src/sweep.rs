// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Parameter sweeps: engines × iotypes × iodepths × iosizes × numjobs.
//!
//! Configurations run one at a time on a fresh driver, each under the
//! three-attempt retry policy. A configuration that still fails aborts the
//! sweep.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use aeolia_core::retry::{RetryFailure, DEFAULT_ATTEMPTS};
use aeolia_core::types::CoreId;
use aeolia_core::{
    BlockSize, ConfigError, CpuList, DriverError, DriverFlags, Engine, IoDepth, IoType, JobSpec,
    RetryPolicy, RunConfig, RunResult, Runner, Simulation,
};
use thiserror::Error;

use crate::fio::{render_job_file, FioError, FioRunner};
use crate::metrics::{BenchmarkReport, SweepEntry, SweepPoint};
use crate::reporter::{JsonReporter, ReporterError};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Invalid sweep configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Reporter(#[from] ReporterError),

    #[error(transparent)]
    Fio(#[from] FioError),

    #[error("The fio backend needs a filename")]
    MissingFilename,

    #[error("{point} failed after {attempts} attempts: {last}")]
    Exhausted {
        point: String,
        attempts: u32,
        last: String,
    },
}

/// Where a configuration is executed.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Deterministic simulator on a manual clock.
    Simulated,
    /// Threaded runner against the configured device.
    Threaded,
    /// External `fio` with the engine's plugin.
    Fio(FioRunner),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Threaded => "threaded",
            Self::Fio(_) => "fio",
        }
    }
}

/// Axes of the sweep plus the settings shared by every configuration.
#[derive(Debug, Clone)]
pub struct SweepSpec {
    pub engines: Vec<Engine>,
    pub iotypes: Vec<IoType>,
    pub iodepths: Vec<IoDepth>,
    pub iosizes: Vec<BlockSize>,
    pub numjobs: Vec<u32>,
    /// Jobs are placed on `first_core..first_core + numjobs`.
    pub first_core: u16,
    pub runtime_ms: u64,
    pub ramp_ms: u64,
    pub seed: u64,
    pub filename: Option<PathBuf>,
    pub flags: DriverFlags,
    /// Batch cost of a co-running compute task, if any.
    pub corun_batch_ns: Option<u64>,
}

impl Default for SweepSpec {
    fn default() -> Self {
        Self {
            engines: vec![Engine::Psync, Engine::Spdk, Engine::IoUringDefault, Engine::Aeolia],
            iotypes: IoType::ALL.to_vec(),
            iodepths: vec![IoDepth::default()],
            iosizes: vec![BlockSize::default()],
            numjobs: vec![1],
            first_core: 0,
            runtime_ms: 10_000,
            ramp_ms: 0,
            seed: 0,
            filename: None,
            flags: DriverFlags::default(),
            corun_batch_ns: None,
        }
    }
}

impl SweepSpec {
    /// Every configuration in run order.
    pub fn points(&self) -> Vec<SweepPoint> {
        let mut points = Vec::new();
        for &engine in &self.engines {
            for &iotype in &self.iotypes {
                for &iodepth in &self.iodepths {
                    for &iosize in &self.iosizes {
                        for &numjobs in &self.numjobs {
                            points.push(SweepPoint {
                                engine,
                                iotype,
                                iodepth: iodepth.value(),
                                iosize,
                                numjobs,
                            });
                        }
                    }
                }
            }
        }
        points
    }

    /// The run configuration of one point.
    pub fn config_for(&self, point: &SweepPoint) -> Result<RunConfig, ConfigError> {
        if self.ramp_ms >= self.runtime_ms {
            return Err(ConfigError::InvalidFieldValue {
                field: "ramp_ms",
                value: self.ramp_ms.to_string(),
                reason: "Must be shorter than runtime_ms".to_string(),
            });
        }

        let last = self.first_core as u32 + point.numjobs.max(1) - 1;
        let cores =
            CpuList::from_cores((self.first_core as u32..=last).map(|c| CoreId::new(c as u16)))?;

        let mut jobs = vec![JobSpec::io(
            "test",
            point.iotype,
            IoDepth::new(point.iodepth)?,
            point.iosize,
            point.numjobs,
            cores.clone(),
            point.engine.default_policy(),
        )];
        if let Some(batch_ns) = self.corun_batch_ns {
            jobs.push(JobSpec::compute("comp", cores, batch_ns));
        }

        let mut config = RunConfig::with_jobs(point.engine, jobs)?;
        config.runtime_ms = self.runtime_ms;
        config.ramp_ms = self.ramp_ms;
        config.seed = self.seed;
        config.filename = self.filename.clone();
        config.driver.flags = self.flags;
        Ok(config)
    }
}

/// Runs a [`SweepSpec`] and files the results.
#[derive(Debug)]
pub struct Sweep {
    spec: SweepSpec,
    reporter: JsonReporter,
    backend: Backend,
    retry: RetryPolicy,
    /// Pause between configurations.
    settle: Duration,
}

impl Sweep {
    pub fn new(spec: SweepSpec, reporter: JsonReporter, backend: Backend) -> Self {
        let settle = match backend {
            Backend::Simulated => Duration::ZERO,
            _ => Duration::from_secs(1),
        };
        Self {
            spec,
            reporter,
            backend,
            retry: RetryPolicy::new(DEFAULT_ATTEMPTS, Duration::from_millis(500)),
            settle,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn spec(&self) -> &SweepSpec {
        &self.spec
    }

    /// Run every configuration, appending one entry per point to `report`.
    pub fn run(&self, report: &mut BenchmarkReport) -> Result<(), SweepError> {
        let points = self.spec.points();
        let total = points.len();
        tracing::info!(total, backend = self.backend.name(), "Starting sweep");

        for (i, point) in points.into_iter().enumerate() {
            tracing::info!(done = i, total, point = %point, "Running configuration");
            let entry = self.run_point(&point)?;
            tracing::debug!(
                point = %point,
                iops = entry.iops,
                p999_ns = entry.p999_ns.unwrap_or(0),
                "Configuration finished"
            );
            report.add_entry(entry);

            if i + 1 < total && !self.settle.is_zero() {
                thread::sleep(self.settle);
            }
        }

        tracing::info!(total, "Sweep completed");
        Ok(())
    }

    fn run_point(&self, point: &SweepPoint) -> Result<SweepEntry, SweepError> {
        let config = self.spec.config_for(point)?;
        let path = self.reporter.prepare(point)?;

        let attempts = match &self.backend {
            Backend::Simulated | Backend::Threaded => {
                let (attempts, result) = self.run_driver(point, &config)?;
                self.reporter.save_run(point, &result)?;
                attempts
            }
            Backend::Fio(fio) => {
                let filename = config.filename.as_ref().ok_or(SweepError::MissingFilename)?;
                let job = render_job_file(&config, &filename.display().to_string());
                fio.run(&config, &job, &path).map_err(|e| match e {
                    FioError::Exhausted { attempts, last } => SweepError::Exhausted {
                        point: point.to_string(),
                        attempts,
                        last: last.to_string(),
                    },
                    other => other.into(),
                })?
            }
        };

        let value = JsonReporter::load_value(&path)?;
        Ok(SweepEntry::from_result(
            *point,
            path.display().to_string(),
            attempts,
            &value,
        ))
    }

    fn run_driver(
        &self,
        point: &SweepPoint,
        config: &RunConfig,
    ) -> Result<(u32, RunResult), SweepError> {
        let mut used = 0;
        let result = self
            .retry
            .attempt(
                |attempt| {
                    used = attempt;
                    match self.backend {
                        Backend::Threaded => Runner::new(config.clone())?.run(),
                        _ => Simulation::new(config.clone()).run(),
                    }
                },
                |e: &DriverError| !matches!(e, DriverError::ConfigInvalid(_)),
                thread::sleep,
            )
            .map_err(|RetryFailure { attempts, last, exhausted }| {
                if exhausted {
                    SweepError::Exhausted {
                        point: point.to_string(),
                        attempts,
                        last: last.to_string(),
                    }
                } else {
                    SweepError::Driver(last)
                }
            })?;
        Ok((used, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeolia_core::CpuPolicy;
    use tempfile::TempDir;

    fn spec() -> SweepSpec {
        SweepSpec {
            engines: vec![Engine::Spdk, Engine::Aeolia],
            iotypes: vec![IoType::RandRead],
            iodepths: vec![IoDepth::new(1).unwrap()],
            iosizes: vec!["4K".parse().unwrap()],
            numjobs: vec![1, 2],
            runtime_ms: 20,
            seed: 5,
            ..SweepSpec::default()
        }
    }

    #[test]
    fn test_points_product() {
        let mut s = spec();
        s.iotypes = IoType::ALL.to_vec();
        let points = s.points();
        assert_eq!(points.len(), 2 * 2 * 2);
        assert_eq!(points[0].engine, Engine::Spdk);
        assert_eq!(points[0].param(), "randread_1_4K_1");
        assert_eq!(points[1].param(), "randread_1_4K_2");
        assert_eq!(points[2].param(), "randwrite_1_4K_1");
        assert_eq!(points[4].engine, Engine::Aeolia);
    }

    #[test]
    fn test_config_for_places_jobs() {
        let mut s = spec();
        s.first_core = 4;
        s.corun_batch_ns = Some(1_000_000);
        let point = s.points()[1];
        let config = s.config_for(&point).unwrap();

        let io = &config.jobs[0];
        assert_eq!(io.cpus_allowed.to_string(), "4-5");
        assert_eq!(io.policy, CpuPolicy::Split);
        assert_eq!(config.jobs[1].cpus_allowed.to_string(), "4-5");
        assert_eq!(config.runtime_ms, 20);
        assert_eq!(config.seed, 5);

        let shared = SweepPoint {
            engine: Engine::IoUringDefault,
            ..point
        };
        assert_eq!(s.config_for(&shared).unwrap().jobs[0].policy, CpuPolicy::Shared);

        s.ramp_ms = 20;
        assert!(s.config_for(&point).is_err());
    }

    #[test]
    fn test_simulated_sweep_files_results() {
        let dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(dir.path()).unwrap();
        let sweep = Sweep::new(spec(), reporter.clone(), Backend::Simulated);

        let mut report = BenchmarkReport::new();
        sweep.run(&mut report).unwrap();

        assert_eq!(report.sweep.len(), 4);
        assert!(report.sweep.iter().all(|e| e.attempts == 1 && e.iops > 0.0));
        assert!(report.sweep.iter().all(|e| e.p999_ns.is_some()));
        assert_eq!(reporter.list_runs(Engine::Spdk).unwrap().len(), 2);
        assert_eq!(reporter.list_runs(Engine::Aeolia).unwrap().len(), 2);
        assert!(dir.path().join("aeolia").join("fio_randread_1_4K_2.json").exists());
        assert_eq!(report.entries_for(Engine::Aeolia).count(), 2);
    }

    #[test]
    fn test_corun_sweep_reports_compute() {
        let dir = TempDir::new().unwrap();
        let mut s = spec();
        s.engines = vec![Engine::Aeolia];
        s.numjobs = vec![1];
        s.runtime_ms = 50;
        s.corun_batch_ns = Some(1_000_000);
        let sweep = Sweep::new(s, JsonReporter::new(dir.path()).unwrap(), Backend::Simulated);

        let mut report = BenchmarkReport::new();
        sweep.run(&mut report).unwrap();
        assert!(report.sweep[0].batch_ops_per_sec.unwrap() > 0.0);
    }

    #[test]
    fn test_fio_backend_needs_filename() {
        let dir = TempDir::new().unwrap();
        let sweep = Sweep::new(
            spec(),
            JsonReporter::new(dir.path()).unwrap(),
            Backend::Fio(FioRunner::new("fio")),
        );
        let mut report = BenchmarkReport::new();
        assert!(matches!(sweep.run(&mut report), Err(SweepError::MissingFilename)));
        assert!(report.sweep.is_empty());
    }

    #[test]
    fn test_failing_fio_aborts_sweep() {
        let dir = TempDir::new().unwrap();
        let mut s = spec();
        s.filename = Some("/dev/null".into());
        let mut fio = FioRunner::new("false");
        fio.retry = RetryPolicy::new(3, Duration::from_millis(1));
        let sweep = Sweep::new(s, JsonReporter::new(dir.path()).unwrap(), Backend::Fio(fio))
            .with_settle(Duration::ZERO);

        let mut report = BenchmarkReport::new();
        match sweep.run(&mut report) {
            Err(SweepError::Exhausted { attempts, point, .. }) => {
                assert_eq!(attempts, 3);
                assert!(point.starts_with("spdk"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(report.sweep.is_empty());
    }
}
