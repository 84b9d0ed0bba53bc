// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! FIO job files and the external `fio` binary.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use aeolia_core::config::JobKind;
use aeolia_core::retry::RetryFailure;
use aeolia_core::{RetryPolicy, RunConfig};
use thiserror::Error;

/// Options every harness invocation passes besides `--output`.
pub const FIO_OPTIONS: [&str; 3] = [
    "--lat_percentiles=1",
    "--clat_percentiles=0",
    "--output-format=json",
];

const PERCENTILE_LIST: &str = "50:99:99.5:99.9:99.99:99.999";

#[derive(Debug, Error)]
pub enum FioError {
    #[error("Failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("fio exited with {status}")]
    Failed { status: ExitStatus },

    #[error("Failed to write job file: {0}")]
    JobFile(#[from] std::io::Error),

    #[error("fio failed {attempts} times, last error: {last}")]
    Exhausted { attempts: u32, last: Box<FioError> },
}

/// Render the job file for `config`.
///
/// Only I/O groups become FIO sections; compute groups run outside FIO.
/// `filename` overrides the configured device path.
pub fn render_job_file(config: &RunConfig, filename: &str) -> String {
    let policy = config
        .io_jobs()
        .next()
        .map(|j| j.policy)
        .unwrap_or_else(|| config.engine.default_policy());
    let rw = config
        .io_jobs()
        .find_map(|j| match &j.kind {
            JobKind::Io { iotype, .. } => Some(iotype.name()),
            JobKind::Compute { .. } => None,
        })
        .unwrap_or("randread");
    let runtime_s = config.runtime_ms.div_ceil(1_000).max(1);

    let mut lines = vec![
        "[global]".to_string(),
        format!("ioengine={}", config.engine.fio_ioengine()),
        format!("rw={}", rw),
        "thread=1".to_string(),
        "group_reporting=1".to_string(),
        format!("percentile_list={}", PERCENTILE_LIST),
        "direct=1".to_string(),
        "verify=0".to_string(),
        format!("runtime={}s", runtime_s),
    ];
    if config.ramp_ms > 0 {
        lines.push(format!("ramp_time={}s", config.ramp_ms.div_ceil(1_000)));
    }
    lines.push("time_based".to_string());
    lines.push(format!("filename={}", filename));
    lines.push(format!("cpus_allowed_policy={}", policy));

    for (i, job) in config.io_jobs().enumerate() {
        let JobKind::Io { iodepth, bs, .. } = &job.kind else {
            continue;
        };
        lines.push(String::new());
        lines.push(format!("[{}]", job.name));
        if i > 0 {
            lines.push("new_group".to_string());
        }
        lines.push(format!("iodepth={}", iodepth));
        lines.push(format!("bs={}", bs));
        lines.push(format!("numjobs={}", job.numjobs));
        lines.push("thread".to_string());
        lines.push(format!("cpus_allowed={}", job.cpus_allowed));
        lines.push(format!("nice={}", job.nice.value()));
        if let Some(n) = job.number_ios {
            lines.push(format!("number_ios={}", n));
        }
        lines.extend(config.engine.fio_global_extras(&config.driver.flags));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// How to invoke the external `fio` binary.
#[derive(Debug, Clone)]
pub struct FioRunner {
    pub binary: PathBuf,
    /// Plugin preloaded for engines that need one (`LD_PRELOAD`).
    pub preload: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub retry: RetryPolicy,
}

impl FioRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            preload: None,
            env: Vec::new(),
            retry: RetryPolicy::new(3, std::time::Duration::from_secs(1)),
        }
    }

    pub fn with_preload(mut self, plugin: impl Into<PathBuf>) -> Self {
        self.preload = Some(plugin.into());
        self
    }

    /// Environment for a run of `config`.
    pub fn envs(&self, config: &RunConfig) -> Vec<(String, String)> {
        let mut envs = self.env.clone();
        if config.engine.needs_preload() {
            if let Some(plugin) = &self.preload {
                envs.push(("LD_PRELOAD".to_string(), plugin.display().to_string()));
            }
        }
        envs
    }

    /// Arguments after the binary for a job file and output path.
    pub fn args(job_file: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            job_file.display().to_string(),
            format!("--output={}", output.display()),
        ];
        args.extend(FIO_OPTIONS.iter().map(|s| s.to_string()));
        args
    }

    /// Run `fio` once on `job`, writing its JSON to `output`.
    pub fn run_once(&self, config: &RunConfig, job: &str, output: &Path) -> Result<(), FioError> {
        let mut file = tempfile::Builder::new().suffix(".fio").tempfile()?;
        file.write_all(job.as_bytes())?;
        file.flush()?;

        let status = Command::new(&self.binary)
            .args(Self::args(file.path(), output))
            .envs(self.envs(config))
            .stdin(Stdio::null())
            .status()
            .map_err(|source| FioError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(FioError::Failed { status })
        }
    }

    /// Run `fio` under the retry policy; returns the attempts used.
    pub fn run(&self, config: &RunConfig, job: &str, output: &Path) -> Result<u32, FioError> {
        let mut used = 0;
        self.retry
            .attempt(
                |attempt| {
                    used = attempt;
                    self.run_once(config, job, output)
                },
                |e| !matches!(e, FioError::Spawn { .. }),
                std::thread::sleep,
            )
            .map_err(|RetryFailure { attempts, last, exhausted }| {
                if exhausted {
                    FioError::Exhausted {
                        attempts,
                        last: Box::new(last),
                    }
                } else {
                    last
                }
            })?;
        Ok(used)
    }
}
