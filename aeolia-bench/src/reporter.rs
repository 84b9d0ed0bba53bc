// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! On-disk layout of sweep results.
//!
//! Each configuration lands in `<out>/<engine>/fio_{param}.json`; the sweep
//! summary goes to `<out>/sweep_<timestamp>.json`.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use aeolia_core::{Engine, RunResult};
use serde::Serialize;
use thiserror::Error;

use crate::metrics::{BenchmarkReport, SweepPoint};

/// Errors that can occur while writing or reading reports.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("I/O error on report files: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON reporter rooted at an output directory.
#[derive(Debug, Clone)]
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create a reporter, creating the output directory if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// Create a reporter using the crate's `data` directory.
    pub fn default_location() -> Result<Self, ReporterError> {
        Self::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("data"))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn engine_dir(&self, engine: Engine) -> PathBuf {
        self.output_dir.join(engine.name())
    }

    /// Where the result of `point` is stored.
    pub fn result_path(&self, point: &SweepPoint) -> PathBuf {
        self.engine_dir(point.engine)
            .join(format!("fio_{}.json", point.param()))
    }

    /// Make sure the directory for `point` exists and return its result path.
    pub fn prepare(&self, point: &SweepPoint) -> Result<PathBuf, ReporterError> {
        fs::create_dir_all(self.engine_dir(point.engine))?;
        Ok(self.result_path(point))
    }

    /// Write the result of one configuration.
    pub fn save_run(&self, point: &SweepPoint, result: &RunResult) -> Result<PathBuf, ReporterError> {
        let path = self.prepare(point)?;
        write_json(&path, result)?;
        Ok(path)
    }

    /// Write the sweep summary.
    pub fn save_report(&self, report: &BenchmarkReport) -> Result<PathBuf, ReporterError> {
        let timestamp = report.timestamp.format("%Y-%m-%dT%H-%M-%SZ");
        let path = self.output_dir.join(format!("sweep_{}.json", timestamp));
        write_json(&path, report)?;
        Ok(path)
    }

    /// Result files of one engine, sorted by name.
    pub fn list_runs(&self, engine: Engine) -> Result<Vec<PathBuf>, ReporterError> {
        let dir = self.engine_dir(engine);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_result = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("fio_") && n.ends_with(".json"));
            if is_result {
                runs.push(path);
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Load a result file as raw JSON (driver results and FIO output alike).
    pub fn load_value(path: impl AsRef<Path>) -> Result<serde_json::Value, ReporterError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Load a result file written by [`save_run`](Self::save_run).
    pub fn load_run(path: impl AsRef<Path>) -> Result<RunResult, ReporterError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn load_report(path: impl AsRef<Path>) -> Result<BenchmarkReport, ReporterError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), ReporterError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
