// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `aeolia run` command - Run a configuration with real threads.
//!
//! Starts the companion scheduler when one is given, runs the configuration
//! on a blocking thread and cancels it on Ctrl+C.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;

use aeolia_core::{ConfigLoader, Runner};

use super::{print_summary, write_result};
use crate::companion::{CompanionProcess, ATTACH_TIMEOUT};

pub async fn execute(
    config_path: &Path,
    output: Option<&Path>,
    companion: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(config = %config_path.display(), "Starting run");

    // Fail fast on invalid config, before any process is started
    let config = ConfigLoader::load_file(config_path)?;

    let mut process = match companion {
        Some(binary) => start_companion(binary, &config.scheduler.companion_paths, ATTACH_TIMEOUT).await,
        None => None,
    };

    let runner = Runner::new(config)?;
    let abort = runner.abort_handle();

    let run = tokio::task::spawn_blocking(move || runner.run());
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
            eprintln!("Cancelling run...");
            tracing::warn!("Interrupted, aborting run");
            abort.store(true, Ordering::Release);
            run.await
        }
    };

    if let Some(process) = process.as_mut() {
        process.stop();
    }

    let result = result??;
    print_summary(&result);
    write_result(&result, output)
}

/// Start the companion; a failure leaves the run to the driver's own probe,
/// which then runs degraded.
async fn start_companion(
    binary: &Path,
    paths: &[PathBuf],
    timeout: Duration,
) -> Option<CompanionProcess> {
    match CompanionProcess::start(binary, paths, timeout).await {
        Ok((process, attached)) => {
            tracing::debug!(pid = ?process.id(), companion = ?attached, "Companion ready");
            Some(process)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Companion scheduler unavailable, continuing without it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_companion_does_not_abort() {
        let started = start_companion(
            Path::new("/nonexistent/scx_aeolia"),
            &[],
            Duration::from_millis(10),
        )
        .await;
        assert!(started.is_none());
    }

    #[tokio::test]
    async fn test_run_continues_when_companion_exits() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("run.yaml");
        std::fs::write(
            &config,
            "engine: psync\nruntime_ms: 50\njobs:\n  - { name: test, iotype: randread, iodepth: 1, bs: 4K, cpus_allowed: \"0\", number_ios: 10 }\n",
        )
        .unwrap();
        let output = dir.path().join("result.json");

        execute(&config, Some(&output), Some(Path::new("true")))
            .await
            .unwrap_or_else(|e| panic!("run failed: {}", e));
        assert!(output.exists());
    }
}
