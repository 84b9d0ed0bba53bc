// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Lifecycle of the companion scheduler process.
//!
//! The companion is started before the driver is opened so that the driver's
//! probe can find its pinned map, and is terminated once the run is over.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use aeolia_core::companion::probe;
use aeolia_core::Companion;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;

/// How long to wait for the companion's pinned map to appear.
pub const ATTACH_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("Failed to spawn companion '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Companion exited early with {status}")]
    Exited { status: std::process::ExitStatus },

    #[error("Companion did not pin a map within {}s", .timeout.as_secs())]
    Timeout { timeout: Duration },
}

/// A running companion scheduler. Stopped on drop.
#[derive(Debug)]
pub struct CompanionProcess {
    child: Option<Child>,
    binary: PathBuf,
}

impl CompanionProcess {
    /// Spawn `binary` and wait until one of `paths` exists.
    pub async fn start(
        binary: &Path,
        paths: &[PathBuf],
        timeout: Duration,
    ) -> Result<(Self, Companion), CompanionError> {
        let child = Command::new(binary)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| CompanionError::Spawn {
                binary: binary.display().to_string(),
                source,
            })?;

        tracing::info!(binary = %binary.display(), pid = child.id(), "Companion scheduler started");

        let mut process = Self {
            child: Some(child),
            binary: binary.to_path_buf(),
        };
        let companion = process.wait_attached(paths, timeout).await?;
        Ok((process, companion))
    }

    async fn wait_attached(
        &mut self,
        paths: &[PathBuf],
        timeout: Duration,
    ) -> Result<Companion, CompanionError> {
        let start = Instant::now();
        loop {
            let companion = probe(paths);
            if companion.is_available() {
                tracing::info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Companion scheduler attached"
                );
                return Ok(companion);
            }

            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    self.child = None;
                    return Err(CompanionError::Exited { status });
                }
            }

            if start.elapsed() >= timeout {
                self.stop();
                return Err(CompanionError::Timeout { timeout });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Terminate the companion, escalating to SIGKILL after a grace period.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        let pid = Pid::from_raw(child.id() as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            tracing::warn!(error = %e, "Failed to signal companion scheduler");
        }

        let deadline = Instant::now() + STOP_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(binary = %self.binary.display(), %status, "Companion scheduler stopped");
                    return;
                }
                Ok(None) if Instant::now() < deadline => std::thread::sleep(POLL_INTERVAL),
                _ => break,
            }
        }

        tracing::warn!(binary = %self.binary.display(), "Companion ignored SIGTERM, killing");
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for CompanionProcess {
    fn drop(&mut self) {
        self.stop();
    }
}
