// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Storage devices a completion queue can submit to.
//!
//! A device answers one question per request: how long does it take until
//! the transfer is done. [`SimulatedDevice`] derives that from a seeded
//! latency model; [`FileDevice`] performs the transfer with `pread`/`pwrite`
//! and reports the measured time.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::budget::CoreBudget;
use crate::config::DeviceConfig;
use crate::engine::EngineProfile;
use crate::error::DeviceError;
use crate::request::{OpKind, Request};
use crate::types::SECTOR_SIZE;

/// Backing store for a run.
pub trait Device: Send + Sync {
    /// Addressable bytes.
    fn capacity(&self) -> u64;

    /// Service time of `request` in nanoseconds under the core's budget.
    fn service(&self, request: &Request, budget: &CoreBudget) -> Result<u64, DeviceError>;
}

/// Reject transfers that are misaligned or run past the end of the device.
pub fn check_access(offset: u64, length: u32, capacity: u64) -> Result<(), DeviceError> {
    if length == 0 || offset % SECTOR_SIZE as u64 != 0 || length % SECTOR_SIZE != 0 {
        return Err(DeviceError::Unaligned {
            offset,
            length,
            sector: SECTOR_SIZE,
        });
    }
    match offset.checked_add(length as u64) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(DeviceError::OutOfRange {
            offset,
            length,
            capacity,
        }),
    }
}

/// Seeded NVMe latency model.
///
/// Service time is the engine's submit overhead, a baseline device latency,
/// uniform jitter, the transfer time at the configured bandwidth, and the
/// wait behind a co-running compute task. That wait is the preemption slice
/// scaled by the core's compute share.
#[derive(Debug)]
pub struct SimulatedDevice {
    config: DeviceConfig,
    profile: EngineProfile,
    rng: Mutex<StdRng>,
}

impl SimulatedDevice {
    pub fn new(config: DeviceConfig, profile: EngineProfile, seed: u64) -> Self {
        Self {
            config,
            profile,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Lowest and highest service time of an uncontended request.
    pub fn base_range(&self, length: u32) -> (u64, u64) {
        let low = self.profile.submit_overhead_ns
            + self.config.baseline_latency_ns
            + self.transfer_ns(length);
        (low, low + self.config.jitter_ns)
    }

    fn transfer_ns(&self, length: u32) -> u64 {
        // MB/s == bytes per microsecond
        length as u64 * 1_000 / self.config.bandwidth_mbps.max(1)
    }

    fn interference_ns(&self, budget: &CoreBudget) -> u64 {
        self.config.preempt_slice_ns * budget.compute_permille as u64 / 1000
    }
}

impl Device for SimulatedDevice {
    fn capacity(&self) -> u64 {
        self.config.capacity_bytes
    }

    fn service(&self, request: &Request, budget: &CoreBudget) -> Result<u64, DeviceError> {
        check_access(request.offset, request.length, self.config.capacity_bytes)?;

        let jitter = if self.config.jitter_ns == 0 {
            0
        } else {
            // a poisoned lock only means another thread panicked mid-sample
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(0..=self.config.jitter_ns)
        };

        let (low, _) = self.base_range(request.length);
        Ok(low + jitter + self.interference_ns(budget))
    }
}

/// Device backed by a real file or block device.
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: File,
    capacity: u64,
}

impl FileDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let open_failed = |e: std::io::Error| DeviceError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(open_failed)?;
        // block devices report a zero length in metadata
        let capacity = file.seek(SeekFrom::End(0)).map_err(open_failed)?;

        tracing::debug!(path = %path.display(), capacity, "Opened file device");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            capacity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Device for FileDevice {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn service(&self, request: &Request, _budget: &CoreBudget) -> Result<u64, DeviceError> {
        check_access(request.offset, request.length, self.capacity)?;

        let op = request.op_kind.name();
        let offset = request.offset as libc::off_t;
        let mut buf = vec![0u8; request.length as usize];

        let start = Instant::now();
        let done = match request.op_kind {
            OpKind::Read => nix::sys::uio::pread(&self.file, &mut buf, offset),
            OpKind::Write => nix::sys::uio::pwrite(&self.file, &buf, offset),
        }
        .map_err(|errno| DeviceError::TransferFailed {
            op,
            offset: request.offset,
            reason: errno.desc().to_string(),
        })?;
        let elapsed = start.elapsed().as_nanos() as u64;

        if done != request.length as usize {
            return Err(DeviceError::ShortTransfer {
                op,
                offset: request.offset,
                done,
                length: request.length,
            });
        }

        Ok(elapsed)
    }
}
