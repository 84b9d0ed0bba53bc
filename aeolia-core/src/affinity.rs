// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thread placement: CPU pinning and nice values.
//!
//! Failures here are logged by the caller and never abort a run; an
//! unpinned thread still produces valid, if noisier, results.

use std::path::Path;

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::types::{CoreId, CpuList, Nice};

const ONLINE_CPUS: &str = "/sys/devices/system/cpu/online";

/// Logical CPUs the kernel reports online.
///
/// Reads sysfs and falls back to `0..num_cpus` when it is unavailable.
pub fn online_cores() -> Vec<CoreId> {
    online_cores_from(Path::new(ONLINE_CPUS))
}

fn online_cores_from(path: &Path) -> Vec<CoreId> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<CpuList>().ok())
        .map(|list| list.cores().to_vec())
        .unwrap_or_else(|| (0..num_cpus::get() as u16).map(CoreId::new).collect())
}

/// Cores of `wanted` that are not online.
pub fn offline_cores(wanted: &[CoreId]) -> Vec<CoreId> {
    let online = online_cores();
    wanted
        .iter()
        .copied()
        .filter(|c| !online.contains(c))
        .collect()
}

/// Restrict the calling thread to `cores`.
pub fn pin_current_thread(cores: &[CoreId]) -> Result<(), nix::Error> {
    let mut cpuset = CpuSet::new();
    for core in cores {
        cpuset.set(core.index())?;
    }
    // pid 0 is the calling thread
    sched_setaffinity(Pid::from_raw(0), &cpuset)?;

    tracing::debug!(cores = ?cores, "Thread pinned");
    Ok(())
}

/// Apply `nice` to the calling thread.
pub fn set_current_nice(nice: Nice) -> std::io::Result<()> {
    let tid = nix::unistd::gettid().as_raw();
    // SAFETY: setpriority only reads its scalar arguments.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, nice.value()) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }

    tracing::debug!(tid, nice = nice.value(), "Thread priority set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_cores_from_sysfs_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("online");
        std::fs::write(&path, "0-3,6\n").unwrap();
        let cores: Vec<u16> = online_cores_from(&path).iter().map(|c| c.value()).collect();
        assert_eq!(cores, vec![0, 1, 2, 3, 6]);
    }

    #[test]
    fn test_online_cores_fallback() {
        let cores = online_cores_from(Path::new("/nonexistent/online"));
        assert_eq!(cores.len(), num_cpus::get());
    }

    #[test]
    fn test_offline_cores() {
        assert_eq!(offline_cores(&[CoreId::new(u16::MAX)]), vec![CoreId::new(u16::MAX)]);
    }

    #[test]
    fn test_pin_to_allowed_core() {
        let allowed = nix::sched::sched_getaffinity(Pid::from_raw(0)).unwrap();
        let first = (0..CpuSet::count())
            .find(|&cpu| allowed.is_set(cpu).unwrap_or(false))
            .unwrap();
        std::thread::spawn(move || pin_current_thread(&[CoreId::new(first as u16)]))
            .join()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_lowering_priority_is_allowed() {
        std::thread::spawn(|| set_current_nice(Nice::new(19).unwrap()))
            .join()
            .unwrap()
            .unwrap();
    }
}
