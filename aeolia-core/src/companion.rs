// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Detection of the companion scheduler that enforces core shares.
//!
//! The companion is a sched_ext scheduler that pins a BPF map under
//! `/sys/fs/bpf`. Without it the cross-task scheduler cannot enforce its
//! decisions and falls back to OS default scheduling.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How core shares are enforced for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "companion", rename_all = "lowercase")]
pub enum Companion {
    /// A pinned map of the companion scheduler was found.
    Attached { path: PathBuf },
    /// Shares are applied by the simulator itself.
    Simulated,
    /// Nothing found; scheduling falls back to OS defaults.
    Absent,
}

impl Companion {
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

/// Return the first companion path that exists.
pub fn probe(paths: &[PathBuf]) -> Companion {
    probe_with(paths, Path::exists)
}

fn probe_with(paths: &[PathBuf], exists: impl Fn(&Path) -> bool) -> Companion {
    match paths.iter().find(|p| exists(p)) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Companion scheduler detected");
            Companion::Attached { path: path.clone() }
        }
        None => Companion::Absent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_absent() {
        let c = probe(&[PathBuf::from("/nonexistent/bpf/scx_rq_ctx_stor")]);
        assert_eq!(c, Companion::Absent);
        assert!(!c.is_available());
        assert_eq!(probe(&[]), Companion::Absent);
    }

    #[test]
    fn test_probe_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let pinned = dir.path().join("scx_rq_ctx_stor");
        std::fs::write(&pinned, b"").unwrap();

        let c = probe(&[PathBuf::from("/nonexistent/map"), pinned.clone()]);
        assert_eq!(c, Companion::Attached { path: pinned });
        assert!(c.is_available());
    }

    #[test]
    fn test_probe_with_custom_check() {
        let paths = vec![PathBuf::from("a"), PathBuf::from("b")];
        let c = probe_with(&paths, |p| p == Path::new("b"));
        assert_eq!(
            c,
            Companion::Attached {
                path: PathBuf::from("b")
            }
        );
        assert!(Companion::Simulated.is_available());
    }
}
