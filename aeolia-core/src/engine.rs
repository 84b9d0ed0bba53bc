// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! I/O engines under comparison and the aeolia driver knobs.
//!
//! An engine is selected once by name at startup. It decides how completions
//! are delivered (inline, interrupt, poll), the CPU policy the harness uses
//! for it, and how it appears in a FIO job file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How `cpus_allowed` is applied to the contexts of a job group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuPolicy {
    /// Context `i` is pinned to `cpus_allowed[i]` alone.
    Split,
    /// Every context may run on every core of the set.
    Shared,
}

impl CpuPolicy {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Shared => "shared",
        }
    }
}

impl fmt::Display for CpuPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CpuPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "split" => Ok(Self::Split),
            "shared" => Ok(Self::Shared),
            other => Err(ConfigError::InvalidFieldValue {
                field: "cpus_allowed_policy",
                value: other.to_string(),
                reason: "Expected 'split' or 'shared'".to_string(),
            }),
        }
    }
}

/// Completion delivery path of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Request completes within the submitting call.
    Inline,
    /// Completion raises an interrupt and wakes the waiter.
    Interrupt,
    /// Waiter busy-polls the completion queue.
    Poll,
}

/// Engine selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Engine {
    Psync,
    IoUringDefault,
    IoUringPoll,
    Spdk,
    Aeolia,
}

impl Engine {
    pub const ALL: [Engine; 5] = [
        Self::Psync,
        Self::IoUringDefault,
        Self::IoUringPoll,
        Self::Spdk,
        Self::Aeolia,
    ];

    /// Harness name; also the result directory name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Psync => "psync",
            Self::IoUringDefault => "iou_dfl",
            Self::IoUringPoll => "iou_poll",
            Self::Spdk => "spdk",
            Self::Aeolia => "aeolia",
        }
    }

    /// Value for the FIO `ioengine=` option.
    pub const fn fio_ioengine(&self) -> &'static str {
        match self {
            Self::Psync => "psync",
            Self::IoUringDefault | Self::IoUringPoll => "io_uring",
            Self::Spdk => "spdk",
            Self::Aeolia => "aeolia",
        }
    }

    /// Extra `[global]` lines the engine needs in a FIO job file.
    pub fn fio_global_extras(&self, flags: &DriverFlags) -> Vec<String> {
        match self {
            Self::IoUringPoll => vec!["hipri=1".to_string()],
            Self::Aeolia => flags.fio_options(),
            _ => Vec::new(),
        }
    }

    /// Whether FIO loads the engine as an external plugin via `LD_PRELOAD`.
    pub const fn needs_preload(&self) -> bool {
        matches!(self, Self::Spdk | Self::Aeolia)
    }

    /// CPU policy the harness runs the engine with.
    pub const fn default_policy(&self) -> CpuPolicy {
        match self {
            Self::IoUringDefault | Self::IoUringPoll => CpuPolicy::Shared,
            _ => CpuPolicy::Split,
        }
    }

    /// Delivery path; aeolia follows its `intr` flag.
    pub fn delivery(&self, flags: &DriverFlags) -> Delivery {
        match self {
            Self::Psync => Delivery::Inline,
            Self::IoUringDefault => Delivery::Interrupt,
            Self::IoUringPoll | Self::Spdk => Delivery::Poll,
            Self::Aeolia => match flags.intr {
                InterruptMode::Polling => Delivery::Poll,
                InterruptMode::Interrupt => Delivery::Interrupt,
            },
        }
    }

    /// Only aeolia exposes the share/coalescing knobs the scheduler drives.
    pub const fn is_tunable(&self) -> bool {
        matches!(self, Self::Aeolia)
    }

    /// Per-request software overheads used by the device model.
    pub fn profile(&self, flags: &DriverFlags) -> EngineProfile {
        match self {
            Self::Psync => EngineProfile {
                submit_overhead_ns: 1_500,
                wakeup_ns: 0,
            },
            Self::IoUringDefault => EngineProfile {
                submit_overhead_ns: 900,
                wakeup_ns: 2_500,
            },
            Self::IoUringPoll => EngineProfile {
                submit_overhead_ns: 700,
                wakeup_ns: 0,
            },
            Self::Spdk => EngineProfile {
                submit_overhead_ns: 250,
                wakeup_ns: 0,
            },
            Self::Aeolia => EngineProfile {
                submit_overhead_ns: match flags.class {
                    DriverClass::Throughput => 400,
                    DriverClass::Latency => 300,
                },
                wakeup_ns: match flags.intr {
                    InterruptMode::Polling => 0,
                    InterruptMode::Interrupt => 800,
                },
            },
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.name() == s)
            .ok_or_else(|| ConfigError::UnknownEngine {
                name: s.to_string(),
            })
    }
}

impl TryFrom<String> for Engine {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Engine> for String {
    fn from(engine: Engine) -> Self {
        engine.name().to_string()
    }
}

/// Fixed software cost of an engine, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineProfile {
    pub submit_overhead_ns: u64,
    pub wakeup_ns: u64,
}

/// Driver `type` flag: 0 throughput class, 1 latency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverClass {
    Throughput,
    Latency,
}

/// Driver `intr` flag: 0 polling, 1 interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMode {
    Polling,
    Interrupt,
}

/// The aeolia plugin options `type`, `intr` and `coalescing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverFlags {
    pub class: DriverClass,
    pub intr: InterruptMode,
    pub coalescing: bool,
}

impl DriverFlags {
    /// Decode the raw 0/1 option values a FIO job file carries.
    pub fn from_raw(class: u8, intr: u8, coalescing: u8) -> Result<Self, ConfigError> {
        let flag = |field: &'static str, v: u8| -> Result<bool, ConfigError> {
            match v {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(ConfigError::InvalidFieldValue {
                    field,
                    value: other.to_string(),
                    reason: "Expected 0 or 1".to_string(),
                }),
            }
        };

        Ok(Self {
            class: if flag("type", class)? {
                DriverClass::Latency
            } else {
                DriverClass::Throughput
            },
            intr: if flag("intr", intr)? {
                InterruptMode::Interrupt
            } else {
                InterruptMode::Polling
            },
            coalescing: flag("coalescing", coalescing)?,
        })
    }

    pub fn interrupt_enabled(&self) -> bool {
        self.intr == InterruptMode::Interrupt
    }

    /// Lines appended to an aeolia job group.
    pub fn fio_options(&self) -> Vec<String> {
        vec![
            format!("type={}", self.class as u8),
            format!("intr={}", self.intr as u8),
            format!("coalescing={}", self.coalescing as u8),
        ]
    }
}

impl Default for DriverFlags {
    fn default() -> Self {
        Self {
            class: DriverClass::Latency,
            intr: InterruptMode::Interrupt,
            coalescing: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names_round_trip() {
        for engine in Engine::ALL {
            assert_eq!(engine.name().parse::<Engine>().unwrap(), engine);
        }
        assert!(matches!(
            "libaio".parse::<Engine>(),
            Err(ConfigError::UnknownEngine { .. })
        ));
    }

    #[test]
    fn test_io_uring_variants_share_fio_engine() {
        assert_eq!(Engine::IoUringDefault.fio_ioengine(), "io_uring");
        assert_eq!(Engine::IoUringPoll.fio_ioengine(), "io_uring");
        let flags = DriverFlags::default();
        assert_eq!(Engine::IoUringPoll.fio_global_extras(&flags), vec!["hipri=1"]);
        assert!(Engine::IoUringDefault.fio_global_extras(&flags).is_empty());
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(Engine::IoUringDefault.default_policy(), CpuPolicy::Shared);
        assert_eq!(Engine::Aeolia.default_policy(), CpuPolicy::Split);
        assert_eq!(Engine::Psync.default_policy(), CpuPolicy::Split);
    }

    #[test]
    fn test_aeolia_delivery_follows_intr() {
        let mut flags = DriverFlags::default();
        assert_eq!(Engine::Aeolia.delivery(&flags), Delivery::Interrupt);
        flags.intr = InterruptMode::Polling;
        assert_eq!(Engine::Aeolia.delivery(&flags), Delivery::Poll);
        assert_eq!(Engine::Aeolia.profile(&flags).wakeup_ns, 0);
        assert_eq!(Engine::Psync.delivery(&flags), Delivery::Inline);
    }

    #[test]
    fn test_driver_flags_from_raw() {
        let flags = DriverFlags::from_raw(1, 1, 1).unwrap();
        assert_eq!(flags, DriverFlags::default());
        assert_eq!(flags.fio_options(), vec!["type=1", "intr=1", "coalescing=1"]);

        let flags = DriverFlags::from_raw(0, 0, 0).unwrap();
        assert_eq!(flags.class, DriverClass::Throughput);
        assert!(!flags.interrupt_enabled());
        assert!(!flags.coalescing);

        assert!(DriverFlags::from_raw(2, 0, 0).is_err());
    }
}
