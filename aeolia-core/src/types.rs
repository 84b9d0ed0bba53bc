// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated benchmark parameters.
//!
//! All types validate their invariants at creation time, so a value that
//! reaches the dispatcher or the scheduler is already known to be legal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum outstanding requests per queue (driver request pool size).
pub const MAX_IO_DEPTH: u32 = 65536;
/// Sector size every transfer must be aligned to.
pub const SECTOR_SIZE: u32 = 512;
/// Largest transfer the harness issues (2M).
pub const MAX_BLOCK_SIZE: u32 = 2 * 1024 * 1024;

/// Identifier of one job context (one FIO thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(u32);

impl JobId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical CPU a completion queue is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoreId(u16);

impl CoreId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    /// CPU index as used by affinity masks.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Unique, monotonically assigned request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Validated queue depth (FIO `iodepth`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct IoDepth(u32);

impl IoDepth {
    pub fn new(depth: u32) -> Result<Self, ConfigError> {
        if depth == 0 || depth > MAX_IO_DEPTH {
            return Err(ConfigError::InvalidFieldValue {
                field: "iodepth",
                value: depth.to_string(),
                reason: format!("Must be between 1 and {}", MAX_IO_DEPTH),
            });
        }
        Ok(Self(depth))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for IoDepth {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u32> for IoDepth {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IoDepth> for u32 {
    fn from(depth: IoDepth) -> Self {
        depth.0
    }
}

impl fmt::Display for IoDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated transfer size (FIO `bs`), written as `512B`, `4K`, `1M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockSize(u32);

impl BlockSize {
    pub fn new(bytes: u32) -> Result<Self, ConfigError> {
        if bytes == 0 || bytes % SECTOR_SIZE != 0 || bytes > MAX_BLOCK_SIZE {
            return Err(ConfigError::InvalidFieldValue {
                field: "bs",
                value: bytes.to_string(),
                reason: format!(
                    "Must be a non-zero multiple of {} up to {} bytes",
                    SECTOR_SIZE, MAX_BLOCK_SIZE
                ),
            });
        }
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> u32 {
        self.0
    }
}

impl FromStr for BlockSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || ConfigError::InvalidFieldValue {
            field: "bs",
            value: s.to_string(),
            reason: "Expected a size such as 512B, 4K or 1M".to_string(),
        };

        let upper = trimmed.to_ascii_uppercase();
        let (digits, multiplier) = if let Some(n) = upper.strip_suffix('K') {
            (n, 1024)
        } else if let Some(n) = upper.strip_suffix('M') {
            (n, 1024 * 1024)
        } else if let Some(n) = upper.strip_suffix('B') {
            (n, 1)
        } else {
            (upper.as_str(), 1)
        };

        let count: u32 = digits.parse().map_err(|_| invalid())?;
        let bytes = count.checked_mul(multiplier).ok_or_else(invalid)?;
        Self::new(bytes)
    }
}

impl Default for BlockSize {
    /// 4 KiB, the harness's headline transfer size.
    fn default() -> Self {
        Self(4096)
    }
}

impl TryFrom<String> for BlockSize {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlockSize> for String {
    fn from(bs: BlockSize) -> Self {
        bs.to_string()
    }
}

impl fmt::Display for BlockSize {
    /// Formats the way the harness names result files (`4K`, `512B`, `1M`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MIB: u32 = 1024 * 1024;
        if self.0 % MIB == 0 {
            write!(f, "{}M", self.0 / MIB)
        } else if self.0 % 1024 == 0 {
            write!(f, "{}K", self.0 / 1024)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

/// Validated nice value (-20..=19).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Nice(i8);

impl Nice {
    pub fn new(nice: i32) -> Result<Self, ConfigError> {
        if !(-20..=19).contains(&nice) {
            return Err(ConfigError::InvalidFieldValue {
                field: "nice",
                value: nice.to_string(),
                reason: "Must be between -20 and 19".to_string(),
            });
        }
        Ok(Self(nice as i8))
    }

    pub fn value(&self) -> i32 {
        self.0 as i32
    }
}

impl Default for Nice {
    fn default() -> Self {
        Self(0)
    }
}

impl TryFrom<i32> for Nice {
    type Error = ConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Nice> for i32 {
    fn from(nice: Nice) -> Self {
        nice.0 as i32
    }
}

/// Ordered, de-duplicated CPU set parsed from FIO `cpus_allowed` syntax
/// such as `0-3,8,10-11`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CpuList(Vec<CoreId>);

impl CpuList {
    pub fn from_cores(cores: impl IntoIterator<Item = CoreId>) -> Result<Self, ConfigError> {
        let mut cores: Vec<CoreId> = cores.into_iter().collect();
        cores.sort_unstable();
        cores.dedup();
        if cores.is_empty() {
            return Err(ConfigError::InvalidFieldValue {
                field: "cpus_allowed",
                value: String::new(),
                reason: "CPU list cannot be empty".to_string(),
            });
        }
        Ok(Self(cores))
    }

    pub fn cores(&self) -> &[CoreId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, core: CoreId) -> bool {
        self.0.binary_search(&core).is_ok()
    }
}

impl FromStr for CpuList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |part: &str| ConfigError::InvalidFieldValue {
            field: "cpus_allowed",
            value: s.to_string(),
            reason: format!("Cannot parse '{}'", part),
        };
        let parse_core = |part: &str| -> Result<u16, ConfigError> {
            part.trim().parse::<u16>().map_err(|_| invalid(part))
        };

        let mut cores = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((start, end)) = part.split_once('-') {
                let (start, end) = (parse_core(start)?, parse_core(end)?);
                if start > end {
                    return Err(invalid(part));
                }
                cores.extend((start..=end).map(CoreId::new));
            } else {
                cores.push(CoreId::new(parse_core(part)?));
            }
        }

        Self::from_cores(cores)
    }
}

impl TryFrom<String> for CpuList {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CpuList> for String {
    fn from(list: CpuList) -> Self {
        list.to_string()
    }
}

impl fmt::Display for CpuList {
    /// Compact range form, e.g. `0-3,8`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        let mut iter = self.0.iter().map(|c| c.value()).peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if start == end {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{}-{}", start, end));
            }
        }
        write!(f, "{}", parts.join(","))
    }
}
