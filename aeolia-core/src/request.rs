// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Requests and their completion records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{CoreId, JobId, RequestId};

/// Direction of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Read,
    Write,
}

impl OpKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// FIO `rw=` workload of an I/O job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IoType {
    RandRead,
    RandWrite,
}

impl IoType {
    pub const ALL: [IoType; 2] = [Self::RandRead, Self::RandWrite];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::RandRead => "randread",
            Self::RandWrite => "randwrite",
        }
    }

    pub const fn op_kind(&self) -> OpKind {
        match self {
            Self::RandRead => OpKind::Read,
            Self::RandWrite => OpKind::Write,
        }
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IoType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "randread" => Ok(Self::RandRead),
            "randwrite" => Ok(Self::RandWrite),
            other => Err(ConfigError::InvalidFieldValue {
                field: "iotype",
                value: other.to_string(),
                reason: "Expected 'randread' or 'randwrite'".to_string(),
            }),
        }
    }
}

impl TryFrom<String> for IoType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IoType> for String {
    fn from(t: IoType) -> Self {
        t.name().to_string()
    }
}

/// A single I/O request, immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub job_id: JobId,
    pub op_kind: OpKind,
    pub offset: u64,
    pub length: u32,
    pub submit_ns: u64,
    pub target_core: CoreId,
}

/// Final status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Ok,
    /// Still outstanding at teardown.
    Abandoned,
}

/// Outcome of one request as handed to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    pub request_id: RequestId,
    pub job_id: JobId,
    pub core: CoreId,
    pub op_kind: OpKind,
    pub length: u32,
    pub complete_ns: u64,
    pub status: CompletionStatus,
    pub latency_ns: u64,
}

impl CompletionRecord {
    /// Stamp a completion for `request` at `complete_ns`.
    pub fn complete(request: &Request, complete_ns: u64, status: CompletionStatus) -> Self {
        Self {
            request_id: request.id,
            job_id: request.job_id,
            core: request.target_core,
            op_kind: request.op_kind,
            length: request.length,
            complete_ns,
            status,
            latency_ns: complete_ns.saturating_sub(request.submit_ns),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == CompletionStatus::Ok
    }
}

/// Receipt for an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub request_id: RequestId,
    pub core: CoreId,
    /// Instant the device finishes the transfer.
    pub ready_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(submit_ns: u64) -> Request {
        Request {
            id: RequestId::new(1),
            job_id: JobId::new(0),
            op_kind: OpKind::Read,
            offset: 4096,
            length: 4096,
            submit_ns,
            target_core: CoreId::new(3),
        }
    }

    #[test]
    fn test_latency_is_complete_minus_submit() {
        let rec = CompletionRecord::complete(&request(1_000), 9_500, CompletionStatus::Ok);
        assert_eq!(rec.latency_ns, 8_500);
        assert_eq!(rec.core, CoreId::new(3));
        assert!(rec.is_ok());
    }

    #[test]
    fn test_latency_never_negative() {
        let rec = CompletionRecord::complete(&request(5_000), 4_000, CompletionStatus::Abandoned);
        assert_eq!(rec.latency_ns, 0);
        assert!(!rec.is_ok());
    }

    #[test]
    fn test_iotype_parse() {
        assert_eq!("randwrite".parse::<IoType>().unwrap().op_kind(), OpKind::Write);
        assert!("read".parse::<IoType>().is_err());
    }
}
