// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Error types for the aeolia core.
//!
//! Every failure is an explicit enum variant. `QueueFull` and `Backpressure`
//! are transient and retried by the caller; `Device` and `ConfigInvalid` are
//! fatal for the configuration under test.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{CoreId, JobId};

/// Top-level error type for the driver core.
#[derive(Debug, Error)]
pub enum DriverError {
    // =========================================================================
    // Configuration Errors - Fatal Before Any I/O
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    // =========================================================================
    // Transient Errors - Retried With Backoff
    // =========================================================================
    #[error("Queue full: {0}")]
    QueueFull(#[from] QueueFull),

    #[error("Backpressure: {0}")]
    Backpressure(#[from] Backpressure),

    // =========================================================================
    // Fatal Run Errors
    // =========================================================================
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<DriverError>,
    },

    #[error("Run aborted: {reason}")]
    Aborted { reason: String },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl DriverError {
    /// Transient errors may succeed when retried after completions drain.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull(_) | Self::Backpressure(_))
    }
}

/// Invalid configuration, detected at run start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Unknown engine: {name} (expected one of psync, iou_dfl, iou_poll, spdk, aeolia)")]
    UnknownEngine { name: String },

    #[error("Duplicate job name: {name}")]
    DuplicateJobName { name: String },

    #[error("Split policy needs one core per job: {numjobs} jobs over {cores} cores in '{job}'")]
    SplitOversubscribed {
        job: String,
        numjobs: u32,
        cores: usize,
    },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// A completion queue has `iodepth` requests outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("core {core} has {depth} requests outstanding")]
pub struct QueueFull {
    pub core: CoreId,
    pub depth: u32,
}

/// A job's target queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job {job} blocked on core {core} (iodepth {depth})")]
pub struct Backpressure {
    pub job: JobId,
    pub core: CoreId,
    pub depth: u32,
}

impl Backpressure {
    pub fn from_queue_full(job: JobId, full: QueueFull) -> Self {
        Self {
            job,
            core: full.core,
            depth: full.depth,
        }
    }
}

/// Device failures abort the configuration under test.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Access out of range: offset {offset} + length {length} > capacity {capacity}")]
    OutOfRange {
        offset: u64,
        length: u32,
        capacity: u64,
    },

    #[error("Unaligned access: offset {offset}, length {length} (sector {sector})")]
    Unaligned { offset: u64, length: u32, sector: u32 },

    #[error("Failed to open device {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("{op} failed at offset {offset}: {reason}")]
    TransferFailed {
        op: &'static str,
        offset: u64,
        reason: String,
    },

    #[error("Short {op} at offset {offset}: {done} of {length} bytes")]
    ShortTransfer {
        op: &'static str,
        offset: u64,
        done: usize,
        length: u32,
    },
}

/// Result type alias using DriverError.
pub type DriverResult<T> = Result<T, DriverError>;
