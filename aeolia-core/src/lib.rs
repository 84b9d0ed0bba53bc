// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Aeolia Core Library
//!
//! Concurrent I/O dispatch and cross-task scheduling core of the aeolia
//! storage driver: per-core completion queues, the submission dispatcher,
//! the cross-task scheduler and the latency recorder, plus the run
//! configuration, a threaded runner, a deterministic simulator and the
//! engine-plugin session facade.

pub mod affinity;
pub mod budget;
pub mod clock;
pub mod companion;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod driver;
pub mod engine;
pub mod error;
pub mod queue;
pub mod request;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod sim;
pub mod stats;
pub mod telemetry;
pub mod types;
pub mod workload;

// Re-export commonly used types
pub use budget::{BudgetBoard, CoreBudget};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use companion::Companion;
pub use config::{ConfigLoader, JobKind, JobSpec, RunConfig};
pub use device::{Device, FileDevice, SimulatedDevice};
pub use dispatcher::{Dispatcher, JobContext, TeardownReport};
pub use driver::Driver;
pub use engine::{CpuPolicy, DriverFlags, Engine};
pub use error::{Backpressure, ConfigError, DeviceError, DriverError, DriverResult, QueueFull};
pub use queue::{CompletionQueue, QueueContext};
pub use request::{CompletionRecord, CompletionStatus, IoType, OpKind, Request, Ticket};
pub use retry::RetryPolicy;
pub use runner::Runner;
pub use scheduler::{CrossTaskScheduler, SchedulerMode, SchedulerState, WindowStats};
pub use session::{QueueStatus, Session};
pub use sim::Simulation;
pub use stats::RunResult;
pub use telemetry::{LatencyRecorder, PERCENTILE_LIST};
pub use types::{BlockSize, CoreId, CpuList, IoDepth, JobId, Nice, RequestId};
