// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Aeolia Benchmarking Framework
//!
//! Reproduces the storage evaluation harness around the driver core.
//!
//! # Pieces
//!
//! - **Sweep**: engines × iotypes × iodepths × iosizes × numjobs, one
//!   configuration at a time with retries
//! - **FIO**: job-file rendering and invocation of an external `fio`
//! - **Overhead**: dispatch, poll, retune and percentile costs
//!
//! # Data Output
//!
//! Every configuration writes a FIO-shaped JSON file under
//! `<out>/<engine>/`; the sweep summary carries system information and a
//! timestamp.

pub mod fio;
pub mod harness;
pub mod metrics;
pub mod overhead;
pub mod reporter;
pub mod sweep;

pub use fio::{render_job_file, FioRunner};
pub use harness::BenchmarkHarness;
pub use metrics::{BenchmarkReport, LatencyMetrics, OverheadResult, SweepEntry, SweepPoint, SystemInfo};
pub use reporter::JsonReporter;
pub use sweep::{Backend, Sweep, SweepError, SweepSpec};
