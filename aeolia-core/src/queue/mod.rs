// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Completion queue core.
//!
//! One bounded queue per core tracks in-flight requests and decides when
//! and in which order their completions are handed out (poll, interrupt or
//! coalesced interrupt, fair across jobs).

mod coalesce;
mod completion;

pub use completion::{CompletionQueue, Completions, QueueContext};
