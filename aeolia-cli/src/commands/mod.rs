// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

use std::path::Path;

use aeolia_bench::LatencyMetrics;
use aeolia_core::RunResult;

pub mod jobfile;
pub mod run;
pub mod simulate;
pub mod validate;

/// Write `result` to `output`, or to stdout when none is given.
fn write_result(result: &RunResult, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let json = result.to_json()?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!(path = %path.display(), "Result written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// One line per job group on stderr, so stdout stays pure JSON.
fn print_summary(result: &RunResult) {
    let fmt = |ns: Option<u64>| ns.map_or_else(|| "-".to_string(), LatencyMetrics::format_latency);
    for job in &result.jobs {
        let io = result.io_of(job);
        eprintln!(
            "  {:<12} iops={:<10.0} p50={:<10} p99.9={}",
            job.jobname,
            io.iops,
            fmt(io.percentile(50.0)),
            fmt(io.percentile(99.9))
        );
    }
    for compute in &result.compute {
        eprintln!(
            "  {:<12} batch_ops/s={:.1}",
            compute.jobname, compute.batch_ops_per_sec
        );
    }
}
