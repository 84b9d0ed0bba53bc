// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Software overhead of the driver core, measured on a manual clock so that
//! only CPU time in the driver is timed.

use std::collections::HashMap;
use std::sync::Arc;

use aeolia_core::driver::open_device;
use aeolia_core::request::CompletionRecord;
use aeolia_core::types::{CoreId, RequestId};
use aeolia_core::{
    Companion, CompletionStatus, Driver, DriverResult, Engine, IoType, JobId, JobSpec,
    LatencyRecorder, ManualClock, OpKind, RunConfig, PERCENTILE_LIST,
};

use crate::harness::BenchmarkHarness;
use crate::metrics::OverheadResult;

fn driver(engine: Engine, corun: bool) -> DriverResult<(Driver, Arc<ManualClock>)> {
    let cores = "0".parse()?;
    let mut jobs = vec![JobSpec::io(
        "test",
        IoType::RandRead,
        Default::default(),
        Default::default(),
        1,
        cores,
        engine.default_policy(),
    )];
    if corun {
        jobs.push(JobSpec::compute("comp", "0".parse()?, 1_000_000));
    }
    let config = RunConfig::with_jobs(engine, jobs)?;
    let clock = Arc::new(ManualClock::new());
    let device = open_device(&config)?;
    let driver = Driver::new(config, device, clock.clone(), Companion::Simulated);
    Ok((driver, clock))
}

/// One dispatch, clock jump to the device's ready instant, and poll.
pub fn dispatch_poll(harness: &BenchmarkHarness, engine: Engine) -> DriverResult<OverheadResult> {
    let (driver, clock) = driver(engine, false)?;
    let dispatcher = Arc::clone(driver.dispatcher());
    let core = CoreId::new(0);
    let job = JobId::new(0);
    let mut failed = 0u64;

    let samples = harness.run(|| match dispatcher.dispatch(job, OpKind::Read, 0, 4096) {
        Ok(ticket) => {
            clock.advance_to(ticket.ready_ns + 10_000);
            dispatcher.poll(core, 1);
        }
        Err(_) => failed += 1,
    });
    dispatcher.teardown();

    Ok(OverheadResult::new(format!("dispatch_poll_{}", engine), samples)
        .with_metadata("engine", engine.name())
        .with_metadata("failed", failed))
}

/// One scheduler pass over a co-run core.
pub fn retune(harness: &BenchmarkHarness) -> DriverResult<OverheadResult> {
    let (driver, clock) = driver(Engine::Aeolia, true)?;
    let scheduler = Arc::clone(driver.scheduler());
    let rates: HashMap<CoreId, f64> = [(CoreId::new(0), 100.0)].into_iter().collect();

    let samples = harness.run_with_setup(
        || clock.advance(10_000_000),
        || {
            scheduler.retune_all(&rates);
        },
    );
    Ok(OverheadResult::new("retune_all", samples).with_metadata("cores", 1))
}

/// Full percentile list over a recorder holding `population` samples.
pub fn percentiles(harness: &BenchmarkHarness, population: u64) -> OverheadResult {
    let recorder = LatencyRecorder::new(1024);
    for i in 0..population {
        recorder.record(&CompletionRecord {
            request_id: RequestId::new(i),
            job_id: JobId::new(0),
            core: CoreId::new(0),
            op_kind: OpKind::Read,
            length: 4096,
            complete_ns: i,
            status: CompletionStatus::Ok,
            latency_ns: 8_000 + (i * 7919) % 4_000,
        });
    }

    let samples = harness.run(|| {
        for p in PERCENTILE_LIST {
            recorder.percentile(p);
        }
    });
    OverheadResult::new(format!("percentiles_{}", population), samples)
        .with_metadata("population", population)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_poll_runs_clean() {
        let harness = BenchmarkHarness::new().warmup(10).iterations(100);
        let r = dispatch_poll(&harness, Engine::Spdk).unwrap();
        assert_eq!(r.iterations, 100);
        assert_eq!(r.metadata["failed"], 0);
        assert!(r.latency.max_ns >= r.latency.p50_ns);
    }

    #[test]
    fn test_retune_and_percentiles() {
        let harness = BenchmarkHarness::new().warmup(1).iterations(10);
        assert_eq!(retune(&harness).unwrap().iterations, 10);
        let p = percentiles(&harness, 1_000);
        assert_eq!(p.name, "percentiles_1000");
        assert_eq!(p.metadata["population"], 1_000);
    }
}
