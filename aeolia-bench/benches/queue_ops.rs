// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Driver core microbenchmarks.
//!
//! Dispatch and poll run against a manual clock so the device's service
//! time never shows up in the measurement.

use std::sync::Arc;

use aeolia_core::driver::open_device;
use aeolia_core::request::CompletionRecord;
use aeolia_core::types::{CoreId, RequestId};
use aeolia_core::{
    Companion, CompletionStatus, Driver, Engine, IoType, JobId, JobSpec, LatencyRecorder,
    ManualClock, OpKind, RunConfig, PERCENTILE_LIST,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

const ENGINES: &[Engine] = &[Engine::Spdk, Engine::IoUringDefault, Engine::Aeolia];

/// Recorder populations for the percentile benchmark.
const POPULATIONS: &[u64] = &[1_000, 100_000, 1_000_000];

fn driver(engine: Engine) -> (Driver, Arc<ManualClock>) {
    let job = JobSpec::io(
        "test",
        IoType::RandRead,
        Default::default(),
        Default::default(),
        1,
        "0".parse().expect("Invalid core list"),
        engine.default_policy(),
    );
    let config = RunConfig::with_jobs(engine, vec![job]).expect("Invalid config");
    let clock = Arc::new(ManualClock::new());
    let device = open_device(&config).expect("Failed to open device");
    let driver = Driver::new(config, device, clock.clone(), Companion::Simulated);
    (driver, clock)
}

fn bench_dispatch_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_poll");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    for &engine in ENGINES {
        group.bench_with_input(BenchmarkId::from_parameter(engine), &engine, |b, &engine| {
            let (driver, clock) = driver(engine);
            let dispatcher = Arc::clone(driver.dispatcher());
            let core = CoreId::new(0);
            let job = JobId::new(0);

            b.iter(|| {
                if let Ok(ticket) = dispatcher.dispatch(job, OpKind::Read, 0, 4096) {
                    clock.advance_to(ticket.ready_ns + 10_000);
                    black_box(dispatcher.poll(core, 1));
                }
            });
            dispatcher.teardown();
        });
    }

    group.finish();
}

fn bench_percentiles(c: &mut Criterion) {
    let mut group = c.benchmark_group("percentiles");

    for &population in POPULATIONS {
        group.bench_with_input(
            BenchmarkId::from_parameter(population),
            &population,
            |b, &population| {
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

                b.iter(|| {
                    for p in PERCENTILE_LIST {
                        black_box(recorder.percentile(p));
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch_poll, bench_percentiles);
criterion_main!(benches);
