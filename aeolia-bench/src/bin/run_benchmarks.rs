// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI tool to run a parameter sweep and the overhead benchmarks.

use std::path::PathBuf;

use aeolia_bench::{
    overhead, Backend, BenchmarkHarness, BenchmarkReport, FioRunner, JsonReporter,
    LatencyMetrics, Sweep, SweepSpec,
};
use aeolia_core::{BlockSize, DriverFlags, Engine, IoDepth, IoType};
use anyhow::Context;
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    Sim,
    Threaded,
    Fio,
}

#[derive(Parser)]
#[command(name = "run_benchmarks")]
#[command(about = "Run aeolia parameter sweeps and generate JSON reports")]
struct Args {
    /// Output directory for result files
    #[arg(short, long, default_value = "data")]
    output: PathBuf,

    /// Engines to sweep
    #[arg(long, value_delimiter = ',', default_value = "psync,spdk,iou_dfl,aeolia")]
    engines: Vec<Engine>,

    #[arg(long, value_delimiter = ',', default_value = "randread,randwrite")]
    iotypes: Vec<IoType>,

    #[arg(long, value_delimiter = ',', default_value = "1")]
    iodepths: Vec<u32>,

    #[arg(long, value_delimiter = ',', default_value = "4K")]
    iosizes: Vec<BlockSize>,

    #[arg(long, value_delimiter = ',', default_value = "1")]
    numjobs: Vec<u32>,

    /// First core jobs are placed on
    #[arg(long, default_value_t = 0)]
    first_core: u16,

    /// Runtime of each configuration in seconds
    #[arg(long, default_value_t = 10)]
    runtime: u64,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Device or file to run against (required by the fio backend)
    #[arg(long)]
    filename: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "sim")]
    backend: BackendKind,

    /// fio binary
    #[arg(long, default_value = "fio")]
    fio: PathBuf,

    /// Engine plugin preloaded into fio for spdk and aeolia
    #[arg(long)]
    preload: Option<PathBuf>,

    /// Co-run a compute task with this batch cost (ns) next to every job
    #[arg(long)]
    corun: Option<u64>,

    /// aeolia driver class: 0 throughput, 1 latency
    #[arg(long = "type", default_value_t = 1)]
    class: u8,

    /// aeolia completion delivery: 0 polling, 1 interrupt
    #[arg(long, default_value_t = 1)]
    intr: u8,

    /// aeolia interrupt coalescing: 0 off, 1 on
    #[arg(long, default_value_t = 1)]
    coalescing: u8,

    /// Also measure driver overheads
    #[arg(long)]
    overhead: bool,

    /// Iterations of each overhead benchmark
    #[arg(short, long, default_value_t = 10_000)]
    iterations: u64,

    /// Run in quick mode (short runtime, fewer iterations)
    #[arg(long)]
    quick: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let (runtime_ms, iterations) = if args.quick {
        (1_000, 1_000)
    } else {
        (args.runtime * 1_000, args.iterations)
    };
    let flags = DriverFlags::from_raw(args.class, args.intr, args.coalescing)
        .context("invalid driver flags")?;
    let iodepths = args
        .iodepths
        .iter()
        .map(|&d| IoDepth::new(d))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid --iodepths")?;

    let spec = SweepSpec {
        engines: args.engines.clone(),
        iotypes: args.iotypes.clone(),
        iodepths,
        iosizes: args.iosizes.clone(),
        numjobs: args.numjobs.clone(),
        first_core: args.first_core,
        runtime_ms,
        ramp_ms: 0,
        seed: args.seed,
        filename: args.filename.clone(),
        flags,
        corun_batch_ns: args.corun,
    };

    let backend = match args.backend {
        BackendKind::Sim => Backend::Simulated,
        BackendKind::Threaded => Backend::Threaded,
        BackendKind::Fio => {
            let mut runner = FioRunner::new(&args.fio);
            if let Some(plugin) = &args.preload {
                runner = runner.with_preload(plugin);
            }
            Backend::Fio(runner)
        }
    };

    println!("Aeolia Benchmark Suite");
    println!("======================");
    println!("Output directory: {:?}", args.output);
    println!("Configurations:   {}", spec.points().len());
    println!();

    let reporter = JsonReporter::new(&args.output)?;
    let mut report = BenchmarkReport::new();

    let sweep = Sweep::new(spec, reporter.clone(), backend);
    sweep.run(&mut report).context("sweep aborted")?;

    if args.overhead {
        println!("Running overhead benchmarks...");
        let harness = BenchmarkHarness::new()
            .warmup(iterations / 10)
            .iterations(iterations);
        for engine in [Engine::Spdk, Engine::Aeolia] {
            report.add_overhead(overhead::dispatch_poll(&harness, engine)?);
        }
        report.add_overhead(overhead::retune(&harness)?);
        report.add_overhead(overhead::percentiles(&harness, 100_000));
    }

    let path = reporter.save_report(&report)?;
    println!();
    println!("Benchmark report saved to: {:?}", path);
    println!();

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &BenchmarkReport) {
    let fmt = |ns: Option<u64>| ns.map_or_else(|| "-".to_string(), LatencyMetrics::format_latency);

    println!("Summary");
    println!("-------");
    println!();
    println!(
        "{:<10} {:<24} {:>12} {:>10} {:>10}",
        "engine", "config", "iops", "p50", "p99.9"
    );
    for entry in &report.sweep {
        println!(
            "{:<10} {:<24} {:>12.0} {:>10} {:>10}",
            entry.point.engine.name(),
            entry.point.param(),
            entry.iops,
            fmt(entry.p50_ns),
            fmt(entry.p999_ns)
        );
    }

    if !report.overhead.is_empty() {
        println!();
        for result in &report.overhead {
            println!(
                "{}: median={}, p99={}",
                result.name,
                LatencyMetrics::format_latency(result.latency.p50_ns),
                LatencyMetrics::format_latency(result.latency.p99_ns)
            );
        }
    }
}
