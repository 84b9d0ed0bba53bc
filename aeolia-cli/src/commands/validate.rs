// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `aeolia validate` command - Validate configuration file.

use std::path::Path;

use aeolia_core::{ConfigLoader, JobKind};

pub async fn execute(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file.display(), "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Run Settings:");
            println!("  Engine:       {}", config.engine);
            println!("  Runtime:      {}ms (ramp {}ms)", config.runtime_ms, config.ramp_ms);
            println!(
                "  Device:       {}",
                config
                    .filename
                    .as_ref()
                    .map_or_else(|| "simulated".to_string(), |p| p.display().to_string())
            );
            println!(
                "  Driver flags: {}",
                config.driver.flags.fio_options().join(" ")
            );
            println!(
                "  SLO p99.9:    {}us",
                config.scheduler.slo_p999_ns / 1_000
            );
            println!();
            println!("Jobs ({}):", config.jobs.len());
            for job in &config.jobs {
                match &job.kind {
                    JobKind::Io { iotype, iodepth, bs } => println!(
                        "  - {} ({}, iodepth: {}, bs: {}, numjobs: {}, cpus: {} {})",
                        job.name, iotype, iodepth, bs, job.numjobs, job.cpus_allowed, job.policy
                    ),
                    JobKind::Compute { batch_cost_ns } => println!(
                        "  - {} (compute, batch: {}ns, cpus: {})",
                        job.name, batch_cost_ns, job.cpus_allowed
                    ),
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
