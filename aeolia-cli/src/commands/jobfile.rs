// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `aeolia jobfile` command - Render the FIO job file of a configuration.

use std::path::Path;

use aeolia_bench::render_job_file;
use aeolia_core::ConfigLoader;

pub async fn execute(
    config_path: &Path,
    filename: Option<&str>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;

    let configured = config.filename.as_ref().map(|p| p.display().to_string());
    let filename = filename
        .map(str::to_string)
        .or(configured)
        .ok_or("No filename given and none configured")?;

    let job = render_job_file(&config, &filename);
    match output {
        Some(path) => {
            std::fs::write(path, job)?;
            println!("✓ Job file written to {}", path.display());
        }
        None => print!("{}", job),
    }
    Ok(())
}
