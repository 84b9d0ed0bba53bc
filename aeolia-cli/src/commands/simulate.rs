// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `aeolia simulate` command - Run a configuration on the simulator.

use std::path::Path;

use aeolia_core::{ConfigLoader, Simulation};

use super::{print_summary, write_result};

pub async fn execute(config_path: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    tracing::info!(
        config = %config_path.display(),
        engine = config.engine.name(),
        seed = config.seed,
        "Simulating run"
    );

    let result = tokio::task::spawn_blocking(move || Simulation::new(config).run()).await??;

    print_summary(&result);
    write_result(&result, output)
}
