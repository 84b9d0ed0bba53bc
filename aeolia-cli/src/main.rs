// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Aeolia CLI
//!
//! Command-line interface for the aeolia driver core.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod companion;

/// Aeolia - low-latency I/O dispatch with cross-task scheduling
#[derive(Parser)]
#[command(name = "aeolia")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a configuration with real threads
    Run {
        /// Path to the run YAML file
        config: PathBuf,

        /// Write the result JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Companion scheduler binary started for the duration of the run
        #[arg(long)]
        companion: Option<PathBuf>,
    },

    /// Run a configuration on the deterministic simulator
    Simulate {
        /// Path to the run YAML file
        config: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },

    /// Print the FIO job file for a configuration
    Jobfile {
        /// Path to the run YAML file
        config: PathBuf,

        /// Device or file to put in the job (defaults to the configured one)
        #[arg(long)]
        filename: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            output,
            companion,
        } => commands::run::execute(&config, output.as_deref(), companion.as_deref()).await,
        Commands::Simulate { config, output } => {
            commands::simulate::execute(&config, output.as_deref()).await
        }
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Jobfile {
            config,
            filename,
            output,
        } => commands::jobfile::execute(&config, filename.as_deref(), output.as_deref()).await,
    }
}
