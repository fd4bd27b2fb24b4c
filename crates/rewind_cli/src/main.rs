//! Rewind CLI - headless tooling for recorded browser sessions
//!
//! - `inspect`: summary of a session export
//! - `replay`: deterministic headless playback with final insights
//! - `correlate`: error correlations as JSON
//! - `tree`: the reconstructed tree at a point in time
//! - `minify`: stylesheet compression through the offload pipeline
//! - `config`: the effective configuration

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{ReplayOptions, TreeFormat};
use config::RewindConfig;

#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(about = "Replay, inspect and correlate recorded browser sessions")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./rewind.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarize a session export
    Inspect {
        /// Session export (JSON)
        file: PathBuf,
    },

    /// Play a session headlessly and print the final insights
    Replay {
        /// Session export (JSON)
        file: PathBuf,

        /// Playback speed multiplier
        #[arg(long)]
        speed: Option<f64>,

        /// Stop at this many milliseconds since session start
        #[arg(long)]
        until: Option<f64>,

        /// Tick length in milliseconds
        #[arg(long)]
        tick: Option<f64>,

        /// Print every playback signal as a JSON line
        #[arg(long)]
        signals: bool,
    },

    /// Print error correlations as JSON
    Correlate {
        /// Session export (JSON)
        file: PathBuf,
    },

    /// Print the reconstructed tree at a point in time
    Tree {
        /// Session export (JSON)
        file: PathBuf,

        /// Milliseconds since session start
        #[arg(long)]
        at: f64,

        #[arg(long, value_enum, default_value_t = TreeFormat::Outline)]
        format: TreeFormat,
    },

    /// Compress a stylesheet
    Minify {
        /// CSS file
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "rewind=debug" } else { "rewind=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = RewindConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { file } => commands::inspect(&file, &config),
        Commands::Replay {
            file,
            speed,
            until,
            tick,
            signals,
        } => commands::replay(
            &file,
            &config,
            &ReplayOptions {
                speed,
                until,
                tick,
                signals,
            },
        ),
        Commands::Correlate { file } => commands::correlate(&file, &config),
        Commands::Tree { file, at, format } => commands::tree(&file, at, format, &config),
        Commands::Minify { file } => commands::minify(&file, &config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
