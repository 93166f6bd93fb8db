//! Binary entry point for oobgc.
//!
//! Offline tooling around the out-of-band reclamation scheduler: replaying
//! request streams through a policy and summarising diagnostic logs.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use oobgc::WorkerId;
use oobgc::cli::{SimulateOptions, read_paths, render_summaries, run_simulation, summarize};
use oobgc::config::OobGcConfig;
use oobgc::instrument::read_records;
use oobgc::observability;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// oobgc - Out-of-band reclamation scheduling tools.
#[derive(Parser)]
#[command(name = "oobgc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "OOBGC_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Replay request paths through the configured policy.
    Simulate {
        /// File with one request path per line (stdin when omitted).
        file: Option<PathBuf>,

        /// Bytes each simulated request defers into the heap.
        #[arg(long, default_value = "4096")]
        payload_bytes: usize,

        /// Scripted resident memory readings in bytes (comma-separated).
        #[arg(long, value_delimiter = ',')]
        memory: Vec<u64>,

        /// Worker id of the simulated cycle.
        #[arg(long, default_value = "1")]
        worker: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Summarise a diagnostic log per endpoint.
    Report {
        /// Diagnostic CSV file.
        file: PathBuf,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let logging = if cli.verbose {
        config.logging.clone().verbose()
    } else {
        config.logging.clone()
    };
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize observability: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli, config: &OobGcConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Simulate {
            file,
            payload_bytes,
            memory,
            worker,
            json,
        } => {
            let paths = match file {
                Some(path) => read_paths(BufReader::new(std::fs::File::open(path)?))?,
                None => read_paths(std::io::stdin().lock())?,
            };
            let options = SimulateOptions {
                payload_bytes,
                memory_readings: memory,
                worker: WorkerId::new(worker),
            };
            let report = run_simulation(config, &paths, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        },

        Commands::Report { file, json } => {
            let summaries = summarize(&read_records(&file)?);
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print!("{}", render_summaries(&summaries));
            }
        },
    }
    Ok(())
}

/// Loads configuration from an explicit path or the default location, then
/// applies environment overrides.
fn load_config(path: Option<&Path>) -> Result<OobGcConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(config_path) => OobGcConfig::load_from_file(config_path)?,
        None => OobGcConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}
