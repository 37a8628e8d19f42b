//! nmr-kernel CLI: pulse sequence compilation and measurement for a
//! low-field pulsed NMR spectrometer.

mod config;
mod orchestrator;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "nmr-kernel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Configuration file (TOML, or JSON by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sequence and analyze the capture
    ///
    /// Example: nmr-kernel run cpmg pulse=113us spacing=2ms echoes=32 samples=200
    Run {
        /// Sequence descriptor, e.g. `fid pulse=10us spacing=40us samples=2048`
        #[arg(required = true, num_args = 1..)]
        descriptor: Vec<String>,
    },

    /// Compile a sequence and print the program listing
    Compile {
        /// Sequence descriptor
        #[arg(required = true, num_args = 1..)]
        descriptor: Vec<String>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = config::load_config(cli.config.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Run { descriptor } => {
            let orchestrator = orchestrator::Orchestrator::new(config)?;
            let report = orchestrator.run(&descriptor.join(" "))?;
            output::write_run(&report, cli.format, &mut out)?;
        }
        Commands::Compile { descriptor } => {
            let orchestrator = orchestrator::Orchestrator::new(config)?;
            let report = orchestrator.compile(&descriptor.join(" "))?;
            output::write_compile(&report, cli.format, &mut out)?;
        }
        Commands::ShowConfig => {
            let text = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            write!(out, "{}", text)?;
        }
    }

    Ok(())
}
