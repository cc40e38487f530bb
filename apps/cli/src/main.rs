//! trialdb CLI - Command-line interface for the trialdb training ledger
//!
//! This CLI provides a `trialdb` command for registering trials and for
//! recording and inspecting the steps, validations and checkpoints they report.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trialdb_core::Config;

use commands::checkpoint::CheckpointCommand;
use commands::step::StepCommand;
use commands::trial::TrialCommand;
use commands::validation::ValidationCommand;
use commands::{checkpoint, init, step, trial, validation};

/// trialdb - Durable progress ledger for training trials
#[derive(Parser, Debug)]
#[command(
    name = "trialdb",
    author,
    version,
    about = "trialdb - Durable progress ledger for training trials",
    long_about = "trialdb records the steps, validations and checkpoints of training trials.\nState changes follow a fixed transition policy and write-once fields are never overwritten."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (overrides TRIALDB_CONFIG and ./trialdb.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ledger database file (overrides the configured path)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize the ledger database
    ///
    /// Creates the database file and its schema if they do not exist yet.
    Init {
        /// Also write the effective configuration to ./trialdb.toml
        #[arg(long)]
        write_config: bool,
    },

    /// Trial registry commands
    #[command(subcommand)]
    Trial(TrialCommand),

    /// Step commands
    #[command(subcommand)]
    Step(StepCommand),

    /// Validation commands
    #[command(subcommand)]
    Validation(ValidationCommand),

    /// Checkpoint commands
    #[command(subcommand)]
    Checkpoint(CheckpointCommand),
}

fn init_tracing(log_level: &str) -> Result<()> {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::discover_and_load().context("Failed to load configuration")?,
    };
    if let Some(database) = &args.database {
        config.database.path.clone_from(database);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let config = load_config(&args)?;

    match args.command {
        Command::Init { write_config } => init::execute(&config, write_config),
        Command::Trial(cmd) => trial::execute(cmd, &config),
        Command::Step(cmd) => step::execute(cmd, &config),
        Command::Validation(cmd) => validation::execute(cmd, &config),
        Command::Checkpoint(cmd) => checkpoint::execute(cmd, &config),
    }
}
