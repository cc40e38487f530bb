//! Trial registry commands.
//!
//! Trials are normally driven by the scheduler; these commands let an operator
//! register one and move it between states so work can be recorded against it.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use trialdb_core::{Config, SqliteTrialRepository, Trial, TrialState};

use super::{open_database, print_json};

/// Trial subcommands
#[derive(Subcommand, Debug)]
pub enum TrialCommand {
    /// Register a trial
    Add {
        /// Trial ID
        id: i64,
        /// Initial state (defaults to ACTIVE)
        #[arg(long)]
        state: Option<TrialState>,
    },
    /// Set a trial's state (e.g. PAUSED, STOPPING_COMPLETED)
    State {
        /// Trial ID
        id: i64,
        /// New state
        state: TrialState,
    },
    /// Show a trial
    Show {
        /// Trial ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute trial command
pub fn execute(cmd: TrialCommand, config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let trials = SqliteTrialRepository::new(&db);

    match cmd {
        TrialCommand::Add { id, state } => {
            let trial = Trial::new(id).with_state(state.unwrap_or_default());
            trials.create(&trial).with_context(|| format!("Failed to register trial {id}"))?;
            println!("{} Registered trial {} ({})", "✓".green(), id.to_string().bold(), trial.state);
        }
        TrialCommand::State { id, state } => {
            trials.set_state(id, state).with_context(|| format!("Failed to update trial {id}"))?;
            println!("{} Trial {} is now {}", "✓".green(), id.to_string().bold(), state);
        }
        TrialCommand::Show { id, json } => {
            let trial = trials.get_by_id(id).with_context(|| format!("Failed to load trial {id}"))?;
            if json {
                print_json(&trial)?;
            } else {
                println!("{} {}", "Trial".bold(), trial.id);
                println!("  State: {}", trial.state);
            }
        }
    }
    Ok(())
}
