//! Validation commands: record and inspect evaluation passes.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use trialdb_core::{
    Config, RunState, SqliteTrialRepository, SqliteValidationTracker, Validation,
    ValidationTracker,
};

use super::{
    colored_state, format_optional_time, format_payload, format_time, open_database,
    parse_json_object, print_json,
};

/// Validation subcommands
#[derive(Subcommand, Debug)]
pub enum ValidationCommand {
    /// Record a new validation at a total batch
    Add {
        /// Trial ID
        trial_id: i64,
        /// Batches the trial had processed when validating
        total_batch: i64,
    },
    /// Move a validation to a new state and/or record its metrics
    Update {
        /// Trial ID
        trial_id: i64,
        /// Total batch of the validation
        total_batch: i64,
        /// New state (ACTIVE, COMPLETED, ERROR)
        #[arg(long)]
        state: Option<RunState>,
        /// Metrics as a JSON object
        #[arg(long)]
        metrics: Option<String>,
    },
    /// Show a validation
    Show {
        /// Trial ID
        trial_id: i64,
        /// Total batch of the validation
        total_batch: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a trial's validations
    List {
        /// Trial ID
        trial_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute validation command
pub fn execute(cmd: ValidationCommand, config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let trials = SqliteTrialRepository::new(&db);
    let validations = SqliteValidationTracker::with_config(&db, &trials, &config.validation);

    match cmd {
        ValidationCommand::Add { trial_id, total_batch } => {
            let id = validations
                .add_validation(&Validation::new(trial_id, total_batch))
                .with_context(|| {
                    format!("Failed to add validation of trial {trial_id} at total batch {total_batch}")
                })?;
            println!(
                "{} Added validation {} (trial {}, total batch {})",
                "✓".green(),
                id.to_string().bold(),
                trial_id,
                total_batch
            );
        }
        ValidationCommand::Update { trial_id, total_batch, state, metrics } => {
            let metrics = metrics.as_deref().map(|m| parse_json_object(m, "metrics")).transpose()?;
            validations.update_validation(trial_id, total_batch, state, metrics).with_context(
                || format!("Failed to update validation of trial {trial_id} at total batch {total_batch}"),
            )?;
            println!(
                "{} Updated validation (trial {}, total batch {})",
                "✓".green(),
                trial_id,
                total_batch
            );
        }
        ValidationCommand::Show { trial_id, total_batch, json } => {
            let validation = validations.validation_by_total_batch(trial_id, total_batch)?;
            if json {
                print_json(&validation)?;
            } else {
                print_validation(&validation);
            }
        }
        ValidationCommand::List { trial_id, json } => {
            let all = validations.validations_for_trial(trial_id)?;
            if json {
                print_json(&all)?;
            } else if all.is_empty() {
                println!("No validations recorded for trial {trial_id}.");
            } else {
                println!("{:<14} {:<10}  {}", "Total batch", "State", "Metrics");
                println!("{}", "-".repeat(48));
                for validation in &all {
                    println!(
                        "{:<14} {:<10}  {}",
                        validation.total_batch,
                        colored_state(validation.state),
                        format_payload(validation.metrics.as_ref())
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_validation(validation: &Validation) {
    let id = validation.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    println!("{} {} of trial {}", "Validation".bold(), id, validation.trial_id);
    println!("  Total batch: {}", validation.total_batch);
    println!("  State:       {}", colored_state(validation.state));
    println!("  Started:     {}", format_time(&validation.start_time));
    println!("  Ended:       {}", format_optional_time(validation.end_time.as_ref()));
    println!("  Metrics:     {}", format_payload(validation.metrics.as_ref()));
}
