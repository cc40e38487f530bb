//! Step commands: record and inspect units of training work.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use trialdb_core::{
    Config, RunState, SqliteStepTracker, SqliteTrialRepository, Step, StepTracker,
};

use super::{
    colored_state, format_optional_time, format_payload, format_time, open_database,
    parse_json_object, print_json,
};

/// Step subcommands
#[derive(Subcommand, Debug)]
pub enum StepCommand {
    /// Record a new step for an active trial
    Add {
        /// Trial ID
        trial_id: i64,
        /// Step number within the trial
        step_id: i64,
        /// Batches this step covers
        #[arg(long, default_value = "0")]
        num_batches: i64,
        /// Batches the trial processed before this step
        #[arg(long, default_value = "0")]
        prior_batches: i64,
        /// Record the step as already completed with no batches
        #[arg(long)]
        no_op: bool,
    },
    /// Move a step to a new state and/or record its metrics
    Update {
        /// Trial ID
        trial_id: i64,
        /// Step number within the trial
        step_id: i64,
        /// New state (ACTIVE, COMPLETED, ERROR)
        #[arg(long)]
        state: Option<RunState>,
        /// Metrics as a JSON object
        #[arg(long)]
        metrics: Option<String>,
    },
    /// Show a step
    Show {
        /// Trial ID
        trial_id: i64,
        /// Step number within the trial
        step_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a trial's steps
    List {
        /// Trial ID
        trial_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute step command
pub fn execute(cmd: StepCommand, config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let trials = SqliteTrialRepository::new(&db);
    let steps = SqliteStepTracker::new(&db, &trials);

    match cmd {
        StepCommand::Add { trial_id, step_id, num_batches, prior_batches, no_op } => {
            let added = if no_op {
                steps.add_no_op_step(&Step::no_op(trial_id, step_id, prior_batches))
            } else {
                steps.add_step(&Step::new(trial_id, step_id, num_batches, prior_batches))
            };
            added.with_context(|| format!("Failed to add step {step_id} of trial {trial_id}"))?;
            println!("{} Added step {} of trial {}", "✓".green(), step_id, trial_id);
        }
        StepCommand::Update { trial_id, step_id, state, metrics } => {
            let metrics = metrics.as_deref().map(|m| parse_json_object(m, "metrics")).transpose()?;
            steps
                .update_step(trial_id, step_id, state, metrics)
                .with_context(|| format!("Failed to update step {step_id} of trial {trial_id}"))?;
            println!("{} Updated step {} of trial {}", "✓".green(), step_id, trial_id);
        }
        StepCommand::Show { trial_id, step_id, json } => {
            let step = steps.step_by_id(trial_id, step_id)?;
            if json {
                print_json(&step)?;
            } else {
                print_step(&step);
            }
        }
        StepCommand::List { trial_id, json } => {
            let all = steps.steps_for_trial(trial_id)?;
            if json {
                print_json(&all)?;
            } else if all.is_empty() {
                println!("No steps recorded for trial {trial_id}.");
            } else {
                println!(
                    "{:<8} {:<10} {:>10} {:>14}  {}",
                    "Step", "State", "Batches", "Total batches", "Metrics"
                );
                println!("{}", "-".repeat(64));
                for step in &all {
                    println!(
                        "{:<8} {:<10} {:>10} {:>14}  {}",
                        step.id,
                        colored_state(step.state),
                        step.num_batches,
                        total_batches(step),
                        format_payload(step.metrics.as_ref())
                    );
                }
            }
        }
    }
    Ok(())
}

fn total_batches(step: &Step) -> String {
    step.total_batches_processed().map_or_else(|| "overflow".to_string(), |total| total.to_string())
}

fn print_step(step: &Step) {
    println!("{} {} of trial {}", "Step".bold(), step.id, step.trial_id);
    println!("  State:         {}", colored_state(step.state));
    println!("  Started:       {}", format_time(&step.start_time));
    println!("  Ended:         {}", format_optional_time(step.end_time.as_ref()));
    println!("  Batches:       {} (after {})", step.num_batches, step.prior_batches_processed);
    println!("  Total batches: {}", total_batches(step));
    println!("  Metrics:       {}", format_payload(step.metrics.as_ref()));
}
