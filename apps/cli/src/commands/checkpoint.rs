//! Checkpoint commands: record, enrich and inspect model snapshots.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use trialdb_core::{
    Checkpoint, CheckpointPatch, CheckpointTracker, Config, RunState, SqliteCheckpointTracker,
    SqliteTrialRepository,
};
use uuid::Uuid;

use super::{
    colored_state, format_optional_time, format_payload, format_time, open_database,
    parse_json_object, print_json,
};

/// Checkpoint subcommands
#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// Record a new checkpoint at a total batch
    Add {
        /// Trial ID
        trial_id: i64,
        /// Batches the trial had processed at the snapshot
        total_batch: i64,
    },
    /// Apply a patch to a checkpoint
    ///
    /// uuid, resources, framework and format may each be set once.
    /// Metadata keys are merged into the existing metadata.
    Update {
        /// Trial ID
        trial_id: i64,
        /// Total batch of the checkpoint
        total_batch: i64,
        /// New state (ACTIVE, COMPLETED, ERROR)
        #[arg(long)]
        state: Option<RunState>,
        /// External identifier of the snapshot
        #[arg(long)]
        uuid: Option<Uuid>,
        /// Resource manifest as a JSON object
        #[arg(long)]
        resources: Option<String>,
        /// Metadata to merge, as a JSON object
        #[arg(long)]
        metadata: Option<String>,
        /// Training framework that wrote the snapshot
        #[arg(long)]
        framework: Option<String>,
        /// Serialization format of the snapshot
        #[arg(long)]
        format: Option<String>,
    },
    /// Replace a checkpoint's metadata, regardless of its state
    SetMetadata {
        /// Trial ID
        trial_id: i64,
        /// Total batch of the checkpoint
        total_batch: i64,
        /// Replacement metadata as a JSON object
        metadata: String,
    },
    /// Show a checkpoint
    Show {
        /// Trial ID
        trial_id: i64,
        /// Total batch of the checkpoint
        total_batch: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the checkpoint with a given UUID
    Find {
        /// Checkpoint UUID
        uuid: Uuid,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a trial's latest completed checkpoint
    Latest {
        /// Trial ID
        trial_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a trial's checkpoints
    List {
        /// Trial ID
        trial_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Execute checkpoint command
pub fn execute(cmd: CheckpointCommand, config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let trials = SqliteTrialRepository::new(&db);
    let checkpoints = SqliteCheckpointTracker::new(&db, &trials);

    match cmd {
        CheckpointCommand::Add { trial_id, total_batch } => {
            let id = checkpoints
                .add_checkpoint(&Checkpoint::new(trial_id, total_batch))
                .with_context(|| {
                    format!("Failed to add checkpoint of trial {trial_id} at total batch {total_batch}")
                })?;
            println!(
                "{} Added checkpoint {} (trial {}, total batch {})",
                "✓".green(),
                id.to_string().bold(),
                trial_id,
                total_batch
            );
        }
        CheckpointCommand::Update {
            trial_id,
            total_batch,
            state,
            uuid,
            resources,
            metadata,
            framework,
            format,
        } => {
            let patch = CheckpointPatch {
                state,
                uuid,
                resources: resources.as_deref().map(|r| parse_json_object(r, "resources")).transpose()?,
                metadata: metadata.as_deref().map(|m| parse_json_object(m, "metadata")).transpose()?,
                framework,
                format,
            };
            checkpoints.update_checkpoint(trial_id, total_batch, patch).with_context(|| {
                format!("Failed to update checkpoint of trial {trial_id} at total batch {total_batch}")
            })?;
            println!(
                "{} Updated checkpoint (trial {}, total batch {})",
                "✓".green(),
                trial_id,
                total_batch
            );
        }
        CheckpointCommand::SetMetadata { trial_id, total_batch, metadata } => {
            let mut checkpoint = checkpoints.checkpoint_by_total_batch(trial_id, total_batch)?;
            checkpoint.metadata = parse_json_object(&metadata, "metadata")?;
            checkpoints
                .update_checkpoint_metadata(&checkpoint)
                .context("Failed to replace checkpoint metadata")?;
            println!(
                "{} Replaced metadata of checkpoint (trial {}, total batch {})",
                "✓".green(),
                trial_id,
                total_batch
            );
        }
        CheckpointCommand::Show { trial_id, total_batch, json } => {
            show(&checkpoints.checkpoint_by_total_batch(trial_id, total_batch)?, json)?;
        }
        CheckpointCommand::Find { uuid, json } => {
            show(&checkpoints.checkpoint_by_uuid(uuid)?, json)?;
        }
        CheckpointCommand::Latest { trial_id, json } => {
            show(&checkpoints.latest_checkpoint_for_trial(trial_id)?, json)?;
        }
        CheckpointCommand::List { trial_id, json } => {
            let all = checkpoints.checkpoints_for_trial(trial_id)?;
            if json {
                print_json(&all)?;
            } else if all.is_empty() {
                println!("No checkpoints recorded for trial {trial_id}.");
            } else {
                println!("{:<14} {:<10} {:<38} {}", "Total batch", "State", "UUID", "Format");
                println!("{}", "-".repeat(72));
                for checkpoint in &all {
                    println!(
                        "{:<14} {:<10} {:<38} {}",
                        checkpoint.total_batch,
                        colored_state(checkpoint.state),
                        checkpoint.uuid.map_or_else(|| "-".to_string(), |u| u.to_string()),
                        checkpoint.format.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }
    Ok(())
}

fn show(checkpoint: &Checkpoint, json: bool) -> Result<()> {
    if json {
        return print_json(checkpoint);
    }
    let id = checkpoint.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    println!("{} {} of trial {}", "Checkpoint".bold(), id, checkpoint.trial_id);
    println!("  Total batch: {}", checkpoint.total_batch);
    println!("  State:       {}", colored_state(checkpoint.state));
    println!("  Started:     {}", format_time(&checkpoint.start_time));
    println!("  Ended:       {}", format_optional_time(checkpoint.end_time.as_ref()));
    println!(
        "  UUID:        {}",
        checkpoint.uuid.map_or_else(|| "-".to_string(), |u| u.to_string())
    );
    println!("  Framework:   {}", checkpoint.framework.as_deref().unwrap_or("-"));
    println!("  Format:      {}", checkpoint.format.as_deref().unwrap_or("-"));
    println!("  Resources:   {}", format_payload(checkpoint.resources.as_ref()));
    println!("  Metadata:    {}", format_payload(Some(&checkpoint.metadata)));
    println!("  Version:     {}", checkpoint.version);
    Ok(())
}
