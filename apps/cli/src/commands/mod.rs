//! Command implementations for the trialdb CLI.

pub mod checkpoint;
pub mod init;
pub mod step;
pub mod trial;
pub mod validation;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use colored::{ColoredString, Colorize};
use serde::Serialize;
use trialdb_core::{Config, Database, JsonObj, RunState};

/// Opens the configured ledger database, creating its schema if needed.
pub fn open_database(config: &Config) -> Result<Database> {
    Database::open_with_config(&config.database).with_context(|| {
        format!("Failed to open ledger database at {}", config.database.path.display())
    })
}

/// Parses a JSON object argument such as `--metrics '{"loss": 0.1}'`.
pub fn parse_json_object(raw: &str, what: &str) -> Result<JsonObj> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("Invalid {what} JSON"))?;
    match value {
        serde_json::Value::Object(obj) => Ok(obj),
        other => bail!("{what} must be a JSON object, got {other}"),
    }
}

/// Pretty-prints `value` as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn colored_state(state: RunState) -> ColoredString {
    match state {
        RunState::Active => state.as_str().cyan(),
        RunState::Completed => state.as_str().green(),
        RunState::Error => state.as_str().red(),
    }
}

pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn format_optional_time(ts: Option<&DateTime<Utc>>) -> String {
    ts.map_or_else(|| "-".to_string(), format_time)
}

pub fn format_payload(obj: Option<&JsonObj>) -> String {
    match obj {
        Some(obj) if !obj.is_empty() => serde_json::Value::Object(obj.clone()).to_string(),
        _ => "-".to_string(),
    }
}
