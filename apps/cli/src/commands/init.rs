//! Init command implementation.
//!
//! Creates the ledger database and, optionally, a local configuration file.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use tracing::info;
use trialdb_core::Config;
use trialdb_core::config::LOCAL_CONFIG_FILE;

use super::open_database;

/// Execute the init command.
pub fn execute(config: &Config, write_config: bool) -> Result<()> {
    open_database(config)?;
    info!(path = %config.database.path.display(), "Ledger ready");
    println!(
        "{} Initialized ledger at {}",
        "✓".green(),
        config.database.path.display().to_string().bold()
    );

    if write_config {
        let path = Path::new(LOCAL_CONFIG_FILE);
        if path.exists() {
            bail!("{LOCAL_CONFIG_FILE} already exists; refusing to overwrite it");
        }
        config.save_to_file(path).context("Failed to write configuration")?;
        println!("{} Wrote {}", "✓".green(), LOCAL_CONFIG_FILE.bold());
    }
    Ok(())
}
