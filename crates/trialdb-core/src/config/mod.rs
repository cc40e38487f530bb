//! Configuration for the training ledger.
//!
//! Settings are read from TOML. Every field has a default so an empty file,
//! or no file at all, yields a working configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming a configuration file to load.
pub const CONFIG_ENV_VAR: &str = "TRIALDB_CONFIG";

/// Local configuration file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "trialdb.toml";

/// Store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// How long a writer waits for the database lock before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_path() -> PathBuf {
    PathBuf::from("trialdb.sqlite3")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_path(), busy_timeout_ms: default_busy_timeout_ms() }
    }
}

/// Rules applied when validations are added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Require a completed step ending at the validation's total batch.
    #[serde(default = "default_true")]
    pub require_completed_step: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { require_completed_step: true }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read or write the configuration file.
    #[error("Failed to access configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl Config {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_toml_str(&content)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|source| ConfigError::Io { path: parent.display().to_string(), source })?;
        }
        std::fs::write(path, content)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })
    }

    /// Loads the first configuration found.
    ///
    /// Precedence:
    /// 1. File named by `TRIALDB_CONFIG`
    /// 2. `./trialdb.toml`
    /// 3. Defaults
    pub fn discover_and_load() -> ConfigResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from_file(Path::new(&path));
        }
        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load_from_file(local);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.database.path, PathBuf::from("trialdb.sqlite3"));
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert!(config.validation.require_completed_step);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_from_toml_overrides() {
        let config = Config::from_toml_str(
            r#"
            [database]
            path = "/var/lib/trialdb/ledger.sqlite3"
            busy_timeout_ms = 250

            [validation]
            require_completed_step = false
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/trialdb/ledger.sqlite3"));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert!(!config.validation.require_completed_step);
    }

    #[test]
    fn test_config_partial_section_keeps_defaults() {
        let config = Config::from_toml_str("[database]\nbusy_timeout_ms = 10\n").unwrap();
        assert_eq!(config.database.path, PathBuf::from("trialdb.sqlite3"));
        assert!(config.validation.require_completed_step);
    }

    #[test]
    fn test_config_invalid_toml() {
        let err = Config::from_toml_str("[database\npath = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_config_load_missing_file() {
        let err = Config::load_from_file(Path::new("/nonexistent/trialdb.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("trialdb.toml");
        let mut config = Config::default();
        config.database.busy_timeout_ms = 42;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
