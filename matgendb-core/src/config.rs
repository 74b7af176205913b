//! Database configuration
//!
//! A configuration names the data directory, the database and the task
//! collection, and optionally an alias file. Files ending in `.toml` are
//! TOML, anything else is JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Connection settings for a task database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Directory holding one sub-directory per database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Database name
    #[serde(default = "default_database")]
    pub database: String,
    /// Task collection name
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Optional alias/default-criteria file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases_config: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./mgdb-data")
}

fn default_database() -> String {
    "vasp".to_string()
}

fn default_collection() -> String {
    "tasks".to_string()
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: default_database(),
            collection: default_collection(),
            aliases_config: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Format {
    Toml,
    Json,
}

fn format_of(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
        _ => Format::Json,
    }
}

impl DbConfig {
    /// Load and validate a configuration file.
    /// A relative `aliases_config` is resolved against the config file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let mut config: DbConfig = match format_of(path) {
            Format::Toml => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            Format::Json => {
                serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
            }
        };

        if let (Some(aliases), Some(parent)) = (&config.aliases_config, path.parent()) {
            if aliases.is_relative() {
                config.aliases_config = Some(parent.join(aliases));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        self.validate()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = match format_of(path) {
            Format::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuration written to {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".to_string()));
        }
        for (field, value) in [("database", &self.database), ("collection", &self.collection)] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
            }
            if value.contains(['/', '\\']) || value.starts_with('.') {
                return Err(ConfigError::Invalid(format!(
                    "{} {:?} is not a valid name",
                    field, value
                )));
            }
        }
        Ok(())
    }
}
