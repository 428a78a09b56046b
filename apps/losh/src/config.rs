//! # Configuration
//!
//! `losh.toml` settings with defaults for everything. Resolution order,
//! lowest to highest: built-in defaults, the config file, `LOSH_*`
//! environment variables, command-line flags.

use losh_core::LoshError;
use losh_core::primitives::MAX_IMPORT_BYTES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "losh.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Tool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoshConfig {
    /// Path to the redb database file.
    pub database: PathBuf,
    pub log_format: LogFormat,
    /// `tracing` filter directive, used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Indent exported JSON.
    pub pretty_json: bool,
    /// Largest JSON file `import` and `order` will read.
    pub max_import_bytes: u64,
}

impl Default for LoshConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("losh.redb"),
            log_format: LogFormat::Text,
            log_filter: "losh=info,losh_core=info".to_string(),
            pretty_json: true,
            max_import_bytes: MAX_IMPORT_BYTES,
        }
    }
}

fn config_error(message: String) -> LoshError {
    LoshError::InvalidInput(message)
}

impl LoshConfig {
    /// Load settings.
    ///
    /// An explicit path must exist. Without one, `losh.toml` in the working
    /// directory is used if present, defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, LoshError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self, LoshError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
            .map_err(|e| config_error(format!("failed to parse {}: {e}", path.display())))
    }

    pub fn from_toml(contents: &str) -> Result<Self, LoshError> {
        toml::from_str(contents).map_err(|e| config_error(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, LoshError> {
        toml::to_string(self).map_err(|e| LoshError::SerializationError(e.to_string()))
    }

    /// Apply `LOSH_DATABASE` and `LOSH_LOG_FORMAT` from `lookup`.
    ///
    /// Unrecognised log formats are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(database) = lookup("LOSH_DATABASE").filter(|v| !v.is_empty()) {
            self.database = PathBuf::from(database);
        }
        match lookup("LOSH_LOG_FORMAT").as_deref() {
            Some("json") => self.log_format = LogFormat::Json,
            Some("text") => self.log_format = LogFormat::Text,
            _ => {}
        }
    }

    /// Write the settings to `path`. Refuses to overwrite unless `force`.
    pub fn write(&self, path: &Path, force: bool) -> Result<(), LoshError> {
        if path.exists() && !force {
            return Err(LoshError::InvalidInput(format!(
                "{} already exists. Use --force to overwrite.",
                path.display()
            )));
        }
        fs::write(path, self.to_toml()?)
            .map_err(|e| LoshError::IoError(format!("failed to write {}: {e}", path.display())))
    }
}
