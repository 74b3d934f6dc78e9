use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use super::types::*;
use crate::error_handling::types::ConfigError;

pub const ENV_BACKEND: &str = "KOLIDE_DATASTORE_BACKEND";
pub const ENV_PATH: &str = "KOLIDE_DATASTORE_PATH";

/// Runtime configuration of the kolide binary.
///
/// Every table and field is optional in the TOML file; missing values take
/// their defaults.
///
/// ```toml
/// [datastore]
/// backend = "sqlite"
/// path = "/var/lib/kolide/kolide.db"
/// max_connections = 5
///
/// [auth]
/// node_key_size = 24
/// session_key_size = 64
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub datastore: DatastoreConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reads and validates a TOML configuration file, then applies
    /// environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        debug!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Overrides datastore settings from `KOLIDE_DATASTORE_BACKEND` and
    /// `KOLIDE_DATASTORE_PATH`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(backend) = env::var(ENV_BACKEND) {
            self.datastore.backend = backend.parse()?;
        }
        if let Ok(path) = env::var(ENV_PATH) {
            self.datastore.path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.node_key_size == 0 {
            return Err(ConfigError::Invalid("auth.node_key_size must be positive".into()));
        }
        if self.auth.session_key_size == 0 {
            return Err(ConfigError::Invalid(
                "auth.session_key_size must be positive".into(),
            ));
        }
        if self.datastore.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "datastore.max_connections must be positive".into(),
            ));
        }
        if self.datastore.backend == Backend::Sqlite && self.datastore.path.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid(
                "datastore.path is required for the sqlite backend".into(),
            ));
        }
        self.logging.level_filter()?;
        Ok(())
    }
}
