use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;

/// Storage technology behind the datastore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Inmem,
    Sqlite,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Inmem => write!(f, "inmem"),
            Backend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inmem" | "memory" => Ok(Backend::Inmem),
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(ConfigError::Invalid(format!("unknown backend '{}'", other))),
        }
    }
}

/// `[datastore]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub backend: Backend,
    /// Database file for the sqlite backend, `:memory:` for a private
    /// in-memory database.
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Inmem,
            path: PathBuf::from("kolide.db"),
            max_connections: 5,
        }
    }
}

/// `[auth]` table. Sizes are in random bytes before encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub node_key_size: usize,
    pub session_key_size: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            node_key_size: 24,
            session_key_size: 64,
        }
    }
}

impl AuthConfig {
    /// Fresh session key of `session_key_size` random bytes.
    pub fn generate_session_key(&self) -> String {
        crate::utils::token::random_text(self.session_key_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        log::LevelFilter::from_str(&self.level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}
