use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Errors returned by configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned by every datastore backend.
#[derive(Debug, Error)]
pub enum DatastoreError {
    /// The requested record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with the same unique key already exists.
    #[error("{kind} already exists: {id}")]
    Exists { kind: &'static str, id: String },

    /// The caller supplied a record or argument that cannot be stored.
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("password does not match")]
    InvalidPassword,

    #[error("password hashing failed: {0}")]
    Password(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("datastore lock poisoned")]
    LockPoisoned,

    #[error("async runtime error: {0}")]
    Runtime(String),
}

impl DatastoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn exists(kind: &'static str, id: impl ToString) -> Self {
        Self::Exists {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, Self::Exists { .. })
    }

    /// Maps a database error to `Exists` when it is a UNIQUE violation.
    pub(crate) fn from_insert(err: DbErr, kind: &'static str, id: impl ToString) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Self::exists(kind, id),
            _ => Self::Database(err),
        }
    }
}

pub type DatastoreResult<T> = Result<T, DatastoreError>;
