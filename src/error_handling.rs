//! Error types shared by configuration loading and every datastore backend.

pub mod types;

pub use types::{ConfigError, DatastoreError, DatastoreResult};
