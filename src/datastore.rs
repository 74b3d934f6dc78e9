//! Datastore subsystem
//!
//! Components:
//! - `datastore_trait`: the capability traits and the composite `Datastore`.
//! - `inmem`: mutex-guarded in-memory backend.
//! - `sqlite`: SeaORM backend persisting to a SQLite file.
//! - `migrations`: versioned schema for the SQL backend.
//! - `db_entities`: SeaORM entity models for the SQL backend.

use std::sync::Arc;

use log::info;

pub mod datastore_trait;
pub mod db_entities;
pub mod inmem;
pub mod migrations;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod conformance;

pub use datastore_trait::{
    Datastore, HostStore, OsqueryStore, PackStore, PasswordResetStore, QueryStore, SessionStore,
    UserStore,
};
pub use inmem::InmemStore;
pub use sqlite::SqliteStore;

use crate::configuration::types::{Backend, DatastoreConfig};
use crate::error_handling::types::DatastoreResult;

/// Opens the backend selected by `config`. The schema is left as found.
pub fn open(config: &DatastoreConfig) -> DatastoreResult<Arc<dyn Datastore>> {
    let ds: Arc<dyn Datastore> = match config.backend {
        Backend::Inmem => Arc::new(InmemStore::new()),
        Backend::Sqlite => Arc::new(SqliteStore::open(&config.path, config.max_connections)?),
    };
    info!("Using {} datastore", ds.name());
    Ok(ds)
}
