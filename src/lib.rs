pub mod configuration;
pub mod datastore;
pub mod error_handling;
pub mod model;
pub mod utils;

pub use datastore::Datastore;
pub use error_handling::{DatastoreError, DatastoreResult};
