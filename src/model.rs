//! Records persisted by the datastore.
//!
//! Every record carries a numeric `id` assigned by the backend on creation.

pub mod host;
pub mod label;
pub mod list_options;
pub mod pack;
pub mod password_reset;
pub mod query;
pub mod session;
pub mod user;

pub use host::Host;
pub use label::{Label, LabelQueryExecution};
pub use list_options::{ListOptions, OrderDirection};
pub use pack::Pack;
pub use password_reset::PasswordResetRequest;
pub use query::Query;
pub use session::Session;
pub use user::User;
