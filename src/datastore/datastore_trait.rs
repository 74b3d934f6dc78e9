//! Datastore traits
//!
//! This module defines the seven capability traits that make up the Kolide
//! data access layer, and the `Datastore` trait that ties them together with
//! lifecycle management.
//!
//! Implementors are responsible for:
//! - Assigning ids and creation timestamps to new records
//! - Enforcing uniqueness (`DatastoreError::Exists`)
//! - Reporting missing records (`DatastoreError::NotFound`)
//! - Removing dependent links when a record is deleted
//!
//! All methods return a `Result` to handle potential storage errors.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error_handling::types::DatastoreResult;
use crate::model::{
    Host, Label, ListOptions, Pack, PasswordResetRequest, Query, Session, User,
};

pub trait UserStore {
    fn new_user(&self, user: &User) -> DatastoreResult<User>;
    fn user(&self, username: &str) -> DatastoreResult<User>;
    fn user_by_id(&self, id: u32) -> DatastoreResult<User>;
    fn user_by_email(&self, email: &str) -> DatastoreResult<User>;
    fn users(&self, opts: &ListOptions) -> DatastoreResult<Vec<User>>;
    /// Replaces the stored user with the same id and bumps `updated_at`.
    fn save_user(&self, user: &User) -> DatastoreResult<()>;
}

pub trait QueryStore {
    fn new_query(&self, query: &Query) -> DatastoreResult<Query>;
    fn save_query(&self, query: &Query) -> DatastoreResult<()>;
    /// Deletes the query and detaches it from every pack.
    fn delete_query(&self, id: u32) -> DatastoreResult<()>;
    fn query(&self, id: u32) -> DatastoreResult<Query>;
    fn queries(&self, opts: &ListOptions) -> DatastoreResult<Vec<Query>>;
}

pub trait PackStore {
    fn new_pack(&self, pack: &Pack) -> DatastoreResult<Pack>;
    fn save_pack(&self, pack: &Pack) -> DatastoreResult<()>;
    /// Deletes the pack together with its query and label links.
    fn delete_pack(&self, id: u32) -> DatastoreResult<()>;
    fn pack(&self, id: u32) -> DatastoreResult<Pack>;
    fn packs(&self, opts: &ListOptions) -> DatastoreResult<Vec<Pack>>;

    /// Links a query to a pack. Linking twice is not an error.
    fn add_query_to_pack(&self, query_id: u32, pack_id: u32) -> DatastoreResult<()>;
    fn queries_in_pack(&self, pack_id: u32) -> DatastoreResult<Vec<Query>>;
    fn remove_query_from_pack(&self, query_id: u32, pack_id: u32) -> DatastoreResult<()>;

    /// Targets a pack at a label. Linking twice is not an error.
    fn add_label_to_pack(&self, label_id: u32, pack_id: u32) -> DatastoreResult<()>;
    fn labels_for_pack(&self, pack_id: u32) -> DatastoreResult<Vec<Label>>;
    fn remove_label_from_pack(&self, label_id: u32, pack_id: u32) -> DatastoreResult<()>;
}

/// Label definitions and the per-host state of label queries.
pub trait OsqueryStore {
    fn new_label(&self, label: &Label) -> DatastoreResult<Label>;
    fn label(&self, id: u32) -> DatastoreResult<Label>;
    fn labels(&self, opts: &ListOptions) -> DatastoreResult<Vec<Label>>;
    fn delete_label(&self, id: u32) -> DatastoreResult<()>;

    /// Returns the label queries the host should run, keyed by label id.
    ///
    /// A label is included when it applies to the host's platform and its
    /// last execution on the host is missing or older than `cutoff`.
    fn label_queries_for_host(
        &self,
        host_id: u32,
        cutoff: DateTime<Utc>,
    ) -> DatastoreResult<BTreeMap<u32, String>>;

    /// Records label query results for a host. Either every result is stored
    /// or none is.
    fn record_label_query_executions(
        &self,
        host_id: u32,
        results: &BTreeMap<u32, bool>,
        at: DateTime<Utc>,
    ) -> DatastoreResult<()>;

    /// Labels whose latest execution on the host matched.
    fn labels_for_host(&self, host_id: u32) -> DatastoreResult<Vec<Label>>;
}

pub trait HostStore {
    fn new_host(&self, host: &Host) -> DatastoreResult<Host>;
    fn save_host(&self, host: &Host) -> DatastoreResult<()>;
    fn delete_host(&self, id: u32) -> DatastoreResult<()>;
    fn host(&self, id: u32) -> DatastoreResult<Host>;
    fn hosts(&self, opts: &ListOptions) -> DatastoreResult<Vec<Host>>;

    /// Enrolls a host, or re-enrolls it when `uuid` is already known, issuing
    /// a fresh node key of `node_key_size` random bytes.
    fn enroll_host(
        &self,
        uuid: &str,
        host_name: &str,
        ip: &str,
        platform: &str,
        node_key_size: usize,
    ) -> DatastoreResult<Host>;
    fn authenticate_host(&self, node_key: &str) -> DatastoreResult<Host>;
    fn mark_host_seen(&self, host_id: u32, at: DateTime<Utc>) -> DatastoreResult<()>;
}

pub trait PasswordResetStore {
    fn new_password_reset_request(
        &self,
        req: &PasswordResetRequest,
    ) -> DatastoreResult<PasswordResetRequest>;
    fn save_password_reset_request(&self, req: &PasswordResetRequest) -> DatastoreResult<()>;
    fn delete_password_reset_request(&self, id: u32) -> DatastoreResult<()>;
    fn delete_password_reset_requests_for_user(&self, user_id: u32) -> DatastoreResult<()>;
    fn find_password_reset_by_id(&self, id: u32) -> DatastoreResult<PasswordResetRequest>;
    fn find_password_resets_by_user_id(
        &self,
        user_id: u32,
    ) -> DatastoreResult<Vec<PasswordResetRequest>>;
    fn find_password_reset_by_token(&self, token: &str) -> DatastoreResult<PasswordResetRequest>;
    fn find_password_reset_by_token_and_user_id(
        &self,
        token: &str,
        user_id: u32,
    ) -> DatastoreResult<PasswordResetRequest>;
}

pub trait SessionStore {
    fn find_session_by_key(&self, key: &str) -> DatastoreResult<Session>;
    fn find_session_by_id(&self, id: u32) -> DatastoreResult<Session>;
    fn find_all_sessions_for_user(&self, user_id: u32) -> DatastoreResult<Vec<Session>>;
    fn new_session(&self, session: &Session) -> DatastoreResult<Session>;
    fn destroy_session(&self, id: u32) -> DatastoreResult<()>;
    fn destroy_all_sessions_for_user(&self, user_id: u32) -> DatastoreResult<()>;
    fn mark_session_accessed(&self, id: u32) -> DatastoreResult<()>;
}

/// The complete Kolide data access layer.
///
/// A backend must provide every capability trait plus identity and schema
/// lifecycle. The trait is object safe so a backend can be chosen at runtime
/// and shared as `Arc<dyn Datastore>`.
pub trait Datastore:
    UserStore
    + QueryStore
    + PackStore
    + OsqueryStore
    + HostStore
    + PasswordResetStore
    + SessionStore
    + Send
    + Sync
{
    /// Identifies the storage technology behind this datastore.
    fn name(&self) -> &'static str;

    /// Erases all persisted state, schema metadata included.
    fn drop_all(&self) -> DatastoreResult<()>;

    /// Brings the persisted schema up to the version this build expects.
    fn migrate(&self) -> DatastoreResult<()>;

    /// Highest schema version applied so far, 0 when nothing is migrated.
    fn schema_version(&self) -> DatastoreResult<u32>;
}
