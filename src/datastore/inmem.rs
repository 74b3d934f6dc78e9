//! In-memory datastore.
//!
//! Every table lives behind one mutex, so each operation is atomic with
//! respect to all others. Nothing survives the process; `migrate` only
//! records the schema version so callers can treat both backends alike.
//!
//! There is no schema to create, so the store serves reads and writes at
//! version 0 too: straight after `new()` and after `drop_all()`. The SQLite
//! store fails those calls until `migrate` has run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::datastore::datastore_trait::{
    Datastore, HostStore, OsqueryStore, PackStore, PasswordResetStore, QueryStore, SessionStore,
    UserStore,
};
use crate::datastore::migrations;
use crate::error_handling::types::{DatastoreError, DatastoreResult};
use crate::model::{
    Host, Label, LabelQueryExecution, ListOptions, Pack, PasswordResetRequest, Query, Session,
    User,
};
use crate::utils::token;

#[derive(Debug, Default)]
struct Sequences {
    users: u32,
    sessions: u32,
    password_resets: u32,
    queries: u32,
    packs: u32,
    labels: u32,
    label_query_executions: u32,
    hosts: u32,
}

fn next(seq: &mut u32) -> u32 {
    *seq += 1;
    *seq
}

#[derive(Debug, Default)]
struct Tables {
    schema_version: u32,
    seq: Sequences,
    users: BTreeMap<u32, User>,
    sessions: BTreeMap<u32, Session>,
    password_resets: BTreeMap<u32, PasswordResetRequest>,
    queries: BTreeMap<u32, Query>,
    packs: BTreeMap<u32, Pack>,
    /// (pack_id, query_id)
    pack_queries: BTreeSet<(u32, u32)>,
    /// (pack_id, label_id)
    pack_labels: BTreeSet<(u32, u32)>,
    labels: BTreeMap<u32, Label>,
    /// keyed by (label_id, host_id)
    label_query_executions: BTreeMap<(u32, u32), LabelQueryExecution>,
    hosts: BTreeMap<u32, Host>,
}

impl Tables {
    fn require_user(&self, id: u32) -> DatastoreResult<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| DatastoreError::not_found("user", id))
    }

    fn require_query(&self, id: u32) -> DatastoreResult<&Query> {
        self.queries
            .get(&id)
            .ok_or_else(|| DatastoreError::not_found("query", id))
    }

    fn require_pack(&self, id: u32) -> DatastoreResult<&Pack> {
        self.packs
            .get(&id)
            .ok_or_else(|| DatastoreError::not_found("pack", id))
    }

    fn require_label(&self, id: u32) -> DatastoreResult<&Label> {
        self.labels
            .get(&id)
            .ok_or_else(|| DatastoreError::not_found("label", id))
    }

    fn require_host(&self, id: u32) -> DatastoreResult<&Host> {
        self.hosts
            .get(&id)
            .ok_or_else(|| DatastoreError::not_found("host", id))
    }

    /// Rejects a username or email already used by a user other than `except`.
    fn check_user_unique(&self, user: &User, except: Option<u32>) -> DatastoreResult<()> {
        for other in self.users.values() {
            if Some(other.id) == except {
                continue;
            }
            if other.username == user.username {
                return Err(DatastoreError::exists("user", &user.username));
            }
            if other.email == user.email {
                return Err(DatastoreError::exists("user", &user.email));
            }
        }
        Ok(())
    }

    fn check_host_unique(&self, host: &Host, except: Option<u32>) -> DatastoreResult<()> {
        for other in self.hosts.values() {
            if Some(other.id) == except {
                continue;
            }
            if other.uuid == host.uuid {
                return Err(DatastoreError::exists("host", &host.uuid));
            }
            if other.node_key == host.node_key {
                return Err(DatastoreError::exists("host", "node key"));
            }
        }
        Ok(())
    }
}

/// Datastore kept entirely in process memory.
#[derive(Debug, Default)]
pub struct InmemStore {
    tables: Mutex<Tables>,
}

impl InmemStore {
    pub fn new() -> Self {
        info!("In-memory datastore initialized");
        Self::default()
    }

    fn lock(&self) -> DatastoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| DatastoreError::LockPoisoned)
    }
}

impl UserStore for InmemStore {
    fn new_user(&self, user: &User) -> DatastoreResult<User> {
        user.validate()?;
        let mut t = self.lock()?;
        t.check_user_unique(user, None)?;
        let now = Utc::now();
        let mut stored = user.clone();
        stored.id = next(&mut t.seq.users);
        stored.created_at = now;
        stored.updated_at = now;
        t.users.insert(stored.id, stored.clone());
        debug!("Created user {} ({})", stored.id, stored.username);
        Ok(stored)
    }

    fn user(&self, username: &str) -> DatastoreResult<User> {
        let t = self.lock()?;
        t.users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found("user", username))
    }

    fn user_by_id(&self, id: u32) -> DatastoreResult<User> {
        self.lock()?.require_user(id).cloned()
    }

    fn user_by_email(&self, email: &str) -> DatastoreResult<User> {
        let t = self.lock()?;
        t.users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found("user", email))
    }

    fn users(&self, opts: &ListOptions) -> DatastoreResult<Vec<User>> {
        let t = self.lock()?;
        opts.apply(t.users.values().cloned().collect())
    }

    fn save_user(&self, user: &User) -> DatastoreResult<()> {
        user.validate()?;
        let mut t = self.lock()?;
        let created_at = t.require_user(user.id)?.created_at;
        t.check_user_unique(user, Some(user.id))?;
        let mut stored = user.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        t.users.insert(stored.id, stored);
        Ok(())
    }
}

impl QueryStore for InmemStore {
    fn new_query(&self, query: &Query) -> DatastoreResult<Query> {
        query.validate()?;
        let mut t = self.lock()?;
        if t.queries.values().any(|q| q.name == query.name) {
            return Err(DatastoreError::exists("query", &query.name));
        }
        let now = Utc::now();
        let mut stored = query.clone();
        stored.id = next(&mut t.seq.queries);
        stored.created_at = now;
        stored.updated_at = now;
        t.queries.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn save_query(&self, query: &Query) -> DatastoreResult<()> {
        query.validate()?;
        let mut t = self.lock()?;
        let created_at = t.require_query(query.id)?.created_at;
        if t
            .queries
            .values()
            .any(|q| q.id != query.id && q.name == query.name)
        {
            return Err(DatastoreError::exists("query", &query.name));
        }
        let mut stored = query.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        t.queries.insert(stored.id, stored);
        Ok(())
    }

    fn delete_query(&self, id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.queries
            .remove(&id)
            .ok_or_else(|| DatastoreError::not_found("query", id))?;
        t.pack_queries.retain(|&(_, query_id)| query_id != id);
        Ok(())
    }

    fn query(&self, id: u32) -> DatastoreResult<Query> {
        self.lock()?.require_query(id).cloned()
    }

    fn queries(&self, opts: &ListOptions) -> DatastoreResult<Vec<Query>> {
        let t = self.lock()?;
        opts.apply(t.queries.values().cloned().collect())
    }
}

impl PackStore for InmemStore {
    fn new_pack(&self, pack: &Pack) -> DatastoreResult<Pack> {
        pack.validate()?;
        let mut t = self.lock()?;
        if t.packs.values().any(|p| p.name == pack.name) {
            return Err(DatastoreError::exists("pack", &pack.name));
        }
        let now = Utc::now();
        let mut stored = pack.clone();
        stored.id = next(&mut t.seq.packs);
        stored.created_at = now;
        stored.updated_at = now;
        t.packs.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn save_pack(&self, pack: &Pack) -> DatastoreResult<()> {
        pack.validate()?;
        let mut t = self.lock()?;
        let created_at = t.require_pack(pack.id)?.created_at;
        if t.packs.values().any(|p| p.id != pack.id && p.name == pack.name) {
            return Err(DatastoreError::exists("pack", &pack.name));
        }
        let mut stored = pack.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        t.packs.insert(stored.id, stored);
        Ok(())
    }

    fn delete_pack(&self, id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.packs
            .remove(&id)
            .ok_or_else(|| DatastoreError::not_found("pack", id))?;
        t.pack_queries.retain(|&(pack_id, _)| pack_id != id);
        t.pack_labels.retain(|&(pack_id, _)| pack_id != id);
        Ok(())
    }

    fn pack(&self, id: u32) -> DatastoreResult<Pack> {
        self.lock()?.require_pack(id).cloned()
    }

    fn packs(&self, opts: &ListOptions) -> DatastoreResult<Vec<Pack>> {
        let t = self.lock()?;
        opts.apply(t.packs.values().cloned().collect())
    }

    fn add_query_to_pack(&self, query_id: u32, pack_id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.require_query(query_id)?;
        t.require_pack(pack_id)?;
        t.pack_queries.insert((pack_id, query_id));
        Ok(())
    }

    fn queries_in_pack(&self, pack_id: u32) -> DatastoreResult<Vec<Query>> {
        let t = self.lock()?;
        t.require_pack(pack_id)?;
        Ok(t.pack_queries
            .range((pack_id, 0)..=(pack_id, u32::MAX))
            .filter_map(|(_, query_id)| t.queries.get(query_id).cloned())
            .collect())
    }

    fn remove_query_from_pack(&self, query_id: u32, pack_id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        if t.pack_queries.remove(&(pack_id, query_id)) {
            Ok(())
        } else {
            Err(DatastoreError::not_found(
                "pack query",
                format!("{}/{}", pack_id, query_id),
            ))
        }
    }

    fn add_label_to_pack(&self, label_id: u32, pack_id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.require_label(label_id)?;
        t.require_pack(pack_id)?;
        t.pack_labels.insert((pack_id, label_id));
        Ok(())
    }

    fn labels_for_pack(&self, pack_id: u32) -> DatastoreResult<Vec<Label>> {
        let t = self.lock()?;
        t.require_pack(pack_id)?;
        Ok(t.pack_labels
            .range((pack_id, 0)..=(pack_id, u32::MAX))
            .filter_map(|(_, label_id)| t.labels.get(label_id).cloned())
            .collect())
    }

    fn remove_label_from_pack(&self, label_id: u32, pack_id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        if t.pack_labels.remove(&(pack_id, label_id)) {
            Ok(())
        } else {
            Err(DatastoreError::not_found(
                "pack label",
                format!("{}/{}", pack_id, label_id),
            ))
        }
    }
}

impl OsqueryStore for InmemStore {
    fn new_label(&self, label: &Label) -> DatastoreResult<Label> {
        label.validate()?;
        let mut t = self.lock()?;
        if t.labels.values().any(|l| l.name == label.name) {
            return Err(DatastoreError::exists("label", &label.name));
        }
        let now = Utc::now();
        let mut stored = label.clone();
        stored.id = next(&mut t.seq.labels);
        stored.created_at = now;
        stored.updated_at = now;
        t.labels.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn label(&self, id: u32) -> DatastoreResult<Label> {
        self.lock()?.require_label(id).cloned()
    }

    fn labels(&self, opts: &ListOptions) -> DatastoreResult<Vec<Label>> {
        let t = self.lock()?;
        opts.apply(t.labels.values().cloned().collect())
    }

    fn delete_label(&self, id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.labels
            .remove(&id)
            .ok_or_else(|| DatastoreError::not_found("label", id))?;
        t.label_query_executions
            .retain(|&(label_id, _), _| label_id != id);
        t.pack_labels.retain(|&(_, label_id)| label_id != id);
        Ok(())
    }

    fn label_queries_for_host(
        &self,
        host_id: u32,
        cutoff: DateTime<Utc>,
    ) -> DatastoreResult<BTreeMap<u32, String>> {
        let t = self.lock()?;
        let host = t.require_host(host_id)?;
        let queries = t
            .labels
            .values()
            .filter(|label| label.applies_to(&host.platform))
            .filter(|label| {
                t.label_query_executions
                    .get(&(label.id, host_id))
                    .map_or(true, |exec| exec.updated_at < cutoff)
            })
            .map(|label| (label.id, label.query.clone()))
            .collect();
        Ok(queries)
    }

    fn record_label_query_executions(
        &self,
        host_id: u32,
        results: &BTreeMap<u32, bool>,
        at: DateTime<Utc>,
    ) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.require_host(host_id)?;
        // validate the whole batch before touching anything
        for label_id in results.keys() {
            t.require_label(*label_id)?;
        }
        for (&label_id, &matches) in results {
            let existing = t
                .label_query_executions
                .get(&(label_id, host_id))
                .map(|exec| exec.id);
            let id = match existing {
                Some(id) => id,
                None => next(&mut t.seq.label_query_executions),
            };
            t.label_query_executions.insert(
                (label_id, host_id),
                LabelQueryExecution {
                    id,
                    updated_at: at,
                    matches,
                    label_id,
                    host_id,
                },
            );
        }
        debug!(
            "Recorded {} label execution(s) for host {}",
            results.len(),
            host_id
        );
        Ok(())
    }

    fn labels_for_host(&self, host_id: u32) -> DatastoreResult<Vec<Label>> {
        let t = self.lock()?;
        t.require_host(host_id)?;
        Ok(t.labels
            .values()
            .filter(|label| {
                t.label_query_executions
                    .get(&(label.id, host_id))
                    .is_some_and(|exec| exec.matches)
            })
            .cloned()
            .collect())
    }
}

impl HostStore for InmemStore {
    fn new_host(&self, host: &Host) -> DatastoreResult<Host> {
        host.validate()?;
        let mut t = self.lock()?;
        t.check_host_unique(host, None)?;
        let now = Utc::now();
        let mut stored = host.clone();
        stored.id = next(&mut t.seq.hosts);
        stored.created_at = now;
        stored.updated_at = now;
        t.hosts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn save_host(&self, host: &Host) -> DatastoreResult<()> {
        host.validate()?;
        let mut t = self.lock()?;
        let created_at = t.require_host(host.id)?.created_at;
        t.check_host_unique(host, Some(host.id))?;
        let mut stored = host.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        t.hosts.insert(stored.id, stored);
        Ok(())
    }

    fn delete_host(&self, id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.hosts
            .remove(&id)
            .ok_or_else(|| DatastoreError::not_found("host", id))?;
        t.label_query_executions
            .retain(|&(_, host_id), _| host_id != id);
        Ok(())
    }

    fn host(&self, id: u32) -> DatastoreResult<Host> {
        self.lock()?.require_host(id).cloned()
    }

    fn hosts(&self, opts: &ListOptions) -> DatastoreResult<Vec<Host>> {
        let t = self.lock()?;
        opts.apply(t.hosts.values().cloned().collect())
    }

    fn enroll_host(
        &self,
        uuid: &str,
        host_name: &str,
        ip: &str,
        platform: &str,
        node_key_size: usize,
    ) -> DatastoreResult<Host> {
        if uuid.trim().is_empty() {
            return Err(DatastoreError::invalid("cannot enroll a host without a uuid"));
        }
        if node_key_size == 0 {
            return Err(DatastoreError::invalid("node key size must be positive"));
        }
        let node_key = token::random_text(node_key_size);
        let now = Utc::now();
        let mut t = self.lock()?;

        let existing = t.hosts.values().find(|h| h.uuid == uuid).map(|h| h.id);
        let host = match existing {
            Some(id) => {
                let host = t
                    .hosts
                    .get_mut(&id)
                    .ok_or_else(|| DatastoreError::not_found("host", id))?;
                host.node_key = node_key;
                host.host_name = host_name.to_string();
                host.primary_ip = ip.to_string();
                host.platform = platform.to_string();
                host.updated_at = now;
                info!("Re-enrolled host {} ({})", host.id, uuid);
                host.clone()
            }
            None => {
                let host = Host {
                    id: next(&mut t.seq.hosts),
                    created_at: now,
                    updated_at: now,
                    detail_update_time: DateTime::<Utc>::default(),
                    seen_time: now,
                    node_key,
                    host_name: host_name.to_string(),
                    uuid: uuid.to_string(),
                    platform: platform.to_string(),
                    primary_ip: ip.to_string(),
                    ..Default::default()
                };
                t.hosts.insert(host.id, host.clone());
                info!("Enrolled host {} ({})", host.id, uuid);
                host
            }
        };
        Ok(host)
    }

    fn authenticate_host(&self, node_key: &str) -> DatastoreResult<Host> {
        let t = self.lock()?;
        t.hosts
            .values()
            .find(|h| h.node_key == node_key)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found("host", "node key"))
    }

    fn mark_host_seen(&self, host_id: u32, at: DateTime<Utc>) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        let host = t
            .hosts
            .get_mut(&host_id)
            .ok_or_else(|| DatastoreError::not_found("host", host_id))?;
        host.seen_time = at;
        host.updated_at = at;
        Ok(())
    }
}

impl PasswordResetStore for InmemStore {
    fn new_password_reset_request(
        &self,
        req: &PasswordResetRequest,
    ) -> DatastoreResult<PasswordResetRequest> {
        let mut t = self.lock()?;
        t.require_user(req.user_id)?;
        let now = Utc::now();
        let mut stored = req.clone();
        stored.id = next(&mut t.seq.password_resets);
        stored.created_at = now;
        stored.updated_at = now;
        t.password_resets.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn save_password_reset_request(&self, req: &PasswordResetRequest) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.require_user(req.user_id)?;
        let created_at = t
            .password_resets
            .get(&req.id)
            .map(|r| r.created_at)
            .ok_or_else(|| DatastoreError::not_found("password reset request", req.id))?;
        let mut stored = req.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        t.password_resets.insert(stored.id, stored);
        Ok(())
    }

    fn delete_password_reset_request(&self, id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.password_resets
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DatastoreError::not_found("password reset request", id))
    }

    fn delete_password_reset_requests_for_user(&self, user_id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.password_resets.retain(|_, r| r.user_id != user_id);
        Ok(())
    }

    fn find_password_reset_by_id(&self, id: u32) -> DatastoreResult<PasswordResetRequest> {
        let t = self.lock()?;
        t.password_resets
            .get(&id)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found("password reset request", id))
    }

    fn find_password_resets_by_user_id(
        &self,
        user_id: u32,
    ) -> DatastoreResult<Vec<PasswordResetRequest>> {
        let t = self.lock()?;
        Ok(t.password_resets
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    fn find_password_reset_by_token(&self, token: &str) -> DatastoreResult<PasswordResetRequest> {
        let t = self.lock()?;
        t.password_resets
            .values()
            .find(|r| r.token == token)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found("password reset request", "token"))
    }

    fn find_password_reset_by_token_and_user_id(
        &self,
        token: &str,
        user_id: u32,
    ) -> DatastoreResult<PasswordResetRequest> {
        let t = self.lock()?;
        t.password_resets
            .values()
            .find(|r| r.token == token && r.user_id == user_id)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found("password reset request", "token"))
    }
}

impl SessionStore for InmemStore {
    fn find_session_by_key(&self, key: &str) -> DatastoreResult<Session> {
        let t = self.lock()?;
        t.sessions
            .values()
            .find(|s| s.key == key)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found("session", "key"))
    }

    fn find_session_by_id(&self, id: u32) -> DatastoreResult<Session> {
        let t = self.lock()?;
        t.sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| DatastoreError::not_found("session", id))
    }

    fn find_all_sessions_for_user(&self, user_id: u32) -> DatastoreResult<Vec<Session>> {
        let t = self.lock()?;
        Ok(t.sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    fn new_session(&self, session: &Session) -> DatastoreResult<Session> {
        if session.key.is_empty() {
            return Err(DatastoreError::invalid("session key must not be empty"));
        }
        let mut t = self.lock()?;
        t.require_user(session.user_id)?;
        if t.sessions.values().any(|s| s.key == session.key) {
            return Err(DatastoreError::exists("session", "key"));
        }
        let now = Utc::now();
        let mut stored = session.clone();
        stored.id = next(&mut t.seq.sessions);
        stored.created_at = now;
        stored.accessed_at = now;
        t.sessions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn destroy_session(&self, id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.sessions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DatastoreError::not_found("session", id))
    }

    fn destroy_all_sessions_for_user(&self, user_id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        t.sessions.retain(|_, s| s.user_id != user_id);
        Ok(())
    }

    fn mark_session_accessed(&self, id: u32) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        let session = t
            .sessions
            .get_mut(&id)
            .ok_or_else(|| DatastoreError::not_found("session", id))?;
        session.accessed_at = Utc::now();
        Ok(())
    }
}

impl Datastore for InmemStore {
    fn name(&self) -> &'static str {
        "inmem"
    }

    fn drop_all(&self) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        *t = Tables::default();
        info!("In-memory datastore dropped");
        Ok(())
    }

    fn migrate(&self) -> DatastoreResult<()> {
        let mut t = self.lock()?;
        let latest = migrations::latest_version();
        if t.schema_version < latest {
            info!(
                "In-memory datastore migrated from version {} to {}",
                t.schema_version, latest
            );
            t.schema_version = latest;
        }
        Ok(())
    }

    fn schema_version(&self) -> DatastoreResult<u32> {
        Ok(self.lock()?.schema_version)
    }
}
