//! SQLite datastore built on SeaORM.
//!
//! The `Datastore` traits are synchronous, so the store owns a small tokio
//! runtime and blocks on each database future. The schema comes from
//! `migrations` and is only created by `migrate`.
//!
//! Reads use any pooled connection. Writes are serialised by a mutex, and
//! multi-statement writes run in one transaction.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, DbBackend, DbErr, EntityTrait, JoinType, NotSet, Order, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait, Set, Statement, TransactionTrait,
};

use crate::datastore::datastore_trait::{
    Datastore, HostStore, OsqueryStore, PackStore, PasswordResetStore, QueryStore, SessionStore,
    UserStore,
};
use crate::datastore::db_entities::{
    hosts, label_query_executions, labels, pack_labels, pack_queries, packs,
    password_reset_requests, queries, sessions, users,
};
use crate::datastore::migrations;
use crate::error_handling::types::{DatastoreError, DatastoreResult};
use crate::model::{
    Host, Label, ListOptions, OrderDirection, Pack, PasswordResetRequest, Query, Session, User,
};
use crate::utils::token;

fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(s: &str) -> DatastoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatastoreError::Database(DbErr::Type(format!("bad timestamp '{}': {}", s, e))))
}

fn key(id: u32) -> i64 {
    i64::from(id)
}

fn id_from(v: i64) -> DatastoreResult<u32> {
    u32::try_from(v).map_err(|_| DatastoreError::Database(DbErr::Type(format!("id {} out of range", v))))
}

fn order(opts: &ListOptions) -> Order {
    match opts.order_direction {
        OrderDirection::Ascending => Order::Asc,
        OrderDirection::Descending => Order::Desc,
    }
}

/// Maps an UPDATE failure. `rows_affected == 0` is handled by the caller.
fn update_err(err: DbErr, kind: &'static str, id: impl ToString) -> DatastoreError {
    DatastoreError::from_insert(err, kind, id)
}

fn user_from_row(m: users::Model) -> DatastoreResult<User> {
    Ok(User {
        id: id_from(m.id)?,
        created_at: parse_time(&m.created_at)?,
        updated_at: parse_time(&m.updated_at)?,
        username: m.username,
        password: m.password,
        name: m.name,
        email: m.email,
        admin: m.admin,
        enabled: m.enabled,
        admin_forced_password_reset: m.admin_forced_password_reset,
        gravatar_url: m.gravatar_url,
        position: m.position,
    })
}

fn query_from_row(m: queries::Model) -> DatastoreResult<Query> {
    Ok(Query {
        id: id_from(m.id)?,
        created_at: parse_time(&m.created_at)?,
        updated_at: parse_time(&m.updated_at)?,
        saved: m.saved,
        name: m.name,
        description: m.description,
        query: m.query,
        interval: u32::try_from(m.interval).map_err(|_| {
            DatastoreError::Database(DbErr::Type(format!("interval {} out of range", m.interval)))
        })?,
        snapshot: m.snapshot,
        differential: m.differential,
        platform: m.platform,
        version: m.version,
    })
}

fn pack_from_row(m: packs::Model) -> DatastoreResult<Pack> {
    Ok(Pack {
        id: id_from(m.id)?,
        created_at: parse_time(&m.created_at)?,
        updated_at: parse_time(&m.updated_at)?,
        name: m.name,
        platform: m.platform,
    })
}

fn label_from_row(m: labels::Model) -> DatastoreResult<Label> {
    Ok(Label {
        id: id_from(m.id)?,
        created_at: parse_time(&m.created_at)?,
        updated_at: parse_time(&m.updated_at)?,
        name: m.name,
        description: m.description,
        query: m.query,
        platform: m.platform,
    })
}

fn host_from_row(m: hosts::Model) -> DatastoreResult<Host> {
    Ok(Host {
        id: id_from(m.id)?,
        created_at: parse_time(&m.created_at)?,
        updated_at: parse_time(&m.updated_at)?,
        detail_update_time: parse_time(&m.detail_update_time)?,
        seen_time: parse_time(&m.seen_time)?,
        node_key: m.node_key,
        host_name: m.host_name,
        uuid: m.uuid,
        platform: m.platform,
        osquery_version: m.osquery_version,
        os_version: m.os_version,
        uptime: m.uptime,
        physical_memory: m.physical_memory,
        primary_mac: m.primary_mac,
        primary_ip: m.primary_ip,
    })
}

fn reset_from_row(m: password_reset_requests::Model) -> DatastoreResult<PasswordResetRequest> {
    Ok(PasswordResetRequest {
        id: id_from(m.id)?,
        created_at: parse_time(&m.created_at)?,
        updated_at: parse_time(&m.updated_at)?,
        expires_at: parse_time(&m.expires_at)?,
        user_id: id_from(m.user_id)?,
        token: m.token,
    })
}

fn session_from_row(m: sessions::Model) -> DatastoreResult<Session> {
    Ok(Session {
        id: id_from(m.id)?,
        created_at: parse_time(&m.created_at)?,
        accessed_at: parse_time(&m.accessed_at)?,
        user_id: id_from(m.user_id)?,
        key: m.key,
    })
}

fn collect<M, T>(rows: Vec<M>, f: fn(M) -> DatastoreResult<T>) -> DatastoreResult<Vec<T>> {
    rows.into_iter().map(f).collect()
}

fn user_column(key: &str) -> users::Column {
    match key {
        "created_at" => users::Column::CreatedAt,
        "updated_at" => users::Column::UpdatedAt,
        "username" => users::Column::Username,
        "name" => users::Column::Name,
        "email" => users::Column::Email,
        _ => users::Column::Id,
    }
}

fn query_column(key: &str) -> queries::Column {
    match key {
        "created_at" => queries::Column::CreatedAt,
        "updated_at" => queries::Column::UpdatedAt,
        "name" => queries::Column::Name,
        _ => queries::Column::Id,
    }
}

fn pack_column(key: &str) -> packs::Column {
    match key {
        "created_at" => packs::Column::CreatedAt,
        "updated_at" => packs::Column::UpdatedAt,
        "name" => packs::Column::Name,
        _ => packs::Column::Id,
    }
}

fn label_column(key: &str) -> labels::Column {
    match key {
        "created_at" => labels::Column::CreatedAt,
        "updated_at" => labels::Column::UpdatedAt,
        "name" => labels::Column::Name,
        _ => labels::Column::Id,
    }
}

fn host_column(key: &str) -> hosts::Column {
    match key {
        "created_at" => hosts::Column::CreatedAt,
        "updated_at" => hosts::Column::UpdatedAt,
        "seen_time" => hosts::Column::SeenTime,
        "host_name" => hosts::Column::HostName,
        "platform" => hosts::Column::Platform,
        _ => hosts::Column::Id,
    }
}

// Lookups shared by plain calls and transactions.
async fn require_user<C: ConnectionTrait>(db: &C, id: u32) -> DatastoreResult<users::Model> {
    users::Entity::find_by_id(key(id))
        .one(db)
        .await?
        .ok_or_else(|| DatastoreError::not_found("user", id))
}

async fn require_query<C: ConnectionTrait>(db: &C, id: u32) -> DatastoreResult<queries::Model> {
    queries::Entity::find_by_id(key(id))
        .one(db)
        .await?
        .ok_or_else(|| DatastoreError::not_found("query", id))
}

async fn require_pack<C: ConnectionTrait>(db: &C, id: u32) -> DatastoreResult<packs::Model> {
    packs::Entity::find_by_id(key(id))
        .one(db)
        .await?
        .ok_or_else(|| DatastoreError::not_found("pack", id))
}

async fn require_label<C: ConnectionTrait>(db: &C, id: u32) -> DatastoreResult<labels::Model> {
    labels::Entity::find_by_id(key(id))
        .one(db)
        .await?
        .ok_or_else(|| DatastoreError::not_found("label", id))
}

async fn require_host<C: ConnectionTrait>(db: &C, id: u32) -> DatastoreResult<hosts::Model> {
    hosts::Entity::find_by_id(key(id))
        .one(db)
        .await?
        .ok_or_else(|| DatastoreError::not_found("host", id))
}

async fn table_exists<C: ConnectionTrait>(db: &C, table: &str) -> DatastoreResult<bool> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table.into()],
        ))
        .await?;
    let n: i64 = match row {
        Some(row) => row.try_get("", "n")?,
        None => 0,
    };
    Ok(n > 0)
}

async fn applied_version<C: ConnectionTrait>(db: &C) -> DatastoreResult<u32> {
    if !table_exists(db, "schema_migrations").await? {
        return Ok(0);
    }
    let row = db
        .query_one(Statement::from_string(
            DbBackend::Sqlite,
            "SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations",
        ))
        .await?;
    let version: i64 = match row {
        Some(row) => row.try_get("", "version")?,
        None => 0,
    };
    id_from(version)
}

/// Datastore persisted in a SQLite database file.
pub struct SqliteStore {
    rt: tokio::runtime::Runtime,
    db: DatabaseConnection,
    // SQLite allows one writer at a time; pooled connections racing on a
    // read-then-write transaction fail with SQLITE_BUSY instead of waiting.
    write_lock: Mutex<()>,
}

/// Builds the pool options for `path`.
fn connect_options(path: &Path, max_connections: u32) -> ConnectOptions {
    let mut opts = if path == Path::new(SqliteStore::IN_MEMORY) {
        // every pooled connection would otherwise see its own empty database
        let mut opts = ConnectOptions::new("sqlite::memory:");
        // the database lives only as long as its single connection, so the
        // pool must never recycle it
        opts.max_connections(1)
            .max_lifetime(UNBOUNDED)
            .idle_timeout(UNBOUNDED);
        opts
    } else {
        let mut opts = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
        opts.max_connections(max_connections.max(1));
        opts
    };
    opts.min_connections(1)
        .connect_timeout(Duration::from_secs(5))
        .sqlx_logging(false);
    opts
}

const UNBOUNDED: Duration = Duration::from_secs(u32::MAX as u64);

/// Commits `txn` when `res` is Ok, rolls it back otherwise.
async fn finish<T>(txn: DatabaseTransaction, res: DatastoreResult<T>) -> DatastoreResult<T> {
    match res {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                error!("Rollback failed after '{}': {}", e, rollback);
            }
            Err(e)
        }
    }
}

impl SqliteStore {
    /// Path that selects a private in-memory database.
    pub const IN_MEMORY: &'static str = ":memory:";

    /// Opens (creating if missing) the database at `path`.
    ///
    /// The schema is not touched; call `migrate` before using the store.
    pub fn open<P: AsRef<Path>>(path: P, max_connections: u32) -> DatastoreResult<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DatastoreError::Runtime(e.to_string()))?;
        let path_ref = path.as_ref();
        if path_ref != Path::new(Self::IN_MEMORY) {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let opts = connect_options(path_ref, max_connections);
        let db = rt.block_on(Database::connect(opts)).map_err(|e| {
            error!("Failed to open SQLite datastore {}: {}", path_ref.display(), e);
            DatastoreError::Database(e)
        })?;
        info!("SQLite datastore opened at {}", path_ref.display());
        Ok(Self {
            rt,
            db,
            write_lock: Mutex::new(()),
        })
    }

    pub fn open_in_memory() -> DatastoreResult<Self> {
        Self::open(Self::IN_MEMORY, 1)
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    /// Runs a mutating future while holding the write lock.
    fn write<T, F>(&self, fut: F) -> DatastoreResult<T>
    where
        F: Future<Output = DatastoreResult<T>>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| DatastoreError::LockPoisoned)?;
        self.rt.block_on(fut)
    }
}

impl UserStore for SqliteStore {
    fn new_user(&self, user: &User) -> DatastoreResult<User> {
        user.validate()?;
        self.write(async {
            let now = fmt_time(&Utc::now());
            let row = users::ActiveModel {
                id: NotSet,
                created_at: Set(now.clone()),
                updated_at: Set(now),
                username: Set(user.username.clone()),
                password: Set(user.password.clone()),
                name: Set(user.name.clone()),
                email: Set(user.email.clone()),
                admin: Set(user.admin),
                enabled: Set(user.enabled),
                admin_forced_password_reset: Set(user.admin_forced_password_reset),
                gravatar_url: Set(user.gravatar_url.clone()),
                position: Set(user.position.clone()),
            }
            .insert(&self.db)
            .await
            .map_err(|e| DatastoreError::from_insert(e, "user", &user.username))?;
            debug!("Created user {} ({})", row.id, row.username);
            user_from_row(row)
        })
    }

    fn user(&self, username: &str) -> DatastoreResult<User> {
        self.block_on(async {
            let row = users::Entity::find()
                .filter(users::Column::Username.eq(username))
                .one(&self.db)
                .await?
                .ok_or_else(|| DatastoreError::not_found("user", username))?;
            user_from_row(row)
        })
    }

    fn user_by_id(&self, id: u32) -> DatastoreResult<User> {
        self.block_on(async { user_from_row(require_user(&self.db, id).await?) })
    }

    fn user_by_email(&self, email: &str) -> DatastoreResult<User> {
        self.block_on(async {
            let row = users::Entity::find()
                .filter(users::Column::Email.eq(email))
                .one(&self.db)
                .await?
                .ok_or_else(|| DatastoreError::not_found("user", email))?;
            user_from_row(row)
        })
    }

    fn users(&self, opts: &ListOptions) -> DatastoreResult<Vec<User>> {
        let column = user_column(opts.order_key_for::<User>()?);
        self.block_on(async {
            let mut select = users::Entity::find()
                .order_by(column, order(opts))
                .order_by(users::Column::Id, order(opts));
            if let Some(limit) = opts.limit() {
                select = select.limit(limit).offset(opts.offset());
            }
            collect(select.all(&self.db).await?, user_from_row)
        })
    }

    fn save_user(&self, user: &User) -> DatastoreResult<()> {
        user.validate()?;
        self.write(async {
            let changes = users::ActiveModel {
                updated_at: Set(fmt_time(&Utc::now())),
                username: Set(user.username.clone()),
                password: Set(user.password.clone()),
                name: Set(user.name.clone()),
                email: Set(user.email.clone()),
                admin: Set(user.admin),
                enabled: Set(user.enabled),
                admin_forced_password_reset: Set(user.admin_forced_password_reset),
                gravatar_url: Set(user.gravatar_url.clone()),
                position: Set(user.position.clone()),
                ..Default::default()
            };
            let res = users::Entity::update_many()
                .set(changes)
                .filter(users::Column::Id.eq(key(user.id)))
                .exec(&self.db)
                .await
                .map_err(|e| update_err(e, "user", &user.username))?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("user", user.id));
            }
            Ok(())
        })
    }
}

impl QueryStore for SqliteStore {
    fn new_query(&self, query: &Query) -> DatastoreResult<Query> {
        query.validate()?;
        self.write(async {
            let now = fmt_time(&Utc::now());
            let row = queries::ActiveModel {
                id: NotSet,
                created_at: Set(now.clone()),
                updated_at: Set(now),
                saved: Set(query.saved),
                name: Set(query.name.clone()),
                description: Set(query.description.clone()),
                query: Set(query.query.clone()),
                interval: Set(i64::from(query.interval)),
                snapshot: Set(query.snapshot),
                differential: Set(query.differential),
                platform: Set(query.platform.clone()),
                version: Set(query.version.clone()),
            }
            .insert(&self.db)
            .await
            .map_err(|e| DatastoreError::from_insert(e, "query", &query.name))?;
            query_from_row(row)
        })
    }

    fn save_query(&self, query: &Query) -> DatastoreResult<()> {
        query.validate()?;
        self.write(async {
            let changes = queries::ActiveModel {
                updated_at: Set(fmt_time(&Utc::now())),
                saved: Set(query.saved),
                name: Set(query.name.clone()),
                description: Set(query.description.clone()),
                query: Set(query.query.clone()),
                interval: Set(i64::from(query.interval)),
                snapshot: Set(query.snapshot),
                differential: Set(query.differential),
                platform: Set(query.platform.clone()),
                version: Set(query.version.clone()),
                ..Default::default()
            };
            let res = queries::Entity::update_many()
                .set(changes)
                .filter(queries::Column::Id.eq(key(query.id)))
                .exec(&self.db)
                .await
                .map_err(|e| update_err(e, "query", &query.name))?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("query", query.id));
            }
            Ok(())
        })
    }

    fn delete_query(&self, id: u32) -> DatastoreResult<()> {
        self.write(async {
            let txn = self.db.begin().await?;
            let res: DatastoreResult<()> = async {
                pack_queries::Entity::delete_many()
                    .filter(pack_queries::Column::QueryId.eq(key(id)))
                    .exec(&txn)
                    .await?;
                let res = queries::Entity::delete_by_id(key(id)).exec(&txn).await?;
                if res.rows_affected == 0 {
                    return Err(DatastoreError::not_found("query", id));
                }
                Ok(())
            }
            .await;
            finish(txn, res).await?;
            Ok(())
        })
    }

    fn query(&self, id: u32) -> DatastoreResult<Query> {
        self.block_on(async { query_from_row(require_query(&self.db, id).await?) })
    }

    fn queries(&self, opts: &ListOptions) -> DatastoreResult<Vec<Query>> {
        let column = query_column(opts.order_key_for::<Query>()?);
        self.block_on(async {
            let mut select = queries::Entity::find()
                .order_by(column, order(opts))
                .order_by(queries::Column::Id, order(opts));
            if let Some(limit) = opts.limit() {
                select = select.limit(limit).offset(opts.offset());
            }
            collect(select.all(&self.db).await?, query_from_row)
        })
    }
}

impl PackStore for SqliteStore {
    fn new_pack(&self, pack: &Pack) -> DatastoreResult<Pack> {
        pack.validate()?;
        self.write(async {
            let now = fmt_time(&Utc::now());
            let row = packs::ActiveModel {
                id: NotSet,
                created_at: Set(now.clone()),
                updated_at: Set(now),
                name: Set(pack.name.clone()),
                platform: Set(pack.platform.clone()),
            }
            .insert(&self.db)
            .await
            .map_err(|e| DatastoreError::from_insert(e, "pack", &pack.name))?;
            pack_from_row(row)
        })
    }

    fn save_pack(&self, pack: &Pack) -> DatastoreResult<()> {
        pack.validate()?;
        self.write(async {
            let changes = packs::ActiveModel {
                updated_at: Set(fmt_time(&Utc::now())),
                name: Set(pack.name.clone()),
                platform: Set(pack.platform.clone()),
                ..Default::default()
            };
            let res = packs::Entity::update_many()
                .set(changes)
                .filter(packs::Column::Id.eq(key(pack.id)))
                .exec(&self.db)
                .await
                .map_err(|e| update_err(e, "pack", &pack.name))?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("pack", pack.id));
            }
            Ok(())
        })
    }

    fn delete_pack(&self, id: u32) -> DatastoreResult<()> {
        self.write(async {
            let txn = self.db.begin().await?;
            let res: DatastoreResult<()> = async {
                pack_queries::Entity::delete_many()
                    .filter(pack_queries::Column::PackId.eq(key(id)))
                    .exec(&txn)
                    .await?;
                pack_labels::Entity::delete_many()
                    .filter(pack_labels::Column::PackId.eq(key(id)))
                    .exec(&txn)
                    .await?;
                let res = packs::Entity::delete_by_id(key(id)).exec(&txn).await?;
                if res.rows_affected == 0 {
                    return Err(DatastoreError::not_found("pack", id));
                }
                Ok(())
            }
            .await;
            finish(txn, res).await?;
            Ok(())
        })
    }

    fn pack(&self, id: u32) -> DatastoreResult<Pack> {
        self.block_on(async { pack_from_row(require_pack(&self.db, id).await?) })
    }

    fn packs(&self, opts: &ListOptions) -> DatastoreResult<Vec<Pack>> {
        let column = pack_column(opts.order_key_for::<Pack>()?);
        self.block_on(async {
            let mut select = packs::Entity::find()
                .order_by(column, order(opts))
                .order_by(packs::Column::Id, order(opts));
            if let Some(limit) = opts.limit() {
                select = select.limit(limit).offset(opts.offset());
            }
            collect(select.all(&self.db).await?, pack_from_row)
        })
    }

    fn add_query_to_pack(&self, query_id: u32, pack_id: u32) -> DatastoreResult<()> {
        self.write(async {
            require_query(&self.db, query_id).await?;
            require_pack(&self.db, pack_id).await?;
            pack_queries::Entity::insert(pack_queries::ActiveModel {
                pack_id: Set(key(pack_id)),
                query_id: Set(key(query_id)),
            })
            .on_conflict(
                OnConflict::columns([pack_queries::Column::PackId, pack_queries::Column::QueryId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
            Ok(())
        })
    }

    fn queries_in_pack(&self, pack_id: u32) -> DatastoreResult<Vec<Query>> {
        self.block_on(async {
            require_pack(&self.db, pack_id).await?;
            let rows = queries::Entity::find()
                .join(JoinType::InnerJoin, pack_queries::Relation::Query.def().rev())
                .filter(pack_queries::Column::PackId.eq(key(pack_id)))
                .order_by_asc(queries::Column::Id)
                .all(&self.db)
                .await?;
            collect(rows, query_from_row)
        })
    }

    fn remove_query_from_pack(&self, query_id: u32, pack_id: u32) -> DatastoreResult<()> {
        self.write(async {
            let res = pack_queries::Entity::delete_many()
                .filter(pack_queries::Column::PackId.eq(key(pack_id)))
                .filter(pack_queries::Column::QueryId.eq(key(query_id)))
                .exec(&self.db)
                .await?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found(
                    "pack query",
                    format!("{}/{}", pack_id, query_id),
                ));
            }
            Ok(())
        })
    }

    fn add_label_to_pack(&self, label_id: u32, pack_id: u32) -> DatastoreResult<()> {
        self.write(async {
            require_label(&self.db, label_id).await?;
            require_pack(&self.db, pack_id).await?;
            pack_labels::Entity::insert(pack_labels::ActiveModel {
                pack_id: Set(key(pack_id)),
                label_id: Set(key(label_id)),
            })
            .on_conflict(
                OnConflict::columns([pack_labels::Column::PackId, pack_labels::Column::LabelId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
            Ok(())
        })
    }

    fn labels_for_pack(&self, pack_id: u32) -> DatastoreResult<Vec<Label>> {
        self.block_on(async {
            require_pack(&self.db, pack_id).await?;
            let rows = labels::Entity::find()
                .join(JoinType::InnerJoin, pack_labels::Relation::Label.def().rev())
                .filter(pack_labels::Column::PackId.eq(key(pack_id)))
                .order_by_asc(labels::Column::Id)
                .all(&self.db)
                .await?;
            collect(rows, label_from_row)
        })
    }

    fn remove_label_from_pack(&self, label_id: u32, pack_id: u32) -> DatastoreResult<()> {
        self.write(async {
            let res = pack_labels::Entity::delete_many()
                .filter(pack_labels::Column::PackId.eq(key(pack_id)))
                .filter(pack_labels::Column::LabelId.eq(key(label_id)))
                .exec(&self.db)
                .await?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found(
                    "pack label",
                    format!("{}/{}", pack_id, label_id),
                ));
            }
            Ok(())
        })
    }
}

impl OsqueryStore for SqliteStore {
    fn new_label(&self, label: &Label) -> DatastoreResult<Label> {
        label.validate()?;
        self.write(async {
            let now = fmt_time(&Utc::now());
            let row = labels::ActiveModel {
                id: NotSet,
                created_at: Set(now.clone()),
                updated_at: Set(now),
                name: Set(label.name.clone()),
                description: Set(label.description.clone()),
                query: Set(label.query.clone()),
                platform: Set(label.platform.clone()),
            }
            .insert(&self.db)
            .await
            .map_err(|e| DatastoreError::from_insert(e, "label", &label.name))?;
            label_from_row(row)
        })
    }

    fn label(&self, id: u32) -> DatastoreResult<Label> {
        self.block_on(async { label_from_row(require_label(&self.db, id).await?) })
    }

    fn labels(&self, opts: &ListOptions) -> DatastoreResult<Vec<Label>> {
        let column = label_column(opts.order_key_for::<Label>()?);
        self.block_on(async {
            let mut select = labels::Entity::find()
                .order_by(column, order(opts))
                .order_by(labels::Column::Id, order(opts));
            if let Some(limit) = opts.limit() {
                select = select.limit(limit).offset(opts.offset());
            }
            collect(select.all(&self.db).await?, label_from_row)
        })
    }

    fn delete_label(&self, id: u32) -> DatastoreResult<()> {
        self.write(async {
            let txn = self.db.begin().await?;
            let res: DatastoreResult<()> = async {
                label_query_executions::Entity::delete_many()
                    .filter(label_query_executions::Column::LabelId.eq(key(id)))
                    .exec(&txn)
                    .await?;
                pack_labels::Entity::delete_many()
                    .filter(pack_labels::Column::LabelId.eq(key(id)))
                    .exec(&txn)
                    .await?;
                let res = labels::Entity::delete_by_id(key(id)).exec(&txn).await?;
                if res.rows_affected == 0 {
                    return Err(DatastoreError::not_found("label", id));
                }
                Ok(())
            }
            .await;
            finish(txn, res).await?;
            Ok(())
        })
    }

    fn label_queries_for_host(
        &self,
        host_id: u32,
        cutoff: DateTime<Utc>,
    ) -> DatastoreResult<BTreeMap<u32, String>> {
        self.block_on(async {
            let host = require_host(&self.db, host_id).await?;
            let fresh: Vec<i64> = label_query_executions::Entity::find()
                .filter(label_query_executions::Column::HostId.eq(key(host_id)))
                .all(&self.db)
                .await?
                .into_iter()
                .filter_map(|exec| match parse_time(&exec.updated_at) {
                    Ok(at) if at >= cutoff => Some(Ok(exec.label_id)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                })
                .collect::<DatastoreResult<_>>()?;
            let rows = labels::Entity::find()
                .filter(
                    labels::Column::Platform
                        .eq("")
                        .or(labels::Column::Platform.eq(host.platform.as_str())),
                )
                .filter(labels::Column::Id.is_not_in(fresh))
                .order_by_asc(labels::Column::Id)
                .all(&self.db)
                .await?;
            let mut out = BTreeMap::new();
            for row in rows {
                out.insert(id_from(row.id)?, row.query);
            }
            Ok(out)
        })
    }

    fn record_label_query_executions(
        &self,
        host_id: u32,
        results: &BTreeMap<u32, bool>,
        at: DateTime<Utc>,
    ) -> DatastoreResult<()> {
        self.write(async {
            let txn = self.db.begin().await?;
            let res: DatastoreResult<()> = async {
                require_host(&txn, host_id).await?;
                let at = fmt_time(&at);
                for (&label_id, &matches) in results {
                    require_label(&txn, label_id).await?;
                    label_query_executions::Entity::insert(label_query_executions::ActiveModel {
                        id: NotSet,
                        updated_at: Set(at.clone()),
                        matches: Set(matches),
                        label_id: Set(key(label_id)),
                        host_id: Set(key(host_id)),
                    })
                    .on_conflict(
                        OnConflict::columns([
                            label_query_executions::Column::LabelId,
                            label_query_executions::Column::HostId,
                        ])
                        .update_columns([
                            label_query_executions::Column::Matches,
                            label_query_executions::Column::UpdatedAt,
                        ])
                        .to_owned(),
                    )
                    .exec_without_returning(&txn)
                    .await?;
                }
                Ok(())
            }
            .await;
            finish(txn, res).await?;
            debug!(
                "Recorded {} label execution(s) for host {}",
                results.len(),
                host_id
            );
            Ok(())
        })
    }

    fn labels_for_host(&self, host_id: u32) -> DatastoreResult<Vec<Label>> {
        self.block_on(async {
            require_host(&self.db, host_id).await?;
            let rows = labels::Entity::find()
                .join(
                    JoinType::InnerJoin,
                    label_query_executions::Relation::Label.def().rev(),
                )
                .filter(label_query_executions::Column::HostId.eq(key(host_id)))
                .filter(label_query_executions::Column::Matches.eq(true))
                .order_by_asc(labels::Column::Id)
                .all(&self.db)
                .await?;
            collect(rows, label_from_row)
        })
    }
}

impl HostStore for SqliteStore {
    fn new_host(&self, host: &Host) -> DatastoreResult<Host> {
        host.validate()?;
        self.write(async {
            let now = fmt_time(&Utc::now());
            let row = hosts::ActiveModel {
                id: NotSet,
                created_at: Set(now.clone()),
                updated_at: Set(now),
                detail_update_time: Set(fmt_time(&host.detail_update_time)),
                seen_time: Set(fmt_time(&host.seen_time)),
                node_key: Set(host.node_key.clone()),
                host_name: Set(host.host_name.clone()),
                uuid: Set(host.uuid.clone()),
                platform: Set(host.platform.clone()),
                osquery_version: Set(host.osquery_version.clone()),
                os_version: Set(host.os_version.clone()),
                uptime: Set(host.uptime),
                physical_memory: Set(host.physical_memory),
                primary_mac: Set(host.primary_mac.clone()),
                primary_ip: Set(host.primary_ip.clone()),
            }
            .insert(&self.db)
            .await
            .map_err(|e| DatastoreError::from_insert(e, "host", &host.uuid))?;
            host_from_row(row)
        })
    }

    fn save_host(&self, host: &Host) -> DatastoreResult<()> {
        host.validate()?;
        self.write(async {
            let changes = hosts::ActiveModel {
                updated_at: Set(fmt_time(&Utc::now())),
                detail_update_time: Set(fmt_time(&host.detail_update_time)),
                seen_time: Set(fmt_time(&host.seen_time)),
                node_key: Set(host.node_key.clone()),
                host_name: Set(host.host_name.clone()),
                uuid: Set(host.uuid.clone()),
                platform: Set(host.platform.clone()),
                osquery_version: Set(host.osquery_version.clone()),
                os_version: Set(host.os_version.clone()),
                uptime: Set(host.uptime),
                physical_memory: Set(host.physical_memory),
                primary_mac: Set(host.primary_mac.clone()),
                primary_ip: Set(host.primary_ip.clone()),
                ..Default::default()
            };
            let res = hosts::Entity::update_many()
                .set(changes)
                .filter(hosts::Column::Id.eq(key(host.id)))
                .exec(&self.db)
                .await
                .map_err(|e| update_err(e, "host", &host.uuid))?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("host", host.id));
            }
            Ok(())
        })
    }

    fn delete_host(&self, id: u32) -> DatastoreResult<()> {
        self.write(async {
            let txn = self.db.begin().await?;
            let res: DatastoreResult<()> = async {
                label_query_executions::Entity::delete_many()
                    .filter(label_query_executions::Column::HostId.eq(key(id)))
                    .exec(&txn)
                    .await?;
                let res = hosts::Entity::delete_by_id(key(id)).exec(&txn).await?;
                if res.rows_affected == 0 {
                    return Err(DatastoreError::not_found("host", id));
                }
                Ok(())
            }
            .await;
            finish(txn, res).await?;
            Ok(())
        })
    }

    fn host(&self, id: u32) -> DatastoreResult<Host> {
        self.block_on(async { host_from_row(require_host(&self.db, id).await?) })
    }

    fn hosts(&self, opts: &ListOptions) -> DatastoreResult<Vec<Host>> {
        let column = host_column(opts.order_key_for::<Host>()?);
        self.block_on(async {
            let mut select = hosts::Entity::find()
                .order_by(column, order(opts))
                .order_by(hosts::Column::Id, order(opts));
            if let Some(limit) = opts.limit() {
                select = select.limit(limit).offset(opts.offset());
            }
            collect(select.all(&self.db).await?, host_from_row)
        })
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
        self.write(async {
            let now = fmt_time(&Utc::now());
            let txn = self.db.begin().await?;
            let res: DatastoreResult<hosts::Model> = async {
                let existing = hosts::Entity::find()
                    .filter(hosts::Column::Uuid.eq(uuid))
                    .one(&txn)
                    .await?;
                let row = match existing {
                    Some(row) => {
                        let id = row.id;
                        hosts::Entity::update_many()
                            .set(hosts::ActiveModel {
                                updated_at: Set(now),
                                node_key: Set(node_key),
                                host_name: Set(host_name.to_string()),
                                primary_ip: Set(ip.to_string()),
                                platform: Set(platform.to_string()),
                                ..Default::default()
                            })
                            .filter(hosts::Column::Id.eq(id))
                            .exec(&txn)
                            .await
                            .map_err(|e| update_err(e, "host", uuid))?;
                        let row = hosts::Entity::find_by_id(id)
                            .one(&txn)
                            .await?
                            .ok_or_else(|| DatastoreError::not_found("host", uuid))?;
                        info!("Re-enrolled host {} ({})", row.id, uuid);
                        row
                    }
                    None => {
                        let row = hosts::ActiveModel {
                            id: NotSet,
                            created_at: Set(now.clone()),
                            updated_at: Set(now.clone()),
                            detail_update_time: Set(fmt_time(&DateTime::<Utc>::default())),
                            seen_time: Set(now),
                            node_key: Set(node_key),
                            host_name: Set(host_name.to_string()),
                            uuid: Set(uuid.to_string()),
                            platform: Set(platform.to_string()),
                            osquery_version: Set(String::new()),
                            os_version: Set(String::new()),
                            uptime: Set(0),
                            physical_memory: Set(0),
                            primary_mac: Set(String::new()),
                            primary_ip: Set(ip.to_string()),
                        }
                        .insert(&txn)
                        .await
                        .map_err(|e| DatastoreError::from_insert(e, "host", uuid))?;
                        info!("Enrolled host {} ({})", row.id, uuid);
                        row
                    }
                };
                Ok(row)
            }
            .await;
            let row = finish(txn, res).await?;
            host_from_row(row)
        })
    }

    fn authenticate_host(&self, node_key: &str) -> DatastoreResult<Host> {
        self.block_on(async {
            let row = hosts::Entity::find()
                .filter(hosts::Column::NodeKey.eq(node_key))
                .one(&self.db)
                .await?
                .ok_or_else(|| DatastoreError::not_found("host", "node key"))?;
            host_from_row(row)
        })
    }

    fn mark_host_seen(&self, host_id: u32, at: DateTime<Utc>) -> DatastoreResult<()> {
        self.write(async {
            let at = fmt_time(&at);
            let res = hosts::Entity::update_many()
                .set(hosts::ActiveModel {
                    seen_time: Set(at.clone()),
                    updated_at: Set(at),
                    ..Default::default()
                })
                .filter(hosts::Column::Id.eq(key(host_id)))
                .exec(&self.db)
                .await?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("host", host_id));
            }
            Ok(())
        })
    }
}

impl PasswordResetStore for SqliteStore {
    fn new_password_reset_request(
        &self,
        req: &PasswordResetRequest,
    ) -> DatastoreResult<PasswordResetRequest> {
        self.write(async {
            require_user(&self.db, req.user_id).await?;
            let now = fmt_time(&Utc::now());
            let row = password_reset_requests::ActiveModel {
                id: NotSet,
                created_at: Set(now.clone()),
                updated_at: Set(now),
                expires_at: Set(fmt_time(&req.expires_at)),
                user_id: Set(key(req.user_id)),
                token: Set(req.token.clone()),
            }
            .insert(&self.db)
            .await?;
            reset_from_row(row)
        })
    }

    fn save_password_reset_request(&self, req: &PasswordResetRequest) -> DatastoreResult<()> {
        self.write(async {
            require_user(&self.db, req.user_id).await?;
            let res = password_reset_requests::Entity::update_many()
                .set(password_reset_requests::ActiveModel {
                    updated_at: Set(fmt_time(&Utc::now())),
                    expires_at: Set(fmt_time(&req.expires_at)),
                    user_id: Set(key(req.user_id)),
                    token: Set(req.token.clone()),
                    ..Default::default()
                })
                .filter(password_reset_requests::Column::Id.eq(key(req.id)))
                .exec(&self.db)
                .await?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("password reset request", req.id));
            }
            Ok(())
        })
    }

    fn delete_password_reset_request(&self, id: u32) -> DatastoreResult<()> {
        self.write(async {
            let res = password_reset_requests::Entity::delete_by_id(key(id))
                .exec(&self.db)
                .await?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("password reset request", id));
            }
            Ok(())
        })
    }

    fn delete_password_reset_requests_for_user(&self, user_id: u32) -> DatastoreResult<()> {
        self.write(async {
            let res = password_reset_requests::Entity::delete_many()
                .filter(password_reset_requests::Column::UserId.eq(key(user_id)))
                .exec(&self.db)
                .await?;
            debug!(
                "Deleted {} password reset request(s) for user {}",
                res.rows_affected, user_id
            );
            Ok(())
        })
    }

    fn find_password_reset_by_id(&self, id: u32) -> DatastoreResult<PasswordResetRequest> {
        self.block_on(async {
            let row = password_reset_requests::Entity::find_by_id(key(id))
                .one(&self.db)
                .await?
                .ok_or_else(|| DatastoreError::not_found("password reset request", id))?;
            reset_from_row(row)
        })
    }

    fn find_password_resets_by_user_id(
        &self,
        user_id: u32,
    ) -> DatastoreResult<Vec<PasswordResetRequest>> {
        self.block_on(async {
            let rows = password_reset_requests::Entity::find()
                .filter(password_reset_requests::Column::UserId.eq(key(user_id)))
                .order_by_asc(password_reset_requests::Column::Id)
                .all(&self.db)
                .await?;
            collect(rows, reset_from_row)
        })
    }

    fn find_password_reset_by_token(&self, token: &str) -> DatastoreResult<PasswordResetRequest> {
        self.block_on(async {
            let row = password_reset_requests::Entity::find()
                .filter(password_reset_requests::Column::Token.eq(token))
                .order_by_asc(password_reset_requests::Column::Id)
                .one(&self.db)
                .await?
                .ok_or_else(|| DatastoreError::not_found("password reset request", "token"))?;
            reset_from_row(row)
        })
    }

    fn find_password_reset_by_token_and_user_id(
        &self,
        token: &str,
        user_id: u32,
    ) -> DatastoreResult<PasswordResetRequest> {
        self.block_on(async {
            let row = password_reset_requests::Entity::find()
                .filter(password_reset_requests::Column::Token.eq(token))
                .filter(password_reset_requests::Column::UserId.eq(key(user_id)))
                .order_by_asc(password_reset_requests::Column::Id)
                .one(&self.db)
                .await?
                .ok_or_else(|| DatastoreError::not_found("password reset request", "token"))?;
            reset_from_row(row)
        })
    }
}

impl SessionStore for SqliteStore {
    fn find_session_by_key(&self, key: &str) -> DatastoreResult<Session> {
        self.block_on(async {
            let row = sessions::Entity::find()
                .filter(sessions::Column::Key.eq(key))
                .one(&self.db)
                .await?
                .ok_or_else(|| DatastoreError::not_found("session", "key"))?;
            session_from_row(row)
        })
    }

    fn find_session_by_id(&self, id: u32) -> DatastoreResult<Session> {
        self.block_on(async {
            let row = sessions::Entity::find_by_id(key(id))
                .one(&self.db)
                .await?
                .ok_or_else(|| DatastoreError::not_found("session", id))?;
            session_from_row(row)
        })
    }

    fn find_all_sessions_for_user(&self, user_id: u32) -> DatastoreResult<Vec<Session>> {
        self.block_on(async {
            let rows = sessions::Entity::find()
                .filter(sessions::Column::UserId.eq(key(user_id)))
                .order_by_asc(sessions::Column::Id)
                .all(&self.db)
                .await?;
            collect(rows, session_from_row)
        })
    }

    fn new_session(&self, session: &Session) -> DatastoreResult<Session> {
        if session.key.is_empty() {
            return Err(DatastoreError::invalid("session key must not be empty"));
        }
        self.write(async {
            require_user(&self.db, session.user_id).await?;
            let now = fmt_time(&Utc::now());
            let row = sessions::ActiveModel {
                id: NotSet,
                created_at: Set(now.clone()),
                accessed_at: Set(now),
                user_id: Set(key(session.user_id)),
                key: Set(session.key.clone()),
            }
            .insert(&self.db)
            .await
            .map_err(|e| DatastoreError::from_insert(e, "session", "key"))?;
            session_from_row(row)
        })
    }

    fn destroy_session(&self, id: u32) -> DatastoreResult<()> {
        self.write(async {
            let res = sessions::Entity::delete_by_id(key(id)).exec(&self.db).await?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("session", id));
            }
            Ok(())
        })
    }

    fn destroy_all_sessions_for_user(&self, user_id: u32) -> DatastoreResult<()> {
        self.write(async {
            sessions::Entity::delete_many()
                .filter(sessions::Column::UserId.eq(key(user_id)))
                .exec(&self.db)
                .await?;
            Ok(())
        })
    }

    fn mark_session_accessed(&self, id: u32) -> DatastoreResult<()> {
        self.write(async {
            let res = sessions::Entity::update_many()
                .set(sessions::ActiveModel {
                    accessed_at: Set(fmt_time(&Utc::now())),
                    ..Default::default()
                })
                .filter(sessions::Column::Id.eq(key(id)))
                .exec(&self.db)
                .await?;
            if res.rows_affected == 0 {
                return Err(DatastoreError::not_found("session", id));
            }
            Ok(())
        })
    }
}

impl Datastore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn drop_all(&self) -> DatastoreResult<()> {
        self.write(async {
            let txn = self.db.begin().await?;
            let res: DatastoreResult<()> = async {
                for table in migrations::TABLES {
                    txn.execute_unprepared(&format!("DROP TABLE IF EXISTS {}", table))
                        .await?;
                }
                Ok(())
            }
            .await;
            finish(txn, res).await?;
            info!("SQLite datastore dropped {} table(s)", migrations::TABLES.len());
            Ok(())
        })
    }

    fn migrate(&self) -> DatastoreResult<()> {
        self.write(async {
            let txn = self.db.begin().await?;
            let res: DatastoreResult<(u32, usize)> = async {
                txn.execute_unprepared(migrations::MIGRATIONS_TABLE).await?;
                let current = applied_version(&txn).await?;
                let mut applied = 0;
                for migration in migrations::pending(current) {
                    info!(
                        "Applying migration {}: {}",
                        migration.version, migration.description
                    );
                    for stmt in migration.statements {
                        txn.execute_unprepared(stmt).await.map_err(|e| {
                            error!("Migration {} failed: {}", migration.version, e);
                            DatastoreError::Migration {
                                version: migration.version,
                                reason: e.to_string(),
                            }
                        })?;
                    }
                    txn.execute(Statement::from_sql_and_values(
                        DbBackend::Sqlite,
                        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?, ?, ?)",
                        [
                            i64::from(migration.version).into(),
                            migration.description.into(),
                            fmt_time(&Utc::now()).into(),
                        ],
                    ))
                    .await?;
                    applied += 1;
                }
                Ok((current, applied))
            }
            .await;
            let (current, applied) = finish(txn, res).await?;
            if applied > 0 {
                info!(
                    "{} migration(s) applied, schema now at version {}",
                    applied,
                    migrations::latest_version()
                );
            } else {
                debug!("Schema already at version {}", current);
            }
            Ok(())
        })
    }

    fn schema_version(&self) -> DatastoreResult<u32> {
        self.block_on(applied_version(&self.db))
    }
}
