//! Versioned schema for the SQL backend.
//!
//! Migrations are applied in ascending version order and each applied version
//! is recorded in `schema_migrations`. A migration is never edited once
//! released: schema changes are appended as a new version.

/// One schema step.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

pub const MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

/// All migrations in chronological order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create users, sessions and password reset tables",
        statements: &[
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                username TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL UNIQUE,
                admin BOOLEAN NOT NULL DEFAULT 0,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                admin_forced_password_reset BOOLEAN NOT NULL DEFAULT 0,
                gravatar_url TEXT NOT NULL DEFAULT '',
                position TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                accessed_at TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                \"key\" TEXT NOT NULL UNIQUE,
                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            "CREATE TABLE password_reset_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                token TEXT NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
        ],
    },
    Migration {
        version: 2,
        description: "Create queries and packs",
        statements: &[
            "CREATE TABLE queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                saved BOOLEAN NOT NULL DEFAULT 0,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                query TEXT NOT NULL,
                interval INTEGER NOT NULL DEFAULT 0,
                snapshot BOOLEAN NOT NULL DEFAULT 0,
                differential BOOLEAN NOT NULL DEFAULT 0,
                platform TEXT NOT NULL DEFAULT '',
                version TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE packs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                platform TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE pack_queries (
                pack_id INTEGER NOT NULL,
                query_id INTEGER NOT NULL,
                PRIMARY KEY (pack_id, query_id),
                FOREIGN KEY(pack_id) REFERENCES packs(id) ON DELETE CASCADE,
                FOREIGN KEY(query_id) REFERENCES queries(id) ON DELETE CASCADE
            )",
        ],
    },
    Migration {
        version: 3,
        description: "Create hosts, labels and label query executions",
        statements: &[
            "CREATE TABLE hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                detail_update_time TEXT NOT NULL,
                seen_time TEXT NOT NULL,
                node_key TEXT NOT NULL UNIQUE,
                host_name TEXT NOT NULL DEFAULT '',
                uuid TEXT NOT NULL UNIQUE,
                platform TEXT NOT NULL DEFAULT '',
                osquery_version TEXT NOT NULL DEFAULT '',
                os_version TEXT NOT NULL DEFAULT '',
                uptime INTEGER NOT NULL DEFAULT 0,
                physical_memory INTEGER NOT NULL DEFAULT 0,
                primary_mac TEXT NOT NULL DEFAULT '',
                primary_ip TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                query TEXT NOT NULL,
                platform TEXT NOT NULL DEFAULT ''
            )",
            "CREATE TABLE label_query_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                updated_at TEXT NOT NULL,
                matches BOOLEAN NOT NULL DEFAULT 0,
                label_id INTEGER NOT NULL,
                host_id INTEGER NOT NULL,
                UNIQUE (label_id, host_id),
                FOREIGN KEY(label_id) REFERENCES labels(id) ON DELETE CASCADE,
                FOREIGN KEY(host_id) REFERENCES hosts(id) ON DELETE CASCADE
            )",
        ],
    },
    Migration {
        version: 4,
        description: "Add pack label targets and lookup indexes",
        statements: &[
            "CREATE TABLE pack_labels (
                pack_id INTEGER NOT NULL,
                label_id INTEGER NOT NULL,
                PRIMARY KEY (pack_id, label_id),
                FOREIGN KEY(pack_id) REFERENCES packs(id) ON DELETE CASCADE,
                FOREIGN KEY(label_id) REFERENCES labels(id) ON DELETE CASCADE
            )",
            "CREATE INDEX idx_sessions_user_id ON sessions(user_id)",
            "CREATE INDEX idx_password_reset_requests_user_id ON password_reset_requests(user_id)",
            "CREATE INDEX idx_password_reset_requests_token ON password_reset_requests(token)",
            "CREATE INDEX idx_label_query_executions_host_id ON label_query_executions(host_id)",
        ],
    },
];

/// Tables dropped by `drop_all`, dependents first.
pub const TABLES: &[&str] = &[
    "label_query_executions",
    "pack_labels",
    "pack_queries",
    "sessions",
    "password_reset_requests",
    "hosts",
    "labels",
    "packs",
    "queries",
    "users",
    "schema_migrations",
];

/// Schema version this build expects.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Migrations newer than `applied`, oldest first.
pub fn pending(applied: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > applied)
}
