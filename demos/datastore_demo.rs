use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use env_logger::Env;
use kolide::configuration::{AuthConfig, Backend, Config, DatastoreConfig};
use kolide::datastore::{self, Datastore};
use kolide::model::{Label, ListOptions, Pack, PasswordResetRequest, Query, Session, User};
use kolide::utils::token;
use log::{info, warn};
use uuid::Uuid;

fn exercise(ds: Arc<dyn Datastore>, auth: &AuthConfig) {
    ds.migrate().expect("migrate");
    info!(
        "[{}] schema at version {}",
        ds.name(),
        ds.schema_version().expect("schema version")
    );

    // Users, sessions and password resets
    let admin = User::new("admin", "correct horse", "admin@kolide.co").expect("build user");
    let admin = ds.new_user(&admin).expect("new user");
    match ds.new_user(&admin) {
        Err(e) if e.is_exists() => info!("[{}] duplicate user rejected: {}", ds.name(), e),
        other => warn!("[{}] unexpected duplicate result: {:?}", ds.name(), other),
    }
    ds.user("admin")
        .expect("lookup user")
        .validate_password("correct horse")
        .expect("password");

    let session = ds
        .new_session(&Session::new(admin.id, auth.generate_session_key()))
        .expect("new session");
    ds.mark_session_accessed(session.id).expect("touch session");

    let reset = PasswordResetRequest::new(
        admin.id,
        token::random_text(24),
        Utc::now() + Duration::hours(24),
    );
    let reset = ds.new_password_reset_request(&reset).expect("new reset");
    info!(
        "[{}] user {} has {} session(s), reset {} expires {}",
        ds.name(),
        admin.username,
        ds.find_all_sessions_for_user(admin.id).expect("sessions").len(),
        reset.id,
        reset.expires_at
    );

    // Queries and packs
    let pack = ds.new_pack(&Pack::new("baseline")).expect("new pack");
    for (name, sql) in [
        ("processes", "select * from processes;"),
        ("listening_ports", "select * from listening_ports;"),
    ] {
        let query = ds.new_query(&Query::new(name, sql)).expect("new query");
        ds.add_query_to_pack(query.id, pack.id).expect("link query");
    }

    // Hosts and labels
    let host = ds
        .enroll_host(
            &Uuid::new_v4().to_string(),
            "demo-host",
            "10.0.0.7",
            "darwin",
            auth.node_key_size,
        )
        .expect("enroll");
    let mut macs = Label::new("macs", "select 1 from os_version where platform = 'darwin';");
    macs.platform = "darwin".to_string();
    let macs = ds.new_label(&macs).expect("new label");
    ds.add_label_to_pack(macs.id, pack.id).expect("target pack");

    let pending = ds
        .label_queries_for_host(host.id, Utc::now() - Duration::minutes(1))
        .expect("label queries");
    let results: BTreeMap<u32, bool> = pending.keys().map(|id| (*id, true)).collect();
    ds.record_label_query_executions(host.id, &results, Utc::now())
        .expect("record results");
    let matched: Vec<String> = ds
        .labels_for_host(host.id)
        .expect("labels for host")
        .into_iter()
        .map(|l| l.name)
        .collect();
    info!(
        "[{}] host {} ({}) ran {} label quer(ies), matched {:?}",
        ds.name(),
        host.id,
        host.node_key,
        pending.len(),
        matched
    );

    let queries = ds.queries_in_pack(pack.id).expect("queries in pack");
    info!(
        "[{}] pack '{}' has {} queries and {} label target(s)",
        ds.name(),
        pack.name,
        queries.len(),
        ds.labels_for_pack(pack.id).expect("pack labels").len()
    );

    let hosts = ds.hosts(&ListOptions::page(0, 10)).expect("list hosts");
    println!(
        "{}",
        serde_json::to_string_pretty(&hosts).expect("serialize hosts")
    );
}

fn main() {
    // Initialize logger (RUST_LOG can override; default to info)
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    // key sizes come from the same config the CLI uses
    let mut config = Config::default();
    config.apply_env().expect("environment overrides");

    let out_dir: PathBuf = env::var("KOLIDE_DEMO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            env::current_dir()
                .expect("cwd")
                .join("target")
                .join("datastore_demo")
        });
    fs::create_dir_all(&out_dir).expect("create output dir");
    let db_path = out_dir.join("kolide_demo.sqlite3");

    for store in [
        DatastoreConfig::default(),
        DatastoreConfig {
            backend: Backend::Sqlite,
            path: db_path.clone(),
            max_connections: config.datastore.max_connections,
        },
    ] {
        let ds = datastore::open(&store).expect("open datastore");
        // start from a clean slate on every run
        ds.drop_all().expect("drop");
        exercise(ds, &config.auth);
    }
    info!("SQLite demo database left at {}", db_path.display());
}
