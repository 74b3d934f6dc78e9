//! Behaviour every `Datastore` backend must share.
//!
//! Backend test modules call `run_all` with a constructor returning a fresh,
//! migrated store; each scenario gets its own store.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::datastore::datastore_trait::Datastore;
use crate::datastore::migrations;
use crate::error_handling::types::DatastoreError;
use crate::model::{
    Host, Label, ListOptions, OrderDirection, Pack, PasswordResetRequest, Query, Session, User,
};
use crate::utils::token;

type Scenario<D> = fn(&D);

pub fn run_all<D: Datastore>(make: &dyn Fn() -> D) {
    let scenarios: &[(&str, Scenario<D>)] = &[
        ("users", users),
        ("user_uniqueness", user_uniqueness),
        ("save_user", save_user),
        ("queries", queries),
        ("packs", packs),
        ("pack_queries", pack_queries),
        ("pack_labels", pack_labels),
        ("labels", labels),
        ("label_query_executions", label_query_executions),
        ("label_batch_is_atomic", label_batch_is_atomic),
        ("hosts", hosts),
        ("enroll_host", enroll_host),
        ("password_resets", password_resets),
        ("sessions", sessions),
        ("list_options", list_options),
        ("lifecycle", lifecycle),
    ];
    for (name, scenario) in scenarios {
        log::debug!("conformance scenario {}", name);
        let ds = make();
        scenario(&ds);
    }
}

/// One Argon2 hash shared by every fixture user; hashing is slow.
fn hashed_password() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| token::hash_password("p4ssw0rd").unwrap())
}

fn fixture_user(username: &str) -> User {
    User {
        username: username.to_string(),
        email: format!("{}@kolide.co", username),
        password: hashed_password().to_string(),
        enabled: true,
        ..Default::default()
    }
}

fn fixture_host(uuid: &str, platform: &str) -> Host {
    Host {
        uuid: uuid.to_string(),
        node_key: format!("nk-{}", uuid),
        host_name: format!("{}.local", uuid),
        platform: platform.to_string(),
        ..Default::default()
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_478_000_000 + secs, 123_456_789).unwrap()
}

fn assert_not_found<T: std::fmt::Debug>(res: Result<T, DatastoreError>) {
    match res {
        Err(err) => assert!(err.is_not_found(), "expected not found, got {:?}", err),
        Ok(v) => panic!("expected not found, got {:?}", v),
    }
}

fn assert_exists<T: std::fmt::Debug>(res: Result<T, DatastoreError>) {
    match res {
        Err(err) => assert!(err.is_exists(), "expected exists, got {:?}", err),
        Ok(v) => panic!("expected exists, got {:?}", v),
    }
}

fn users<D: Datastore>(ds: &D) {
    let mut created = Vec::new();
    for name in ["admin1", "user1", "user2"] {
        let mut user = fixture_user(name);
        user.admin = name.starts_with("admin");
        let stored = ds.new_user(&user).unwrap();
        assert!(stored.id > 0);
        assert_eq!(stored.username, name);
        assert_eq!(stored.created_at, stored.updated_at);
        created.push(stored);
    }

    let by_name = ds.user("user1").unwrap();
    assert_eq!(by_name, created[1]);
    assert!(by_name.validate_password("p4ssw0rd").is_ok());
    assert!(matches!(
        by_name.validate_password("nope"),
        Err(DatastoreError::InvalidPassword)
    ));

    assert_eq!(ds.user_by_id(created[0].id).unwrap(), created[0]);
    assert!(ds.user_by_id(created[0].id).unwrap().admin);
    assert_eq!(ds.user_by_email("user2@kolide.co").unwrap(), created[2]);

    assert_not_found(ds.user("nobody"));
    assert_not_found(ds.user_by_id(9999));
    assert_not_found(ds.user_by_email("nobody@kolide.co"));

    let all = ds.users(&ListOptions::default()).unwrap();
    assert_eq!(all, created);
}

fn user_uniqueness<D: Datastore>(ds: &D) {
    ds.new_user(&fixture_user("marpaia")).unwrap();

    let mut same_name = fixture_user("marpaia");
    same_name.email = "other@kolide.co".to_string();
    assert_exists(ds.new_user(&same_name));

    let mut same_email = fixture_user("mike");
    same_email.email = "marpaia@kolide.co".to_string();
    assert_exists(ds.new_user(&same_email));

    let mut invalid = fixture_user("bad");
    invalid.email = "not-an-email".to_string();
    assert!(matches!(ds.new_user(&invalid), Err(DatastoreError::Invalid(_))));

    assert_eq!(ds.users(&ListOptions::default()).unwrap().len(), 1);
}

fn save_user<D: Datastore>(ds: &D) {
    let stored = ds.new_user(&fixture_user("zwass")).unwrap();
    let other = ds.new_user(&fixture_user("groob")).unwrap();

    let mut changed = stored.clone();
    changed.name = "Zach".to_string();
    changed.admin = true;
    changed.enabled = false;
    changed.admin_forced_password_reset = true;
    changed.position = "engineer".to_string();
    ds.save_user(&changed).unwrap();

    let reloaded = ds.user_by_id(stored.id).unwrap();
    assert_eq!(reloaded.name, "Zach");
    assert!(reloaded.admin);
    assert!(!reloaded.enabled);
    assert!(reloaded.admin_forced_password_reset);
    assert_eq!(reloaded.position, "engineer");
    assert_eq!(reloaded.created_at, stored.created_at);
    assert!(reloaded.updated_at >= stored.updated_at);

    let mut clash = changed.clone();
    clash.email = other.email.clone();
    assert_exists(ds.save_user(&clash));

    let mut ghost = fixture_user("ghost");
    ghost.id = 9999;
    assert_not_found(ds.save_user(&ghost));
}

fn queries<D: Datastore>(ds: &D) {
    let mut query = Query::new("processes", "select * from processes;");
    query.interval = 3600;
    query.snapshot = true;
    query.platform = "darwin".to_string();
    let stored = ds.new_query(&query).unwrap();
    assert!(stored.id > 0);
    assert_eq!(stored.interval, 3600);
    assert_eq!(ds.query(stored.id).unwrap(), stored);

    assert_exists(ds.new_query(&Query::new("processes", "select 1;")));
    assert!(matches!(
        ds.new_query(&Query::new("empty", "")),
        Err(DatastoreError::Invalid(_))
    ));

    let mut changed = stored.clone();
    changed.query = "select pid from processes;".to_string();
    changed.differential = true;
    ds.save_query(&changed).unwrap();
    let reloaded = ds.query(stored.id).unwrap();
    assert_eq!(reloaded.query, "select pid from processes;");
    assert!(reloaded.differential);
    assert_eq!(reloaded.created_at, stored.created_at);

    let second = ds.new_query(&Query::new("users", "select * from users;")).unwrap();
    assert_eq!(ds.queries(&ListOptions::default()).unwrap().len(), 2);

    ds.delete_query(stored.id).unwrap();
    assert_not_found(ds.query(stored.id));
    assert_not_found(ds.delete_query(stored.id));
    assert_eq!(ds.queries(&ListOptions::default()).unwrap(), vec![second]);

    let mut ghost = Query::new("ghost", "select 1;");
    ghost.id = 9999;
    assert_not_found(ds.save_query(&ghost));
}

fn packs<D: Datastore>(ds: &D) {
    let stored = ds.new_pack(&Pack::new("osx")).unwrap();
    assert_eq!(ds.pack(stored.id).unwrap(), stored);
    assert_exists(ds.new_pack(&Pack::new("osx")));
    assert!(matches!(
        ds.new_pack(&Pack::new("")),
        Err(DatastoreError::Invalid(_))
    ));

    let mut changed = stored.clone();
    changed.platform = "darwin".to_string();
    ds.save_pack(&changed).unwrap();
    assert_eq!(ds.pack(stored.id).unwrap().platform, "darwin");

    let other = ds.new_pack(&Pack::new("linux")).unwrap();
    let mut clash = other.clone();
    clash.name = "osx".to_string();
    assert_exists(ds.save_pack(&clash));

    ds.delete_pack(stored.id).unwrap();
    assert_not_found(ds.pack(stored.id));
    assert_not_found(ds.delete_pack(stored.id));
    assert_eq!(ds.packs(&ListOptions::default()).unwrap(), vec![other]);
}

fn pack_queries<D: Datastore>(ds: &D) {
    let pack = ds.new_pack(&Pack::new("monitoring")).unwrap();
    let q1 = ds.new_query(&Query::new("q1", "select 1;")).unwrap();
    let q2 = ds.new_query(&Query::new("q2", "select 2;")).unwrap();

    assert!(ds.queries_in_pack(pack.id).unwrap().is_empty());
    ds.add_query_to_pack(q1.id, pack.id).unwrap();
    ds.add_query_to_pack(q2.id, pack.id).unwrap();
    // linking twice is a no-op
    ds.add_query_to_pack(q1.id, pack.id).unwrap();
    assert_eq!(ds.queries_in_pack(pack.id).unwrap(), vec![q1.clone(), q2.clone()]);

    assert_not_found(ds.add_query_to_pack(9999, pack.id));
    assert_not_found(ds.add_query_to_pack(q1.id, 9999));
    assert_not_found(ds.queries_in_pack(9999));

    ds.remove_query_from_pack(q1.id, pack.id).unwrap();
    assert_eq!(ds.queries_in_pack(pack.id).unwrap(), vec![q2.clone()]);
    assert_not_found(ds.remove_query_from_pack(q1.id, pack.id));

    // deleting a query detaches it from every pack
    ds.delete_query(q2.id).unwrap();
    assert!(ds.queries_in_pack(pack.id).unwrap().is_empty());

    // deleting a pack keeps its queries
    let q3 = ds.new_query(&Query::new("q3", "select 3;")).unwrap();
    ds.add_query_to_pack(q3.id, pack.id).unwrap();
    ds.delete_pack(pack.id).unwrap();
    assert_eq!(ds.query(q3.id).unwrap(), q3);
}

fn pack_labels<D: Datastore>(ds: &D) {
    let pack = ds.new_pack(&Pack::new("targets")).unwrap();
    let l1 = ds.new_label(&Label::new("macs", "select 1;")).unwrap();
    let l2 = ds.new_label(&Label::new("linux", "select 2;")).unwrap();

    ds.add_label_to_pack(l2.id, pack.id).unwrap();
    ds.add_label_to_pack(l1.id, pack.id).unwrap();
    ds.add_label_to_pack(l1.id, pack.id).unwrap();
    assert_eq!(ds.labels_for_pack(pack.id).unwrap(), vec![l1.clone(), l2.clone()]);

    assert_not_found(ds.add_label_to_pack(9999, pack.id));
    assert_not_found(ds.add_label_to_pack(l1.id, 9999));

    ds.remove_label_from_pack(l2.id, pack.id).unwrap();
    assert_not_found(ds.remove_label_from_pack(l2.id, pack.id));

    ds.delete_label(l1.id).unwrap();
    assert!(ds.labels_for_pack(pack.id).unwrap().is_empty());
}

fn labels<D: Datastore>(ds: &D) {
    let mut label = Label::new("all macs", "select 1 from os_version where platform = 'darwin';");
    label.platform = "darwin".to_string();
    label.description = "every mac".to_string();
    let stored = ds.new_label(&label).unwrap();
    assert_eq!(ds.label(stored.id).unwrap(), stored);
    assert_exists(ds.new_label(&Label::new("all macs", "select 1;")));

    let other = ds.new_label(&Label::new("everything", "select 1;")).unwrap();
    assert_eq!(
        ds.labels(&ListOptions::default()).unwrap(),
        vec![stored.clone(), other.clone()]
    );

    ds.delete_label(stored.id).unwrap();
    assert_not_found(ds.label(stored.id));
    assert_not_found(ds.delete_label(stored.id));
    assert_eq!(ds.labels(&ListOptions::default()).unwrap(), vec![other]);
}

fn label_query_executions<D: Datastore>(ds: &D) {
    let mac = ds.new_host(&fixture_host("mac-1", "darwin")).unwrap();
    let linux = ds.new_host(&fixture_host("ubuntu-1", "ubuntu")).unwrap();

    let everywhere = ds.new_label(&Label::new("all hosts", "select 1;")).unwrap();
    let mut darwin_only = Label::new("macs", "select 2;");
    darwin_only.platform = "darwin".to_string();
    let darwin_only = ds.new_label(&darwin_only).unwrap();
    let mut ubuntu_only = Label::new("ubuntus", "select 3;");
    ubuntu_only.platform = "ubuntu".to_string();
    let ubuntu_only = ds.new_label(&ubuntu_only).unwrap();

    let pending = ds.label_queries_for_host(mac.id, at(0)).unwrap();
    let expected: BTreeMap<u32, String> = [
        (everywhere.id, "select 1;".to_string()),
        (darwin_only.id, "select 2;".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(pending, expected);
    assert_eq!(
        ds.label_queries_for_host(linux.id, at(0))
            .unwrap()
            .keys()
            .copied()
            .collect::<Vec<_>>(),
        vec![everywhere.id, ubuntu_only.id]
    );

    let results: BTreeMap<u32, bool> = [(everywhere.id, true), (darwin_only.id, false)]
        .into_iter()
        .collect();
    ds.record_label_query_executions(mac.id, &results, at(100)).unwrap();

    // fresh results are not asked for again
    assert!(ds.label_queries_for_host(mac.id, at(50)).unwrap().is_empty());
    assert!(ds.label_queries_for_host(mac.id, at(100)).unwrap().is_empty());
    // stale ones are
    assert_eq!(ds.label_queries_for_host(mac.id, at(101)).unwrap(), expected);

    assert_eq!(ds.labels_for_host(mac.id).unwrap(), vec![everywhere.clone()]);
    assert!(ds.labels_for_host(linux.id).unwrap().is_empty());

    // a newer result replaces the old one
    let flipped: BTreeMap<u32, bool> = [(everywhere.id, false), (darwin_only.id, true)]
        .into_iter()
        .collect();
    ds.record_label_query_executions(mac.id, &flipped, at(200)).unwrap();
    assert_eq!(ds.labels_for_host(mac.id).unwrap(), vec![darwin_only.clone()]);
    assert!(ds.label_queries_for_host(mac.id, at(150)).unwrap().is_empty());

    assert_not_found(ds.label_queries_for_host(9999, at(0)));
    assert_not_found(ds.labels_for_host(9999));
    assert_not_found(ds.record_label_query_executions(9999, &flipped, at(0)));

    // deleting a host or label clears its executions
    ds.delete_label(darwin_only.id).unwrap();
    assert!(ds.labels_for_host(mac.id).unwrap().is_empty());
    ds.delete_host(mac.id).unwrap();
    let again = ds.new_host(&fixture_host("mac-1", "darwin")).unwrap();
    assert!(ds.labels_for_host(again.id).unwrap().is_empty());
}

fn label_batch_is_atomic<D: Datastore>(ds: &D) {
    let host = ds.new_host(&fixture_host("atomic", "darwin")).unwrap();
    let label = ds.new_label(&Label::new("real", "select 1;")).unwrap();
    let batch: BTreeMap<u32, bool> = [(label.id, true), (9999, true)].into_iter().collect();

    assert_not_found(ds.record_label_query_executions(host.id, &batch, at(10)));
    assert!(ds.labels_for_host(host.id).unwrap().is_empty());
    assert_eq!(ds.label_queries_for_host(host.id, at(0)).unwrap().len(), 1);
}

fn hosts<D: Datastore>(ds: &D) {
    let mut host = fixture_host("host-uuid-1", "darwin");
    host.osquery_version = "2.0.0".to_string();
    host.uptime = 3600;
    host.physical_memory = 17_179_869_184;
    host.detail_update_time = at(5);
    host.seen_time = at(6);
    let stored = ds.new_host(&host).unwrap();
    assert!(stored.id > 0);
    assert_eq!(stored.detail_update_time, at(5));
    assert_eq!(ds.host(stored.id).unwrap(), stored);

    let mut dup_uuid = fixture_host("host-uuid-1", "darwin");
    dup_uuid.node_key = "different".to_string();
    assert_exists(ds.new_host(&dup_uuid));
    let mut dup_key = fixture_host("host-uuid-2", "darwin");
    dup_key.node_key = stored.node_key.clone();
    assert_exists(ds.new_host(&dup_key));

    let mut changed = stored.clone();
    changed.os_version = "10.12.1".to_string();
    changed.primary_mac = "00:11:22:33:44:55".to_string();
    ds.save_host(&changed).unwrap();
    let reloaded = ds.host(stored.id).unwrap();
    assert_eq!(reloaded.os_version, "10.12.1");
    assert_eq!(reloaded.primary_mac, "00:11:22:33:44:55");
    assert_eq!(reloaded.created_at, stored.created_at);

    ds.mark_host_seen(stored.id, at(1000)).unwrap();
    assert_eq!(ds.host(stored.id).unwrap().seen_time, at(1000));
    assert_not_found(ds.mark_host_seen(9999, at(0)));

    assert_eq!(ds.authenticate_host(&stored.node_key).unwrap().id, stored.id);
    assert_not_found(ds.authenticate_host("bogus"));

    ds.delete_host(stored.id).unwrap();
    assert_not_found(ds.host(stored.id));
    assert_not_found(ds.delete_host(stored.id));
    assert!(ds.hosts(&ListOptions::default()).unwrap().is_empty());
}

fn enroll_host<D: Datastore>(ds: &D) {
    let first = ds
        .enroll_host("uuid-123", "web01", "10.0.0.1", "ubuntu", 24)
        .unwrap();
    assert_eq!(first.uuid, "uuid-123");
    assert_eq!(first.host_name, "web01");
    assert_eq!(first.primary_ip, "10.0.0.1");
    assert_eq!(first.node_key.len(), 32);
    assert_eq!(ds.authenticate_host(&first.node_key).unwrap().id, first.id);

    let again = ds
        .enroll_host("uuid-123", "web01.prod", "10.0.0.2", "ubuntu", 24)
        .unwrap();
    assert_eq!(again.id, first.id);
    assert_ne!(again.node_key, first.node_key);
    assert_eq!(again.host_name, "web01.prod");
    assert_eq!(again.created_at, first.created_at);
    assert_not_found(ds.authenticate_host(&first.node_key));
    assert_eq!(ds.hosts(&ListOptions::default()).unwrap().len(), 1);

    let other = ds
        .enroll_host("uuid-456", "db01", "10.0.0.3", "centos", 16)
        .unwrap();
    assert_ne!(other.id, first.id);

    assert!(matches!(
        ds.enroll_host("", "x", "", "", 24),
        Err(DatastoreError::Invalid(_))
    ));
    assert!(matches!(
        ds.enroll_host("uuid-789", "x", "", "", 0),
        Err(DatastoreError::Invalid(_))
    ));
}

fn password_resets<D: Datastore>(ds: &D) {
    let alice = ds.new_user(&fixture_user("alice")).unwrap();
    let bob = ds.new_user(&fixture_user("bob")).unwrap();
    let expires = at(3600);

    let first = ds
        .new_password_reset_request(&PasswordResetRequest::new(alice.id, "tok-a1", expires))
        .unwrap();
    let second = ds
        .new_password_reset_request(&PasswordResetRequest::new(alice.id, "tok-a2", expires))
        .unwrap();
    let for_bob = ds
        .new_password_reset_request(&PasswordResetRequest::new(bob.id, "tok-b1", expires))
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(first.expires_at, expires);
    assert!(first.is_expired(at(3601)));
    assert!(!first.is_expired(at(3599)));

    assert_not_found(
        ds.new_password_reset_request(&PasswordResetRequest::new(9999, "tok-x", expires)),
    );

    assert_eq!(ds.find_password_reset_by_id(first.id).unwrap(), first);
    assert_eq!(ds.find_password_reset_by_token("tok-b1").unwrap(), for_bob);
    assert_eq!(
        ds.find_password_reset_by_token_and_user_id("tok-a2", alice.id)
            .unwrap(),
        second
    );
    assert_not_found(ds.find_password_reset_by_token_and_user_id("tok-a2", bob.id));
    assert_not_found(ds.find_password_reset_by_token("missing"));
    assert_eq!(
        ds.find_password_resets_by_user_id(alice.id).unwrap(),
        vec![first.clone(), second.clone()]
    );

    let mut extended = first.clone();
    extended.expires_at = at(7200);
    ds.save_password_reset_request(&extended).unwrap();
    assert_eq!(
        ds.find_password_reset_by_id(first.id).unwrap().expires_at,
        at(7200)
    );

    ds.delete_password_reset_request(second.id).unwrap();
    assert_not_found(ds.find_password_reset_by_id(second.id));
    assert_not_found(ds.delete_password_reset_request(second.id));

    ds.delete_password_reset_requests_for_user(alice.id).unwrap();
    assert!(ds.find_password_resets_by_user_id(alice.id).unwrap().is_empty());
    assert_eq!(ds.find_password_resets_by_user_id(bob.id).unwrap(), vec![for_bob]);
    // nothing left to delete is fine
    ds.delete_password_reset_requests_for_user(alice.id).unwrap();
}

fn sessions<D: Datastore>(ds: &D) {
    let user = ds.new_user(&fixture_user("sessions")).unwrap();
    let other = ds.new_user(&fixture_user("other")).unwrap();
    let key = token::random_text(64);

    let session = ds.new_session(&Session::new(user.id, key.clone())).unwrap();
    assert!(session.id > 0);
    assert_eq!(session.key, key);
    assert_eq!(ds.find_session_by_key(&key).unwrap(), session);
    assert_eq!(ds.find_session_by_id(session.id).unwrap(), session);

    assert_exists(ds.new_session(&Session::new(other.id, key.clone())));
    assert_not_found(ds.new_session(&Session::new(9999, "fresh")));
    assert!(matches!(
        ds.new_session(&Session::new(user.id, "")),
        Err(DatastoreError::Invalid(_))
    ));

    let second = ds.new_session(&Session::new(user.id, "second-key")).unwrap();
    let theirs = ds.new_session(&Session::new(other.id, "their-key")).unwrap();
    assert_eq!(
        ds.find_all_sessions_for_user(user.id).unwrap(),
        vec![session.clone(), second.clone()]
    );

    ds.mark_session_accessed(session.id).unwrap();
    let touched = ds.find_session_by_id(session.id).unwrap();
    assert!(touched.accessed_at >= session.accessed_at);
    assert_eq!(touched.created_at, session.created_at);
    assert_not_found(ds.mark_session_accessed(9999));

    ds.destroy_session(second.id).unwrap();
    assert_not_found(ds.find_session_by_id(second.id));
    assert_not_found(ds.destroy_session(second.id));

    ds.destroy_all_sessions_for_user(user.id).unwrap();
    assert!(ds.find_all_sessions_for_user(user.id).unwrap().is_empty());
    assert_not_found(ds.find_session_by_key(&key));
    assert_eq!(ds.find_all_sessions_for_user(other.id).unwrap(), vec![theirs]);
}

fn list_options<D: Datastore>(ds: &D) {
    for name in ["delta", "alpha", "echo", "charlie", "bravo"] {
        ds.new_pack(&Pack::new(name)).unwrap();
    }
    let names = |packs: Vec<Pack>| packs.into_iter().map(|p| p.name).collect::<Vec<_>>();

    assert_eq!(
        names(ds.packs(&ListOptions::default()).unwrap()),
        vec!["delta", "alpha", "echo", "charlie", "bravo"]
    );
    assert_eq!(
        names(ds.packs(&ListOptions::page(0, 2)).unwrap()),
        vec!["delta", "alpha"]
    );
    assert_eq!(
        names(ds.packs(&ListOptions::page(2, 2)).unwrap()),
        vec!["bravo"]
    );
    assert!(ds.packs(&ListOptions::page(3, 2)).unwrap().is_empty());

    let by_name = ListOptions::default().ordered_by("name", OrderDirection::Ascending);
    assert_eq!(
        names(ds.packs(&by_name).unwrap()),
        vec!["alpha", "bravo", "charlie", "delta", "echo"]
    );
    let by_name_desc = ListOptions::page(0, 3).ordered_by("name", OrderDirection::Descending);
    assert_eq!(
        names(ds.packs(&by_name_desc).unwrap()),
        vec!["echo", "delta", "charlie"]
    );

    let bogus = ListOptions::default().ordered_by("password", OrderDirection::Ascending);
    assert!(matches!(ds.packs(&bogus), Err(DatastoreError::Invalid(_))));
    assert!(matches!(ds.users(&bogus), Err(DatastoreError::Invalid(_))));

    // hosts sort on their own time columns
    for (i, uuid) in ["h1", "h2", "h3"].iter().enumerate() {
        let mut host = fixture_host(uuid, "darwin");
        host.seen_time = at(100 - i as i64);
        ds.new_host(&host).unwrap();
    }
    let by_seen = ListOptions::default().ordered_by("seen_time", OrderDirection::Ascending);
    let uuids: Vec<String> = ds
        .hosts(&by_seen)
        .unwrap()
        .into_iter()
        .map(|h| h.uuid)
        .collect();
    assert_eq!(uuids, vec!["h3", "h2", "h1"]);
}

fn lifecycle<D: Datastore>(ds: &D) {
    assert!(!ds.name().is_empty());
    assert_eq!(ds.schema_version().unwrap(), migrations::latest_version());

    // migrating again is harmless and keeps data
    let pack = ds.new_pack(&Pack::new("kept")).unwrap();
    ds.migrate().unwrap();
    assert_eq!(ds.pack(pack.id).unwrap(), pack);
    assert_eq!(ds.schema_version().unwrap(), migrations::latest_version());

    ds.drop_all().unwrap();
    assert_eq!(ds.schema_version().unwrap(), 0);
    ds.migrate().unwrap();
    assert_eq!(ds.schema_version().unwrap(), migrations::latest_version());
    assert!(ds.packs(&ListOptions::default()).unwrap().is_empty());
    assert!(ds.users(&ListOptions::default()).unwrap().is_empty());

    let after = ds.new_pack(&Pack::new("kept")).unwrap();
    assert_eq!(ds.pack(after.id).unwrap().name, "kept");

    let expired = Utc::now() - Duration::hours(1);
    let user = ds.new_user(&fixture_user("late")).unwrap();
    let req = ds
        .new_password_reset_request(&PasswordResetRequest::new(user.id, "late", expired))
        .unwrap();
    assert!(req.is_expired(Utc::now()));
}
