use cfgroots::core::broker::{self, StoreBroker};
use cfgroots::core::carryover::CarryOver;
use cfgroots::core::collaborator::ScriptedCollaborator;
use cfgroots::core::config::{self, CONFIG_FILE_NAME};
use cfgroots::core::db::{self, SqliteStore};
use cfgroots::core::error::{EngineError, ErrorKind};
use cfgroots::core::guard::{AtomicSaveGuard, RootState};
use cfgroots::core::memory::MemoryStore;
use cfgroots::core::payload::Subtree;
use cfgroots::core::roots::VersionRootTable;
use cfgroots::core::store::{KeyPath, SettingsStore, Value};
use cfgroots::Engine;
use rusqlite::params;
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn key(raw: &str) -> KeyPath {
    KeyPath::parse(raw).expect("valid key path")
}

#[test]
fn sqlite_store_schema_and_broker_audit() {
    let tmp = tempdir().expect("tempdir");
    let db_path = db::settings_db_path(tmp.path());
    let audit = tmp.path().join("audit.jsonl");

    let store = Arc::new(SqliteStore::open(&db_path).expect("open store"));
    let broker = StoreBroker::new(store)
        .with_audit_log(&audit)
        .with_actor("core-test");
    let guard = AtomicSaveGuard::new(broker.clone());
    let root = key(r"Software\Vendor\App 1");

    guard
        .save_payload(
            &root,
            &Subtree::new().with_value("Mode", Value::Dword(3)),
        )
        .expect("save");
    assert_eq!(guard.classify(&root).expect("classify"), RootState::Valid);
    assert!(guard.begin_write(&key(r"Software\Vendor\App 1")).is_ok());
    assert!(matches!(
        guard.begin_write(&root),
        Err(EngineError::AlreadyCorrupted(_))
    ));

    let events = broker::read_audit_log(&audit).expect("read audit");
    let ops: Vec<&str> = events.iter().map(|e| e.op.as_str()).collect();
    assert_eq!(
        ops,
        vec![
            "guard.save_payload",
            "guard.classify",
            "guard.begin_write",
            "guard.begin_write"
        ]
    );
    assert_eq!(events[3].status, "error");
    assert!(events[3].detail.as_deref().unwrap_or("").contains("already corrupted"));
    assert!(events.iter().all(|e| e.actor == "core-test"));

    let conn = db::db_connect(&db_path.to_string_lossy()).expect("db connect");
    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);
    let value_rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM key_values WHERE path_ci = ?1",
            params![root.canonical()],
            |row| row.get(0),
        )
        .expect("count values");
    assert_eq!(value_rows, 1, "only the write marker sits on the root key");
}

#[test]
fn broker_clones_serialize_concurrent_writers() {
    let store = Arc::new(MemoryStore::new());
    let broker = StoreBroker::new(store.clone());
    let counter = key(r"Software\Vendor\Counter");
    store.create_key(&counter).expect("create");
    store
        .set_value(&counter, "Hits", &Value::Dword(0))
        .expect("seed");

    let threads = 8;
    let rounds = 50;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let broker = broker.clone();
            let barrier = barrier.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..rounds {
                    broker
                        .with_store("test.increment", |s| {
                            let current = s
                                .get_value(&counter, "Hits")?
                                .and_then(|v| v.as_dword())
                                .unwrap_or(0);
                            thread::yield_now();
                            s.set_value(&counter, "Hits", &Value::Dword(current + 1))
                        })
                        .expect("increment");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread panicked");
    }

    let hits = store
        .get_value(&counter, "Hits")
        .expect("read")
        .and_then(|v| v.as_dword());
    assert_eq!(hits, Some((threads * rounds) as u32));
}

#[test]
fn engine_components_share_one_lock() {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store, VersionRootTable::builtin());
    let other = engine.clone();
    let root0 = engine.table().active().location.clone();

    let handle = thread::spawn(move || {
        other
            .guard()
            .save_payload(
                &other.table().active().location,
                &Subtree::new().with_value("Language", Value::Str("czech.slg".into())),
            )
            .expect("save from thread");
    });
    handle.join().expect("thread panicked");

    assert_eq!(engine.guard().classify(&root0).unwrap(), RootState::Valid);
    assert!(engine.backup().capture().unwrap());
}

#[test]
fn error_kinds_group_variants() {
    let cases = vec![
        (EngineError::StoreAccess("x".into()), ErrorKind::StoreAccess),
        (EngineError::ConfigError("x".into()), ErrorKind::StoreAccess),
        (EngineError::DestinationExists("x".into()), ErrorKind::StoreAccess),
        (EngineError::CreateFailed("x".into()), ErrorKind::StoreAccess),
        (EngineError::CopyFailed("x".into()), ErrorKind::StoreAccess),
        (EngineError::AlreadyCorrupted("x".into()), ErrorKind::Corruption),
        (EngineError::Corruption("x".into()), ErrorKind::Corruption),
        (EngineError::CycleExceeded { hops: 51 }, ErrorKind::CycleExceeded),
        (EngineError::AmbiguousState("x".into()), ErrorKind::AmbiguousState),
    ];
    for (err, kind) in cases {
        assert_eq!(err.kind(), kind, "{err}");
    }
    assert_eq!(
        EngineError::CycleExceeded { hops: 51 }.to_string(),
        "Import chain exceeded 51 hops"
    );
}

#[test]
fn config_file_drives_engine_open() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join(CONFIG_FILE_NAME);
    fs::write(
        &path,
        r#"
store = "data/settings.db"
audit_log = "audit.jsonl"

[[roots]]
location = 'Software\Vendor\App 2'
label = "2"

[[roots]]
location = 'Software\Vendor\App 1'
"#,
    )
    .expect("write config");

    let config = config::load_config(&path).expect("load");
    assert_eq!(config.store, tmp.path().join("data").join("settings.db"));
    let table = config.root_table().expect("table");
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(1).map(|r| r.label.as_str()), Some(r"Software\Vendor\App 1"));

    let engine = Engine::open(&config).expect("open engine");
    assert!(config.store.exists());
    assert_eq!(engine.broker().audit_log_path(), config.audit_log.as_deref());
    assert_eq!(
        engine.guard().classify(&key(r"Software\Vendor\App 2")).unwrap(),
        RootState::Absent
    );
}

#[test]
fn promotion_survives_an_unwritable_audit_log() {
    let tmp = tempdir().expect("tempdir");
    let config = config::EngineConfig {
        store: tmp.path().join("settings.db"),
        audit_log: Some(tmp.path().join("missing_dir").join("audit.jsonl")),
        ..config::EngineConfig::default()
    };
    let engine = Engine::open(&config).expect("open engine");
    let root0 = engine.table().active().location.clone();
    engine
        .guard()
        .save_payload(
            &root0,
            &Subtree::new().with_value("Language", Value::Str("english.slg".into())),
        )
        .expect("save with audit append failing");
    assert!(engine.backup().capture().expect("capture"));
    engine.guard().begin_write(&root0).expect("begin write");

    let mut collaborator = ScriptedCollaborator::new();
    let plan = engine.locator().locate(&mut collaborator).expect("locate");
    assert!(plan.recovery.promoted.is_some());
    assert!(plan.recovery.quarantined.is_none());
    assert!(!collaborator.was_consulted());
    assert_eq!(engine.guard().classify(&root0).unwrap(), RootState::Valid);
    assert!(!tmp.path().join("missing_dir").exists());
}

#[test]
fn duplicate_roots_in_config_are_rejected() {
    let err = config::parse_config(
        r#"
[[roots]]
location = 'Software\Vendor\App 2'

[[roots]]
location = 'SOFTWARE\vendor\app 2'
"#,
    )
    .expect_err("duplicates must fail");
    assert_eq!(err.kind(), ErrorKind::StoreAccess);
}

#[test]
fn carryover_reads_newest_valid_older_root_only() {
    let store = Arc::new(MemoryStore::new());
    let table = VersionRootTable::from_entries(vec![
        (r"S\App 3".to_string(), "3".to_string()),
        (r"S\App 2".to_string(), "2".to_string()),
        (r"S\App 1".to_string(), "1".to_string()),
    ])
    .unwrap();
    let engine = Engine::new(store.clone(), table.clone());

    for (root, mode) in [(r"S\App 2", 2u32), (r"S\App 1", 1u32)] {
        let location = key(root);
        engine
            .guard()
            .save_payload(
                &location,
                &Subtree::new().with_key(
                    "Viewer",
                    Subtree::new().with_value("Mode", Value::Dword(mode)),
                ),
            )
            .unwrap();
    }

    let carry = CarryOver::new(engine.broker().clone(), table);
    let found = carry.lookup("Viewer", "Mode", 0).unwrap().expect("value");
    assert_eq!(found.index, 1);
    assert_eq!(found.value, Value::Dword(2));
    assert!(carry.lookup("Viewer", "Mode", 3).unwrap().is_none());

    engine
        .guard()
        .save_payload(&key(r"S\App 3"), &Subtree::new())
        .unwrap();
    assert!(carry.lookup("Viewer", "Mode", 0).unwrap().is_none());
}
