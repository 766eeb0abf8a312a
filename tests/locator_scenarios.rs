use assert_matches::assert_matches;
use cfgroots::core::backup::{self, BackupStatus};
use cfgroots::core::collaborator::{CollaboratorCall, MigrationChoice, ScriptedCollaborator};
use cfgroots::core::guard::{RootState, SAVE_IN_PROGRESS};
use cfgroots::core::locator::MigrationDecision;
use cfgroots::core::memory::{FaultStage, MemoryStore};
use cfgroots::core::payload::Subtree;
use cfgroots::core::roots::VersionRootTable;
use cfgroots::core::store::{KeyPath, SettingsStore, Value};
use cfgroots::{Engine, EngineError, ErrorKind};
use std::sync::{Arc, Mutex};

fn engine() -> (Arc<MemoryStore>, Engine) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone(), VersionRootTable::builtin());
    (store, engine)
}

fn location(engine: &Engine, index: usize) -> KeyPath {
    engine.table().get(index).expect("root in table").location.clone()
}

fn config(language: &str) -> Subtree {
    Subtree::new()
        .with_value("Language", Value::Str(language.to_string()))
        .with_key(
            "Left Panel",
            Subtree::new().with_value("Path", Value::Str(r"C:\Users".to_string())),
        )
}

fn write_valid(store: &MemoryStore, root: &KeyPath, language: &str) {
    config(language)
        .write_into(store, &root.join("Configuration").unwrap())
        .unwrap();
}

fn mark_corrupted(store: &MemoryStore, root: &KeyPath) {
    store.create_key(root).unwrap();
    store
        .set_value(root, SAVE_IN_PROGRESS, &Value::Dword(1))
        .unwrap();
}

#[test]
fn scenario_a_empty_store_uses_defaults() {
    let (_store, engine) = engine();
    let mut collaborator = ScriptedCollaborator::new();
    let plan = engine.locator().locate(&mut collaborator).unwrap();
    assert_eq!(plan.decision, MigrationDecision::UseDefaults);
    assert!(plan.candidates.is_empty());
    assert!(plan.delete_after_load.is_empty());
    assert!(!collaborator.was_consulted());
}

#[test]
fn scenario_b_single_older_candidate_load_and_delete() {
    let (store, engine) = engine();
    let root0 = location(&engine, 0);
    let root7 = location(&engine, 7);
    store.create_key(&root0).unwrap();
    write_valid(&store, &root7, "czech.slg");

    let mut collaborator =
        ScriptedCollaborator::new().answering(MigrationChoice::LoadAndDeleteRest(7));
    let plan = engine.locator().locate(&mut collaborator).unwrap();

    assert_eq!(plan.decision, MigrationDecision::LoadRoot(7));
    assert_eq!(
        plan.candidates.iter().map(|c| c.index).collect::<Vec<_>>(),
        vec![7]
    );
    assert_eq!(plan.delete_after_load, vec![7]);
    assert_eq!(collaborator.calls, vec![CollaboratorCall::MigrationChoice(vec![7])]);
    // The locator itself deletes nothing.
    assert!(store.key_exists(&root7).unwrap());

    let loaded = engine.guard().read_payload(&root7).unwrap().unwrap();
    assert_eq!(loaded, config("czech.slg"));
    let deleted = engine.cleanup().delete_superseded(&plan).unwrap();
    assert_eq!(deleted, vec![root7.clone()]);
    assert!(!store.key_exists(&root7).unwrap());
    assert_eq!(engine.guard().classify(&root0).unwrap(), RootState::Empty);
}

#[test]
fn scenario_c_corrupted_root_incomplete_backup() {
    let (store, engine) = engine();
    let root0 = location(&engine, 0);
    let root7 = location(&engine, 7);
    write_valid(&store, &root0, "english.slg");
    mark_corrupted(&store, &root0);
    store.create_key(&backup::backup_location(&root0)).unwrap();
    write_valid(&store, &root7, "czech.slg");

    let mut collaborator = ScriptedCollaborator::new()
        .confirming_cleanup(true)
        .answering(MigrationChoice::LoadIndex(7));
    let plan = engine.locator().locate(&mut collaborator).unwrap();

    assert_eq!(plan.recovery.backup, BackupStatus::Incomplete);
    assert!(plan.recovery.backup_discarded);
    assert!(!store.key_exists(&backup::backup_location(&root0)).unwrap());
    assert_eq!(
        plan.recovery.quarantined,
        Some(backup::quarantine_location(&root0))
    );
    assert_eq!(engine.guard().classify(&root0).unwrap(), RootState::Absent);
    assert_eq!(
        engine
            .guard()
            .classify(&backup::quarantine_location(&root0))
            .unwrap(),
        RootState::Corrupted
    );
    assert_eq!(
        collaborator.calls,
        vec![
            CollaboratorCall::CorruptedCleanup(0),
            CollaboratorCall::MigrationChoice(vec![7])
        ]
    );
    assert_eq!(plan.decision, MigrationDecision::LoadRoot(7));
    assert!(plan.delete_after_load.is_empty());
}

#[test]
fn newest_wins_regardless_of_older_roots() {
    let (store, engine) = engine();
    write_valid(&store, &location(&engine, 0), "english.slg");
    for index in [1, 5, 82] {
        write_valid(&store, &location(&engine, index), "czech.slg");
    }
    mark_corrupted(&store, &location(&engine, 3));

    let mut collaborator = ScriptedCollaborator::new();
    let plan = engine.locator().locate(&mut collaborator).unwrap();
    assert_eq!(plan.decision, MigrationDecision::LoadRoot(0));
    assert!(plan.candidates.is_empty());
    assert!(!collaborator.was_consulted());
}

#[test]
fn unneeded_complete_backup_is_discarded() {
    let (store, engine) = engine();
    let root0 = location(&engine, 0);
    write_valid(&store, &root0, "english.slg");
    assert!(engine.backup().capture().unwrap());

    let plan = engine
        .locator()
        .locate(&mut ScriptedCollaborator::new())
        .unwrap();
    assert_eq!(plan.decision, MigrationDecision::LoadRoot(0));
    assert_eq!(plan.recovery.backup, BackupStatus::Complete);
    assert!(plan.recovery.backup_discarded);
    assert_eq!(engine.backup().inspect().unwrap(), BackupStatus::Absent);
}

#[test]
fn corruption_is_invisible_with_a_backup() {
    let (store, engine) = engine();
    let root0 = location(&engine, 0);
    write_valid(&store, &root0, "english.slg");
    let before = engine
        .guard()
        .read_payload(&root0)
        .unwrap()
        .unwrap()
        .fingerprint()
        .unwrap();
    assert!(engine.backup().capture().unwrap());

    // Interrupted save: marker set, payload half rewritten.
    engine.guard().begin_write(&root0).unwrap();
    store
        .delete_tree(&root0.join(r"Configuration\Left Panel").unwrap())
        .unwrap();

    let mut collaborator = ScriptedCollaborator::new();
    let plan = engine.locator().locate(&mut collaborator).unwrap();

    assert_eq!(plan.decision, MigrationDecision::LoadRoot(0));
    assert_eq!(
        plan.recovery.promoted,
        Some(backup::quarantine_location(&root0))
    );
    assert!(!collaborator.was_consulted());
    assert_eq!(engine.guard().classify(&root0).unwrap(), RootState::Valid);
    assert!(!store.has_value(&root0, backup::BACKUP_COMPLETE).unwrap());
    assert_eq!(engine.backup().inspect().unwrap(), BackupStatus::Absent);
    let after = engine
        .guard()
        .read_payload(&root0)
        .unwrap()
        .unwrap()
        .fingerprint()
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn locator_is_idempotent() {
    let (store, engine) = engine();
    let root0 = location(&engine, 0);
    write_valid(&store, &root0, "english.slg");
    engine.backup().capture().unwrap();
    mark_corrupted(&store, &root0);
    write_valid(&store, &location(&engine, 12), "czech.slg");

    let locator = engine.locator();
    let first = locator.locate(&mut ScriptedCollaborator::new()).unwrap();
    let second = locator.locate(&mut ScriptedCollaborator::new()).unwrap();
    assert_eq!(first.decision, MigrationDecision::LoadRoot(0));
    assert_eq!(first.decision, second.decision);
    assert!(first.recovery.promoted.is_some());
    assert!(second.recovery.promoted.is_none());

    // Same for a run that ends at the collaborator.
    store.delete_tree(&root0).unwrap();
    let ask = || {
        let mut c = ScriptedCollaborator::new().answering(MigrationChoice::LoadIndex(12));
        locator.locate(&mut c).unwrap()
    };
    let third = ask();
    let fourth = ask();
    assert_eq!(third, fourth);
    assert_eq!(third.decision, MigrationDecision::LoadRoot(12));
}

#[test]
fn refused_cleanup_aborts_without_mutation() {
    let (store, engine) = engine();
    let root0 = location(&engine, 0);
    write_valid(&store, &root0, "english.slg");
    mark_corrupted(&store, &root0);
    write_valid(&store, &location(&engine, 2), "czech.slg");

    let mut collaborator = ScriptedCollaborator::new().confirming_cleanup(false);
    let plan = engine.locator().locate(&mut collaborator).unwrap();
    assert_eq!(plan.decision, MigrationDecision::Abort);
    assert_eq!(collaborator.calls, vec![CollaboratorCall::CorruptedCleanup(0)]);
    assert_eq!(engine.guard().classify(&root0).unwrap(), RootState::Corrupted);
}

#[test]
fn corrupted_older_roots_are_skipped() {
    let (store, engine) = engine();
    write_valid(&store, &location(&engine, 4), "czech.slg");
    mark_corrupted(&store, &location(&engine, 4));
    write_valid(&store, &location(&engine, 9), "german.slg");
    store.create_key(&location(&engine, 11)).unwrap();

    let mut collaborator =
        ScriptedCollaborator::new().answering(MigrationChoice::UseDefaultsAndDeleteAll);
    let plan = engine.locator().locate(&mut collaborator).unwrap();
    assert_eq!(plan.decision, MigrationDecision::UseDefaults);
    assert_eq!(
        plan.candidates.iter().map(|c| c.index).collect::<Vec<_>>(),
        vec![9]
    );
    assert_eq!(plan.delete_after_load, vec![9]);
}

#[test]
fn candidates_are_offered_newest_first_in_one_prompt() {
    let (store, engine) = engine();
    for index in [30, 2, 17] {
        write_valid(&store, &location(&engine, index), "czech.slg");
    }
    let mut collaborator = ScriptedCollaborator::new().answering(MigrationChoice::Abort);
    let plan = engine.locator().locate(&mut collaborator).unwrap();
    assert_eq!(plan.decision, MigrationDecision::Abort);
    assert_eq!(
        collaborator.calls,
        vec![CollaboratorCall::MigrationChoice(vec![2, 17, 30])]
    );
    assert_eq!(plan.candidates[0].label, engine.table().get(2).unwrap().label);
}

#[test]
fn selection_outside_candidates_is_ambiguous() {
    let (store, engine) = engine();
    write_valid(&store, &location(&engine, 3), "czech.slg");
    let mut collaborator =
        ScriptedCollaborator::new().answering(MigrationChoice::LoadAndDeleteRest(4));
    let err = engine.locator().locate(&mut collaborator).unwrap_err();
    assert_matches!(err, EngineError::AmbiguousState(_));
    assert_eq!(err.kind(), ErrorKind::AmbiguousState);
}

#[test]
fn failed_promotion_keeps_backup_until_it_can_be_restored() {
    let (store, engine) = engine();
    let root0 = location(&engine, 0);
    write_valid(&store, &root0, "english.slg");
    let original = engine.guard().read_payload(&root0).unwrap().unwrap();
    engine.backup().capture().unwrap();
    mark_corrupted(&store, &root0);

    store.inject_fault(FaultStage::Create);
    let mut collaborator = ScriptedCollaborator::new().confirming_cleanup(true);
    let first = engine.locator().locate(&mut collaborator).unwrap();
    store.clear_fault();

    assert!(first.recovery.promoted.is_none());
    assert!(first.recovery.quarantined.is_none());
    assert!(first.recovery.root0_deleted);
    assert!(!first.recovery.restored);
    assert!(first.recovery.backup_kept);
    assert!(!first.recovery.backup_discarded);
    assert_eq!(first.decision, MigrationDecision::UseDefaults);
    assert_eq!(collaborator.calls, vec![CollaboratorCall::CorruptedCleanup(0)]);
    assert_eq!(engine.backup().inspect().unwrap(), BackupStatus::Complete);

    // Next start: the empty slot is filled from the kept backup.
    let mut collaborator = ScriptedCollaborator::new();
    let second = engine.locator().locate(&mut collaborator).unwrap();
    assert!(!collaborator.was_consulted());
    assert!(second.recovery.restored);
    assert!(!second.recovery.backup_discarded);
    assert_eq!(second.decision, MigrationDecision::LoadRoot(0));
    assert_eq!(engine.guard().read_payload(&root0).unwrap(), Some(original));
    assert!(!store.has_value(&root0, backup::BACKUP_COMPLETE).unwrap());
    assert_eq!(engine.backup().inspect().unwrap(), BackupStatus::Absent);
}

#[test]
fn refused_cleanup_leaves_the_backup_untouched() {
    let (store, engine) = engine();
    let root0 = location(&engine, 0);
    write_valid(&store, &root0, "english.slg");
    engine.backup().capture().unwrap();
    mark_corrupted(&store, &root0);

    store.inject_fault(FaultStage::Create);
    let plan = engine
        .locator()
        .locate(&mut ScriptedCollaborator::new())
        .unwrap();
    store.clear_fault();

    assert_eq!(plan.decision, MigrationDecision::Abort);
    assert!(plan.recovery.backup_kept);
    assert_eq!(engine.guard().classify(&root0).unwrap(), RootState::Corrupted);
    assert_eq!(engine.backup().inspect().unwrap(), BackupStatus::Complete);

    let retry = engine
        .locator()
        .locate(&mut ScriptedCollaborator::new())
        .unwrap();
    assert!(retry.recovery.promoted.is_some());
    assert_eq!(retry.decision, MigrationDecision::LoadRoot(0));
}

/// Fails one `copy_tree` out of the given source, then behaves normally.
struct FlakyCopyStore {
    inner: MemoryStore,
    fail_copy_from: Mutex<Option<KeyPath>>,
}

impl FlakyCopyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_copy_from: Mutex::new(None),
        }
    }

    fn fail_next_copy_from(&self, src: KeyPath) {
        *self.fail_copy_from.lock().unwrap() = Some(src);
    }
}

impl SettingsStore for FlakyCopyStore {
    fn key_exists(&self, path: &KeyPath) -> Result<bool, EngineError> {
        self.inner.key_exists(path)
    }
    fn create_key(&self, path: &KeyPath) -> Result<(), EngineError> {
        self.inner.create_key(path)
    }
    fn delete_tree(&self, path: &KeyPath) -> Result<bool, EngineError> {
        self.inner.delete_tree(path)
    }
    fn get_value(&self, path: &KeyPath, name: &str) -> Result<Option<Value>, EngineError> {
        self.inner.get_value(path, name)
    }
    fn set_value(&self, path: &KeyPath, name: &str, value: &Value) -> Result<(), EngineError> {
        self.inner.set_value(path, name, value)
    }
    fn delete_value(&self, path: &KeyPath, name: &str) -> Result<bool, EngineError> {
        self.inner.delete_value(path, name)
    }
    fn copy_tree(&self, src: &KeyPath, dst: &KeyPath) -> Result<(), EngineError> {
        let mut armed = self.fail_copy_from.lock().unwrap();
        if armed.as_ref() == Some(src) {
            *armed = None;
            return Err(EngineError::StoreAccess(format!("copy from {} refused", src)));
        }
        drop(armed);
        self.inner.copy_tree(src, dst)
    }
    fn subkeys(&self, path: &KeyPath) -> Result<Vec<String>, EngineError> {
        self.inner.subkeys(path)
    }
    fn values(&self, path: &KeyPath) -> Result<Vec<(String, Value)>, EngineError> {
        self.inner.values(path)
    }
}

#[test]
fn promotion_failing_after_quarantine_restores_into_the_empty_slot() {
    let store = Arc::new(FlakyCopyStore::new());
    let engine = Engine::new(store.clone(), VersionRootTable::builtin());
    let root0 = location(&engine, 0);
    config("english.slg")
        .write_into(store.as_ref(), &root0.join("Configuration").unwrap())
        .unwrap();
    let original = engine.guard().read_payload(&root0).unwrap().unwrap();
    engine.backup().capture().unwrap();
    engine.guard().begin_write(&root0).unwrap();

    // Quarantine succeeds, moving the backup into root 0 does not.
    store.fail_next_copy_from(backup::backup_location(&root0));
    let mut collaborator = ScriptedCollaborator::new();
    let plan = engine.locator().locate(&mut collaborator).unwrap();

    assert!(!collaborator.was_consulted());
    assert!(plan.recovery.promoted.is_none());
    assert!(plan.recovery.restored);
    assert!(!plan.recovery.backup_kept);
    assert_eq!(plan.decision, MigrationDecision::LoadRoot(0));
    assert_eq!(engine.guard().read_payload(&root0).unwrap(), Some(original));
    assert_eq!(
        engine
            .guard()
            .classify(&backup::quarantine_location(&root0))
            .unwrap(),
        RootState::Corrupted
    );
    assert_eq!(engine.backup().inspect().unwrap(), BackupStatus::Absent);
}
