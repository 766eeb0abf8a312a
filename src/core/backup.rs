//! The single backup of the active root, and the quarantine slot next to it.
//!
//! Both live as siblings of root 0 (`<root0>.backup.<tag>` and
//! `<root0>.corrupted.<tag>`). A backup is trusted only once its completion
//! marker is present; anything else is discarded as a whole.

use crate::core::broker::StoreBroker;
use crate::core::error::EngineError;
use crate::core::guard::{self, RootState};
use crate::core::rename;
use crate::core::roots::VersionRootTable;
use crate::core::store::{KeyPath, SettingsStore, Value};
use serde::Serialize;

/// Completion marker set on the backup once the capture copy finished.
pub const BACKUP_COMPLETE: &str = "Copy Is OK";
pub const BACKUP_SUFFIX: &str = ".backup.3E9B7C14";
pub const QUARANTINE_SUFFIX: &str = ".corrupted.3E9B7C14";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Absent,
    Complete,
    Incomplete,
}

pub fn backup_location(root0: &KeyPath) -> KeyPath {
    root0.with_suffix(BACKUP_SUFFIX)
}

pub fn quarantine_location(root0: &KeyPath) -> KeyPath {
    root0.with_suffix(QUARANTINE_SUFFIX)
}

/// Reports the backup status. An incomplete backup is deleted before returning,
/// so it reads as `Absent` on the next call.
pub fn inspect_in(store: &dyn SettingsStore, root0: &KeyPath) -> Result<BackupStatus, EngineError> {
    let location = backup_location(root0);
    if !store.key_exists(&location)? {
        return Ok(BackupStatus::Absent);
    }
    if store.has_value(&location, BACKUP_COMPLETE)? {
        return Ok(BackupStatus::Complete);
    }
    store.delete_tree(&location)?;
    tracing::info!(backup = %location, "discarded incomplete backup");
    Ok(BackupStatus::Incomplete)
}

/// Moves root 0 into the quarantine slot, replacing any previous quarantine.
pub fn quarantine_in(store: &dyn SettingsStore, root0: &KeyPath) -> Result<KeyPath, EngineError> {
    let quarantine = quarantine_location(root0);
    if store.delete_tree(&quarantine)? {
        tracing::debug!(quarantine = %quarantine, "dropped previous quarantine");
    }
    rename::rename_in(store, root0, &quarantine)?;
    tracing::info!(root = %root0, quarantine = %quarantine, "quarantined corrupted root");
    Ok(quarantine)
}

pub fn promote_in(store: &dyn SettingsStore, root0: &KeyPath) -> Result<KeyPath, EngineError> {
    let state = guard::classify_in(store, root0)?;
    if state != RootState::Corrupted {
        return Err(EngineError::AmbiguousState(format!(
            "backup promotion requires a corrupted active root, found {}",
            state
        )));
    }
    require_complete(store, root0)?;

    let quarantine = quarantine_in(store, root0)?;
    restore_in(store, root0)?;
    tracing::info!(root = %root0, "promoted backup into active root");
    Ok(quarantine)
}

fn require_complete(store: &dyn SettingsStore, root0: &KeyPath) -> Result<KeyPath, EngineError> {
    let backup = backup_location(root0);
    if !store.key_exists(&backup)? || !store.has_value(&backup, BACKUP_COMPLETE)? {
        return Err(EngineError::AmbiguousState(format!(
            "a complete backup is required at {}",
            backup
        )));
    }
    Ok(backup)
}

/// Moves a complete backup into an empty root 0 slot and drops its marker.
///
/// Root 0 must not exist; the rename refuses an occupied destination.
pub fn restore_in(store: &dyn SettingsStore, root0: &KeyPath) -> Result<(), EngineError> {
    let backup = require_complete(store, root0)?;
    rename::rename_in(store, &backup, root0)?;
    store.delete_value(root0, BACKUP_COMPLETE)?;
    tracing::info!(root = %root0, "restored backup into empty active root");
    Ok(())
}

pub fn discard_in(store: &dyn SettingsStore, root0: &KeyPath) -> Result<bool, EngineError> {
    store.delete_tree(&backup_location(root0))
}

/// Host-side capture before a risky operation.
///
/// Skipped (returns `false`) when root 0 is absent or corrupted, so a bad root
/// never replaces a good backup. The completion marker is written last.
pub fn capture_in(store: &dyn SettingsStore, root0: &KeyPath) -> Result<bool, EngineError> {
    match guard::classify_in(store, root0)? {
        RootState::Absent | RootState::Corrupted => return Ok(false),
        RootState::Empty | RootState::Valid => {}
    }
    let backup = backup_location(root0);
    store.delete_tree(&backup)?;
    store.copy_tree(root0, &backup)?;
    store.set_value(&backup, BACKUP_COMPLETE, &Value::Dword(1))?;
    Ok(true)
}

#[derive(Clone)]
pub struct BackupManager {
    broker: StoreBroker,
    root0: KeyPath,
}

impl BackupManager {
    pub fn new(broker: StoreBroker, table: &VersionRootTable) -> Self {
        Self {
            broker,
            root0: table.active().location.clone(),
        }
    }

    pub fn location(&self) -> KeyPath {
        backup_location(&self.root0)
    }

    pub fn quarantine_location(&self) -> KeyPath {
        quarantine_location(&self.root0)
    }

    pub fn inspect(&self) -> Result<BackupStatus, EngineError> {
        self.broker
            .with_store("backup.inspect", |store| inspect_in(store, &self.root0))
    }

    /// Returns the quarantine location the corrupted root was moved to.
    pub fn promote(&self) -> Result<KeyPath, EngineError> {
        self.broker
            .with_store("backup.promote", |store| promote_in(store, &self.root0))
    }

    pub fn discard(&self) -> Result<bool, EngineError> {
        self.broker
            .with_store("backup.discard", |store| discard_in(store, &self.root0))
    }

    pub fn capture(&self) -> Result<bool, EngineError> {
        self.broker
            .with_store("backup.capture", |store| capture_in(store, &self.root0))
    }
}
