//! Write-in-progress marker and root classification.
//!
//! A root is only ever trusted by reading the store back: the marker is set
//! strictly before a payload write and removed strictly after it, so a process
//! that dies in between leaves a root that [`classify_in`] reports as
//! [`RootState::Corrupted`].

use crate::core::broker::StoreBroker;
use crate::core::error::EngineError;
use crate::core::payload::{self, Subtree};
use crate::core::store::{KeyPath, SettingsStore, Value};
use serde::Serialize;

/// Marker value set on a root for the duration of a payload write.
pub const SAVE_IN_PROGRESS: &str = "Save In Progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootState {
    Absent,
    Empty,
    Valid,
    Corrupted,
}

impl RootState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootState::Absent => "absent",
            RootState::Empty => "empty",
            RootState::Valid => "valid",
            RootState::Corrupted => "corrupted",
        }
    }
}

impl std::fmt::Display for RootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_in(store: &dyn SettingsStore, root: &KeyPath) -> Result<RootState, EngineError> {
    if !store.key_exists(root)? {
        return Ok(RootState::Absent);
    }
    if store.has_value(root, SAVE_IN_PROGRESS)? {
        return Ok(RootState::Corrupted);
    }
    if store.key_exists(&payload::payload_location(root)?)? {
        return Ok(RootState::Valid);
    }
    Ok(RootState::Empty)
}

pub fn begin_write_in(store: &dyn SettingsStore, root: &KeyPath) -> Result<(), EngineError> {
    if store.key_exists(root)? && store.has_value(root, SAVE_IN_PROGRESS)? {
        return Err(EngineError::AlreadyCorrupted(root.to_string()));
    }
    store.create_key(root)?;
    store.set_value(root, SAVE_IN_PROGRESS, &Value::Dword(1))
}

pub fn end_write_in(store: &dyn SettingsStore, root: &KeyPath) -> Result<(), EngineError> {
    store.delete_value(root, SAVE_IN_PROGRESS)?;
    Ok(())
}

/// Brokered entry points for the marker protocol.
#[derive(Clone)]
pub struct AtomicSaveGuard {
    broker: StoreBroker,
}

impl AtomicSaveGuard {
    pub fn new(broker: StoreBroker) -> Self {
        Self { broker }
    }

    pub fn classify(&self, root: &KeyPath) -> Result<RootState, EngineError> {
        self.broker
            .with_store("guard.classify", |store| classify_in(store, root))
    }

    pub fn begin_write(&self, root: &KeyPath) -> Result<(), EngineError> {
        self.broker
            .with_store("guard.begin_write", |store| begin_write_in(store, root))
    }

    pub fn end_write(&self, root: &KeyPath) -> Result<(), EngineError> {
        self.broker
            .with_store("guard.end_write", |store| end_write_in(store, root))
    }

    /// Marker, payload replacement, marker removal, under one lock.
    ///
    /// If the payload write fails the marker stays behind and the root
    /// classifies as corrupted.
    pub fn save_payload(&self, root: &KeyPath, payload: &Subtree) -> Result<(), EngineError> {
        self.broker.with_store("guard.save_payload", |store| {
            begin_write_in(store, root)?;
            payload::replace_payload_in(store, root, payload)?;
            end_write_in(store, root)
        })
    }

    pub fn read_payload(&self, root: &KeyPath) -> Result<Option<Subtree>, EngineError> {
        self.broker
            .with_store("guard.read_payload", |store| payload::read_payload_in(store, root))
    }
}
