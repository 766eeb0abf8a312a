//! Import pointer resolution.
//!
//! An upgraded release leaves `AutoImportConfig` on its fresh root, naming the
//! root it should inherit from. Pointers are resolved against the parent of the
//! active root and may chain; the chain is followed for at most
//! [`MAX_IMPORT_HOPS`] pointers.

use crate::core::broker::StoreBroker;
use crate::core::error::EngineError;
use crate::core::guard::{self, RootState};
use crate::core::roots::VersionRootTable;
use crate::core::store::{KeyPath, SettingsStore, Value};
use serde::Serialize;

/// String value naming the root to import from, relative to the active root's parent.
pub const IMPORT_POINTER: &str = "AutoImportConfig";

pub const MAX_IMPORT_HOPS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidImport {
    /// A pointer in the chain names the active root.
    SelfPointer,
    /// The pointer is malformed or names a key that does not exist.
    Unreachable,
    /// The final target carries a write-in-progress marker.
    Corrupted,
    /// The final target holds no configuration.
    EmptyTarget,
    /// More than [`MAX_IMPORT_HOPS`] pointers.
    CycleExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportTarget {
    pub source: KeyPath,
    /// Pointers followed to reach `source`.
    pub hops: usize,
    pub active_state: RootState,
    /// The active root already holds its own configuration.
    pub conflict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", content = "detail", rename_all = "snake_case")]
pub enum Resolution {
    NoPointer,
    Target(ImportTarget),
    Invalid(InvalidImport),
}

pub fn read_pointer_in(
    store: &dyn SettingsStore,
    root: &KeyPath,
) -> Result<Option<String>, EngineError> {
    Ok(store
        .get_value(root, IMPORT_POINTER)?
        .and_then(|v| v.as_str().map(str::to_string)))
}

pub fn clear_pointer_in(store: &dyn SettingsStore, root: &KeyPath) -> Result<bool, EngineError> {
    store.delete_value(root, IMPORT_POINTER)
}

/// Read-only; the caller decides whether to clear an invalid pointer.
pub fn resolve_in(store: &dyn SettingsStore, root0: &KeyPath) -> Result<Resolution, EngineError> {
    if !store.key_exists(root0)? {
        return Ok(Resolution::NoPointer);
    }
    let Some(mut pointer) = read_pointer_in(store, root0)? else {
        return Ok(Resolution::NoPointer);
    };

    let mut hops = 0;
    let source = loop {
        hops += 1;
        if hops > MAX_IMPORT_HOPS {
            tracing::warn!(root = %root0, "import chain exceeded {} hops", MAX_IMPORT_HOPS);
            return Ok(Resolution::Invalid(InvalidImport::CycleExceeded));
        }
        let Ok(target) = root0.sibling(&pointer) else {
            return Ok(Resolution::Invalid(InvalidImport::Unreachable));
        };
        if &target == root0 {
            return Ok(Resolution::Invalid(InvalidImport::SelfPointer));
        }
        if !store.key_exists(&target)? {
            return Ok(Resolution::Invalid(InvalidImport::Unreachable));
        }
        match read_pointer_in(store, &target)? {
            Some(next) => pointer = next,
            None => break target,
        }
    };

    match guard::classify_in(store, &source)? {
        RootState::Valid => {}
        RootState::Corrupted => return Ok(Resolution::Invalid(InvalidImport::Corrupted)),
        RootState::Absent | RootState::Empty => {
            return Ok(Resolution::Invalid(InvalidImport::EmptyTarget));
        }
    }

    let active_state = guard::classify_in(store, root0)?;
    Ok(Resolution::Target(ImportTarget {
        source,
        hops,
        active_state,
        conflict: active_state == RootState::Valid,
    }))
}

#[derive(Clone)]
pub struct ImportResolver {
    broker: StoreBroker,
    root0: KeyPath,
}

impl ImportResolver {
    pub fn new(broker: StoreBroker, table: &VersionRootTable) -> Self {
        Self {
            broker,
            root0: table.active().location.clone(),
        }
    }

    pub fn resolve(&self) -> Result<Resolution, EngineError> {
        self.broker
            .with_store("import.resolve", |store| resolve_in(store, &self.root0))
    }

    pub fn pointer(&self) -> Result<Option<String>, EngineError> {
        self.broker
            .with_store("import.pointer", |store| read_pointer_in(store, &self.root0))
    }

    /// Writes the pointer on root 0, creating the root when needed.
    pub fn set_pointer(&self, relative: &str) -> Result<(), EngineError> {
        KeyPath::parse(relative)?;
        self.broker.with_store("import.set", |store| {
            store.create_key(&self.root0)?;
            store.set_value(&self.root0, IMPORT_POINTER, &Value::Str(relative.to_string()))
        })
    }

    pub fn clear_pointer(&self) -> Result<bool, EngineError> {
        self.broker
            .with_store("import.clear", |store| clear_pointer_in(store, &self.root0))
    }
}
