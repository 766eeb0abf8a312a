//! Copy-then-delete subtree rename.
//!
//! The store has no native rename. The source is deleted only after the copy
//! has fully succeeded; a half-written destination is removed again.

use crate::core::broker::StoreBroker;
use crate::core::error::EngineError;
use crate::core::store::{KeyPath, SettingsStore};

pub fn rename_in(store: &dyn SettingsStore, src: &KeyPath, dst: &KeyPath) -> Result<(), EngineError> {
    if !store.key_exists(src)? {
        return Err(EngineError::StoreAccess(format!(
            "rename source does not exist: {}",
            src
        )));
    }
    if store.key_exists(dst)? {
        return Err(EngineError::DestinationExists(dst.to_string()));
    }

    store
        .create_key(dst)
        .map_err(|e| EngineError::CreateFailed(format!("{}: {}", dst, e)))?;

    if let Err(e) = store.copy_tree(src, dst) {
        if let Err(cleanup) = store.delete_tree(dst) {
            tracing::warn!(dst = %dst, error = %cleanup, "could not remove partial rename destination");
        }
        return Err(EngineError::CopyFailed(format!("{} -> {}: {}", src, dst, e)));
    }

    store.delete_tree(src)?;
    tracing::debug!(src = %src, dst = %dst, "renamed subtree");
    Ok(())
}

#[derive(Clone)]
pub struct KeyRenamer {
    broker: StoreBroker,
}

impl KeyRenamer {
    pub fn new(broker: StoreBroker) -> Self {
        Self { broker }
    }

    pub fn rename(&self, src: &KeyPath, dst: &KeyPath) -> Result<(), EngineError> {
        self.broker
            .with_store("rename", |store| rename_in(store, src, dst))
    }
}
