//! Opaque settings payload: the `Configuration` subtree of a root.
//!
//! The engine never interprets payload fields. It only snapshots, replaces and
//! fingerprints whole subtrees so a copy can be proven exact.

use crate::core::error::EngineError;
use crate::core::store::{KeyPath, SettingsStore, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Name of the payload subkey under every root.
pub const PAYLOAD_KEY: &str = "Configuration";

/// Serializable snapshot of one key and everything below it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subtree {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Subtree>,
}

impl Subtree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn with_key(mut self, name: &str, child: Subtree) -> Self {
        self.keys.insert(name.to_string(), child);
        self
    }

    /// Reads `path` and all of its descendants.
    pub fn capture(store: &dyn SettingsStore, path: &KeyPath) -> Result<Self, EngineError> {
        let mut out = Subtree::new();
        for (name, value) in store.values(path)? {
            out.values.insert(name, value);
        }
        for name in store.subkeys(path)? {
            let child = path.join(&name)?;
            out.keys.insert(name, Self::capture(store, &child)?);
        }
        Ok(out)
    }

    /// Creates `path` and writes every value and child key below it.
    pub fn write_into(&self, store: &dyn SettingsStore, path: &KeyPath) -> Result<(), EngineError> {
        store.create_key(path)?;
        for (name, value) in &self.values {
            store.set_value(path, name, value)?;
        }
        for (name, child) in &self.keys {
            child.write_into(store, &path.join(name)?)?;
        }
        Ok(())
    }

    /// Case-folded copy; names differing only by case collapse the way the store does.
    pub fn canonicalized(&self) -> Self {
        Subtree {
            values: self
                .values
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
            keys: self
                .keys
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.canonicalized()))
                .collect(),
        }
    }

    /// SHA-256 of the canonical JSON form, hex encoded.
    pub fn fingerprint(&self) -> Result<String, EngineError> {
        let bytes = serde_json::to_vec(&self.canonicalized())?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn value_count(&self) -> usize {
        self.values.len() + self.keys.values().map(Subtree::value_count).sum::<usize>()
    }
}

pub fn payload_location(root: &KeyPath) -> Result<KeyPath, EngineError> {
    root.join(PAYLOAD_KEY)
}

/// Payload of `root`, or `None` when the root holds no `Configuration` subkey.
pub fn read_payload_in(
    store: &dyn SettingsStore,
    root: &KeyPath,
) -> Result<Option<Subtree>, EngineError> {
    let location = payload_location(root)?;
    if !store.key_exists(&location)? {
        return Ok(None);
    }
    Subtree::capture(store, &location).map(Some)
}

/// Replaces the payload of `root`. Callers guard this with the write marker.
pub(crate) fn replace_payload_in(
    store: &dyn SettingsStore,
    root: &KeyPath,
    payload: &Subtree,
) -> Result<(), EngineError> {
    let location = payload_location(root)?;
    store.delete_tree(&location)?;
    payload.write_into(store, &location)
}
