//! Single-value lookups from an older configuration.
//!
//! Before root 0 has a configuration of its own, a host may want one setting
//! from the previous install (typically the UI language) without running a full
//! migration. Only the newest valid older root is consulted, and only if its
//! stored schema version is recent enough for the value to mean the same thing.

use crate::core::broker::StoreBroker;
use crate::core::error::EngineError;
use crate::core::guard::{self, RootState};
use crate::core::payload;
use crate::core::roots::VersionRootTable;
use crate::core::store::{KeyPath, SettingsStore, Value};
use serde::Serialize;

pub const VERSION_KEY: &str = "Version";
pub const VERSION_VALUE: &str = "Configuration";

/// Stored schema version of a root.
///
/// Roots older than the `Version` key report 1; a `Version` key without the
/// value reports 2.
pub fn schema_version_in(store: &dyn SettingsStore, root: &KeyPath) -> Result<u32, EngineError> {
    let version_key = root.join(VERSION_KEY)?;
    if !store.key_exists(&version_key)? {
        return Ok(1);
    }
    Ok(store
        .get_value(&version_key, VERSION_VALUE)?
        .and_then(|v| v.as_dword())
        .unwrap_or(2))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarriedValue {
    pub index: usize,
    pub label: String,
    pub schema_version: u32,
    pub value: Value,
}

pub struct CarryOver {
    broker: StoreBroker,
    table: VersionRootTable,
}

impl CarryOver {
    pub fn new(broker: StoreBroker, table: VersionRootTable) -> Self {
        Self { broker, table }
    }

    /// Looks up `name` under `relative` (a path inside the payload, empty for the
    /// payload key itself).
    ///
    /// Returns `None` when root 0 is already valid, when no older root is valid,
    /// or when the newest valid older root is below `min_version`.
    pub fn lookup(
        &self,
        relative: &str,
        name: &str,
        min_version: u32,
    ) -> Result<Option<CarriedValue>, EngineError> {
        self.broker.with_store("carryover.lookup", |store| {
            if guard::classify_in(store, &self.table.active().location)? == RootState::Valid {
                return Ok(None);
            }
            for root in self.table.older() {
                if guard::classify_in(store, &root.location)? != RootState::Valid {
                    continue;
                }
                let schema_version = schema_version_in(store, &root.location)?;
                if schema_version < min_version {
                    tracing::debug!(
                        index = root.index,
                        schema_version,
                        min_version,
                        "previous configuration too old to carry over"
                    );
                    return Ok(None);
                }
                let mut key = payload::payload_location(&root.location)?;
                if !relative.trim_matches('\\').is_empty() {
                    key = key.join(relative)?;
                }
                return Ok(store.get_value(&key, name)?.map(|value| CarriedValue {
                    index: root.index,
                    label: root.label.clone(),
                    schema_version,
                    value,
                }));
            }
            Ok(None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryStore;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, CarryOver) {
        let store = Arc::new(MemoryStore::new());
        let table = VersionRootTable::from_entries(vec![
            (r"S\App 3".to_string(), "3".to_string()),
            (r"S\App 2".to_string(), "2".to_string()),
            (r"S\App 1".to_string(), "1".to_string()),
        ])
        .unwrap();
        (store.clone(), CarryOver::new(StoreBroker::new(store), table))
    }

    fn key(raw: &str) -> KeyPath {
        KeyPath::parse(raw).unwrap()
    }

    #[test]
    fn schema_version_defaults() {
        let (store, _) = setup();
        let root = key(r"S\App 2");
        store.create_key(&root).unwrap();
        assert_eq!(schema_version_in(store.as_ref(), &root).unwrap(), 1);
        store.create_key(&root.join("Version").unwrap()).unwrap();
        assert_eq!(schema_version_in(store.as_ref(), &root).unwrap(), 2);
        store
            .set_value(&root.join("Version").unwrap(), VERSION_VALUE, &Value::Dword(61))
            .unwrap();
        assert_eq!(schema_version_in(store.as_ref(), &root).unwrap(), 61);
    }

    #[test]
    fn newest_valid_older_root_supplies_the_value() {
        let (store, carry) = setup();
        let cfg = key(r"S\App 2\Configuration");
        store.create_key(&cfg).unwrap();
        store
            .set_value(&cfg, "Language", &Value::Str("czech.slg".into()))
            .unwrap();
        store.create_key(&key(r"S\App 2\Version")).unwrap();
        store
            .set_value(&key(r"S\App 2\Version"), VERSION_VALUE, &Value::Dword(59))
            .unwrap();

        let carried = carry.lookup("", "Language", 59).unwrap().unwrap();
        assert_eq!(carried.index, 1);
        assert_eq!(carried.value, Value::Str("czech.slg".into()));
        assert_eq!(carry.lookup("", "Language", 60).unwrap(), None);
    }

    #[test]
    fn nothing_is_carried_once_root0_is_valid() {
        let (store, carry) = setup();
        store.create_key(&key(r"S\App 3\Configuration")).unwrap();
        store.create_key(&key(r"S\App 2\Configuration")).unwrap();
        assert_eq!(carry.lookup("", "Language", 1).unwrap(), None);
    }
}
