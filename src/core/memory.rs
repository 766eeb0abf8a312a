//! In-process settings store.
//!
//! Backs unit and integration tests and hosts that keep settings only for the
//! lifetime of the process. A fault injector lets tests fail a single structural
//! step and observe that the engine leaves the store reclassifiable.

use crate::core::error::EngineError;
use crate::core::store::{KeyPath, SEPARATOR, SettingsStore, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Structural step that an injected fault fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStage {
    /// `create_key` fails before touching the tree.
    Create,
    /// `copy_tree` copies roughly half of the subtree, then fails.
    Copy,
    /// `delete_tree` fails before touching the tree.
    Delete,
}

#[derive(Debug, Clone)]
struct Node {
    path: KeyPath,
    values: BTreeMap<String, (String, Value)>,
}

type Tree = BTreeMap<String, Node>;

#[derive(Default)]
pub struct MemoryStore {
    keys: Mutex<Tree>,
    fault: Mutex<Option<FaultStage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every subsequent call of the given stage until [`clear_fault`](Self::clear_fault).
    pub fn inject_fault(&self, stage: FaultStage) {
        if let Ok(mut fault) = self.fault.lock() {
            *fault = Some(stage);
        }
    }

    pub fn clear_fault(&self) {
        if let Ok(mut fault) = self.fault.lock() {
            *fault = None;
        }
    }

    /// Number of keys currently in the store.
    pub fn key_count(&self) -> usize {
        self.keys.lock().map(|keys| keys.len()).unwrap_or(0)
    }

    fn tree(&self) -> Result<MutexGuard<'_, Tree>, EngineError> {
        self.keys
            .lock()
            .map_err(|_| EngineError::StoreAccess("MemoryStore lock poisoned".to_string()))
    }

    fn check_fault(&self, stage: FaultStage) -> bool {
        self.fault.lock().map(|f| *f == Some(stage)).unwrap_or(false)
    }
}

fn subtree_prefix(canonical: &str) -> String {
    let mut prefix = canonical.to_string();
    prefix.push(SEPARATOR);
    prefix
}

fn in_subtree(candidate: &str, canonical: &str, prefix: &str) -> bool {
    candidate == canonical || candidate.starts_with(prefix)
}

fn insert_with_ancestors(tree: &mut Tree, path: &KeyPath) {
    for ancestor in path.lineage() {
        tree.entry(ancestor.canonical()).or_insert_with(|| Node {
            path: ancestor,
            values: BTreeMap::new(),
        });
    }
}

impl SettingsStore for MemoryStore {
    fn key_exists(&self, path: &KeyPath) -> Result<bool, EngineError> {
        Ok(self.tree()?.contains_key(&path.canonical()))
    }

    fn create_key(&self, path: &KeyPath) -> Result<(), EngineError> {
        if self.check_fault(FaultStage::Create) {
            return Err(EngineError::StoreAccess(format!(
                "STORE_FAULT_INJECTED stage=create key={}",
                path
            )));
        }
        let mut tree = self.tree()?;
        insert_with_ancestors(&mut tree, path);
        Ok(())
    }

    fn delete_tree(&self, path: &KeyPath) -> Result<bool, EngineError> {
        if self.check_fault(FaultStage::Delete) {
            return Err(EngineError::StoreAccess(format!(
                "STORE_FAULT_INJECTED stage=delete key={}",
                path
            )));
        }
        let mut tree = self.tree()?;
        let canonical = path.canonical();
        let prefix = subtree_prefix(&canonical);
        let before = tree.len();
        tree.retain(|k, _| !in_subtree(k, &canonical, &prefix));
        Ok(tree.len() != before)
    }

    fn get_value(&self, path: &KeyPath, name: &str) -> Result<Option<Value>, EngineError> {
        let tree = self.tree()?;
        Ok(tree
            .get(&path.canonical())
            .and_then(|node| node.values.get(&name.to_lowercase()))
            .map(|(_, v)| v.clone()))
    }

    fn set_value(&self, path: &KeyPath, name: &str, value: &Value) -> Result<(), EngineError> {
        let mut tree = self.tree()?;
        let node = tree
            .get_mut(&path.canonical())
            .ok_or_else(|| EngineError::StoreAccess(format!("key does not exist: {}", path)))?;
        node.values
            .insert(name.to_lowercase(), (name.to_string(), value.clone()));
        Ok(())
    }

    fn delete_value(&self, path: &KeyPath, name: &str) -> Result<bool, EngineError> {
        let mut tree = self.tree()?;
        Ok(match tree.get_mut(&path.canonical()) {
            Some(node) => node.values.remove(&name.to_lowercase()).is_some(),
            None => false,
        })
    }

    fn copy_tree(&self, src: &KeyPath, dst: &KeyPath) -> Result<(), EngineError> {
        let mut tree = self.tree()?;
        let canonical = src.canonical();
        if !tree.contains_key(&canonical) {
            return Err(EngineError::StoreAccess(format!(
                "source key does not exist: {}",
                src
            )));
        }
        let prefix = subtree_prefix(&canonical);
        let nodes: Vec<Node> = tree
            .iter()
            .filter(|(k, _)| in_subtree(k, &canonical, &prefix))
            .map(|(_, n)| n.clone())
            .collect();

        let limit = if self.check_fault(FaultStage::Copy) {
            Some(nodes.len() / 2)
        } else {
            None
        };

        insert_with_ancestors(&mut tree, dst);
        for (copied, node) in nodes.into_iter().enumerate() {
            if limit == Some(copied) {
                return Err(EngineError::StoreAccess(format!(
                    "STORE_FAULT_INJECTED stage=copy src={} dst={}",
                    src, dst
                )));
            }
            let target = match node.path.strip_prefix(src) {
                Some(rel) => dst.join_segments(&rel),
                None => dst.clone(),
            };
            insert_with_ancestors(&mut tree, &target);
            if let Some(entry) = tree.get_mut(&target.canonical()) {
                entry.values.extend(node.values);
            }
        }
        Ok(())
    }

    fn subkeys(&self, path: &KeyPath) -> Result<Vec<String>, EngineError> {
        let tree = self.tree()?;
        let depth = path.segments().len() + 1;
        let prefix = subtree_prefix(&path.canonical());
        Ok(tree
            .iter()
            .filter(|(k, n)| k.starts_with(&prefix) && n.path.segments().len() == depth)
            .map(|(_, n)| n.path.name().to_string())
            .collect())
    }

    fn values(&self, path: &KeyPath) -> Result<Vec<(String, Value)>, EngineError> {
        let tree = self.tree()?;
        Ok(tree
            .get(&path.canonical())
            .map(|node| node.values.values().cloned().collect())
            .unwrap_or_default())
    }
}
