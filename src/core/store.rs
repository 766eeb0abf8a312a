//! Store abstraction for the hierarchical settings store.
//!
//! The store is a tree of keys addressed by backslash-separated, case-insensitive
//! paths. Each key holds named, typed values and any number of subkeys. The engine
//! only ever needs whole-subtree copy and delete on top of single-value access,
//! so that is all the trait exposes.

use crate::core::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Separator between key path segments.
pub const SEPARATOR: char = '\\';

/// Location of a key inside the settings store.
///
/// Comparison, hashing and ordering are case-insensitive; the original spelling is
/// kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Parses `Software\Vendor\App`. Leading and trailing separators are ignored,
    /// empty inner segments are rejected.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let trimmed = raw.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Err(EngineError::StoreAccess(format!(
                "invalid key path {:?}: empty",
                raw
            )));
        }
        let mut segments = Vec::new();
        for segment in trimmed.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(EngineError::StoreAccess(format!(
                    "invalid key path {:?}: empty segment",
                    raw
                )));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Splits a compile-time location; empty segments are dropped instead of
    /// rejected, so this never fails.
    pub(crate) fn from_literal(raw: &'static str) -> Self {
        Self {
            segments: raw
                .split(SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Case-folded form used for comparison and as the storage key.
    pub fn canonical(&self) -> String {
        self.to_string().to_lowercase()
    }

    pub fn parent(&self) -> Option<KeyPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Appends a relative path (which may itself contain separators).
    pub fn join(&self, relative: &str) -> Result<KeyPath, EngineError> {
        let tail = KeyPath::parse(relative)?;
        let mut segments = self.segments.clone();
        segments.extend(tail.segments);
        Ok(Self { segments })
    }

    /// Resolves `relative` against this key's parent, i.e. a sibling location.
    pub fn sibling(&self, relative: &str) -> Result<KeyPath, EngineError> {
        match self.parent() {
            Some(parent) => parent.join(relative),
            None => KeyPath::parse(relative),
        }
    }

    /// Same location with `suffix` appended to the last segment.
    pub fn with_suffix(&self, suffix: &str) -> KeyPath {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            last.push_str(suffix);
        }
        Self { segments }
    }

    /// This key and each of its ancestors, outermost first.
    pub fn lineage(&self) -> Vec<KeyPath> {
        (1..=self.segments.len())
            .map(|n| Self {
                segments: self.segments[..n].to_vec(),
            })
            .collect()
    }

    /// Appends already-split segments, as returned by [`strip_prefix`](Self::strip_prefix).
    pub fn join_segments(&self, relative: &[String]) -> KeyPath {
        let mut segments = self.segments.clone();
        segments.extend(relative.iter().cloned());
        Self { segments }
    }

    /// True when `other` lies strictly below this key.
    pub fn is_ancestor_of(&self, other: &KeyPath) -> bool {
        other.segments.len() > self.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a.to_lowercase() == b.to_lowercase())
    }

    /// Location relative to `ancestor`, or `None` when it is not below it.
    pub fn strip_prefix(&self, ancestor: &KeyPath) -> Option<Vec<String>> {
        if !ancestor.is_ancestor_of(self) {
            return None;
        }
        Some(self.segments[ancestor.segments.len()..].to_vec())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = String::new();
        sep.push(SEPARATOR);
        write!(f, "{}", self.segments.join(&sep))
    }
}

impl PartialEq for KeyPath {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for KeyPath {}

impl Hash for KeyPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl PartialOrd for KeyPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl TryFrom<String> for KeyPath {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        KeyPath::parse(&value)
    }
}

impl From<KeyPath> for String {
    fn from(value: KeyPath) -> Self {
        value.to_string()
    }
}

/// A typed value stored under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Value {
    Dword(u32),
    Str(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dword(&self) -> Option<u32> {
        match self {
            Value::Dword(v) => Some(*v),
            _ => None,
        }
    }
}

/// Hierarchical key-value settings store.
///
/// Implementations synchronize internally; structural consistency across several
/// calls is the job of [`crate::core::broker::StoreBroker`].
pub trait SettingsStore: Send + Sync {
    fn key_exists(&self, path: &KeyPath) -> Result<bool, EngineError>;

    /// Creates the key and any missing ancestors. Existing keys are left alone.
    fn create_key(&self, path: &KeyPath) -> Result<(), EngineError>;

    /// Deletes the key with all subkeys and values. Returns `false` if it did not exist.
    fn delete_tree(&self, path: &KeyPath) -> Result<bool, EngineError>;

    fn get_value(&self, path: &KeyPath, name: &str) -> Result<Option<Value>, EngineError>;

    /// Sets a value on an existing key.
    fn set_value(&self, path: &KeyPath, name: &str, value: &Value) -> Result<(), EngineError>;

    /// Returns `false` if the key or the value did not exist.
    fn delete_value(&self, path: &KeyPath, name: &str) -> Result<bool, EngineError>;

    /// Copies all values and subkeys of `src` into `dst`, creating `dst` if needed.
    fn copy_tree(&self, src: &KeyPath, dst: &KeyPath) -> Result<(), EngineError>;

    /// Names of the direct subkeys, sorted case-insensitively.
    fn subkeys(&self, path: &KeyPath) -> Result<Vec<String>, EngineError>;

    /// Values of the key, sorted case-insensitively by name.
    fn values(&self, path: &KeyPath) -> Result<Vec<(String, Value)>, EngineError>;

    fn has_value(&self, path: &KeyPath, name: &str) -> Result<bool, EngineError> {
        Ok(self.get_value(path, name)?.is_some())
    }
}
