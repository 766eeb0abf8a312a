//! Decision points the engine cannot settle on its own.
//!
//! The collaborator is called synchronously and never while the store lock is
//! held. Hosts plug in a UI; tests and the CLI use [`ScriptedCollaborator`].

use crate::core::roots::ConfigRoot;
use crate::core::store::KeyPath;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// An older root that holds a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub index: usize,
    pub label: String,
    pub location: KeyPath,
}

impl From<&ConfigRoot> for Candidate {
    fn from(root: &ConfigRoot) -> Self {
        Self {
            index: root.index,
            label: root.label.clone(),
            location: root.location.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationChoice {
    LoadIndex(usize),
    LoadAndDeleteRest(usize),
    UseDefaultsAndDeleteAll,
    Abort,
}

impl FromStr for MigrationChoice {
    type Err = String;

    /// `load:<index>`, `load-delete:<index>`, `defaults-delete` or `abort`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let parse_index = |raw: &str| {
            raw.parse::<usize>()
                .map_err(|_| format!("invalid root index: {}", raw))
        };
        if let Some(index) = s.strip_prefix("load-delete:") {
            return Ok(MigrationChoice::LoadAndDeleteRest(parse_index(index)?));
        }
        if let Some(index) = s.strip_prefix("load:") {
            return Ok(MigrationChoice::LoadIndex(parse_index(index)?));
        }
        match s.as_str() {
            "defaults-delete" => Ok(MigrationChoice::UseDefaultsAndDeleteAll),
            "abort" => Ok(MigrationChoice::Abort),
            other => Err(format!(
                "unknown migration answer '{}' (expected load:<i>, load-delete:<i>, defaults-delete, abort)",
                other
            )),
        }
    }
}

/// Pending import onto an active root that already holds a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportConflict {
    pub active: KeyPath,
    pub source: KeyPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportChoice {
    KeepCurrent,
    Overwrite,
    Abort,
}

impl FromStr for ImportChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "keep-current" => Ok(ImportChoice::KeepCurrent),
            "overwrite" => Ok(ImportChoice::Overwrite),
            "abort" => Ok(ImportChoice::Abort),
            other => Err(format!(
                "unknown import answer '{}' (expected keep, overwrite, abort)",
                other
            )),
        }
    }
}

pub trait DecisionCollaborator {
    /// Called at most once per locator run, with every candidate newest first.
    fn ask_for_migration_choice(&mut self, candidates: &[Candidate]) -> MigrationChoice;

    fn ask_for_import_conflict(&mut self, conflict: &ImportConflict) -> ImportChoice;

    /// Root 0 is corrupted and no backup can restore it. `true` allows it to be
    /// moved out of the way.
    fn confirm_corrupted_cleanup(&mut self, root: &ConfigRoot) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorCall {
    MigrationChoice(Vec<usize>),
    ImportConflict(KeyPath),
    CorruptedCleanup(usize),
}

/// Answers from a fixed script and records every question asked.
#[derive(Debug, Clone)]
pub struct ScriptedCollaborator {
    pub migration: MigrationChoice,
    pub import: ImportChoice,
    pub confirm_cleanup: bool,
    pub calls: Vec<CollaboratorCall>,
}

impl Default for ScriptedCollaborator {
    fn default() -> Self {
        Self {
            migration: MigrationChoice::Abort,
            import: ImportChoice::Abort,
            confirm_cleanup: false,
            calls: Vec::new(),
        }
    }
}

impl ScriptedCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(mut self, migration: MigrationChoice) -> Self {
        self.migration = migration;
        self
    }

    pub fn on_import(mut self, import: ImportChoice) -> Self {
        self.import = import;
        self
    }

    pub fn confirming_cleanup(mut self, confirm: bool) -> Self {
        self.confirm_cleanup = confirm;
        self
    }

    pub fn was_consulted(&self) -> bool {
        !self.calls.is_empty()
    }
}

impl DecisionCollaborator for ScriptedCollaborator {
    fn ask_for_migration_choice(&mut self, candidates: &[Candidate]) -> MigrationChoice {
        self.calls.push(CollaboratorCall::MigrationChoice(
            candidates.iter().map(|c| c.index).collect(),
        ));
        self.migration
    }

    fn ask_for_import_conflict(&mut self, conflict: &ImportConflict) -> ImportChoice {
        self.calls
            .push(CollaboratorCall::ImportConflict(conflict.source.clone()));
        self.import
    }

    fn confirm_corrupted_cleanup(&mut self, root: &ConfigRoot) -> bool {
        self.calls.push(CollaboratorCall::CorruptedCleanup(root.index));
        self.confirm_cleanup
    }
}
