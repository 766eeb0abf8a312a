//! Startup scan over the root table.
//!
//! The locator decides which root the host loads. It may recover root 0 from the
//! backup or move a corrupted root 0 aside, but it never deletes candidate roots:
//! the plan lists what the caller may delete after it has consumed the payload.

use crate::core::backup::{self, BackupStatus};
use crate::core::broker::StoreBroker;
use crate::core::collaborator::{Candidate, DecisionCollaborator, MigrationChoice};
use crate::core::error::EngineError;
use crate::core::guard::{self, RootState};
use crate::core::roots::{ConfigRoot, VersionRootTable};
use crate::core::store::KeyPath;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "index", rename_all = "snake_case")]
pub enum MigrationDecision {
    LoadRoot(usize),
    UseDefaults,
    Abort,
}

/// What the locator changed in the store before deciding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Backup status found at the start of the run.
    pub backup: BackupStatus,
    /// Quarantine location of the corrupted root 0 replaced by the backup.
    pub promoted: Option<KeyPath>,
    /// Quarantine location of a corrupted root 0 the collaborator let go.
    pub quarantined: Option<KeyPath>,
    /// Root 0 was deleted because it could not be quarantined.
    pub root0_deleted: bool,
    /// A complete backup was moved into an empty root 0 slot.
    pub restored: bool,
    /// A complete backup is still in the store because root 0 is not valid.
    pub backup_kept: bool,
    pub backup_discarded: bool,
}

impl Default for RecoveryReport {
    fn default() -> Self {
        Self {
            backup: BackupStatus::Absent,
            promoted: None,
            quarantined: None,
            root0_deleted: false,
            restored: false,
            backup_kept: false,
            backup_discarded: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub decision: MigrationDecision,
    /// Every valid older root, newest first.
    pub candidates: Vec<Candidate>,
    /// Roots the caller deletes once the chosen payload is durably consumed.
    pub delete_after_load: Vec<usize>,
    pub recovery: RecoveryReport,
}

impl MigrationPlan {
    fn new(decision: MigrationDecision, recovery: RecoveryReport) -> Self {
        Self {
            decision,
            candidates: Vec::new(),
            delete_after_load: Vec::new(),
            recovery,
        }
    }

    /// Fallback for a store that cannot be read: start with defaults, touch nothing.
    pub fn degraded() -> Self {
        Self::new(MigrationDecision::UseDefaults, RecoveryReport::default())
    }

    pub fn load_index(&self) -> Option<usize> {
        match self.decision {
            MigrationDecision::LoadRoot(index) => Some(index),
            _ => None,
        }
    }
}

pub struct MigrationLocator {
    broker: StoreBroker,
    table: VersionRootTable,
}

impl MigrationLocator {
    pub fn new(broker: StoreBroker, table: VersionRootTable) -> Self {
        Self { broker, table }
    }

    pub fn table(&self) -> &VersionRootTable {
        &self.table
    }

    pub fn locate(
        &self,
        collaborator: &mut dyn DecisionCollaborator,
    ) -> Result<MigrationPlan, EngineError> {
        let root0 = self.table.active();
        let mut recovery = RecoveryReport::default();

        let backup = self
            .broker
            .with_store("locate.inspect_backup", |store| {
                backup::inspect_in(store, &root0.location)
            })
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "backup inspection failed, continuing without backup");
                BackupStatus::Absent
            });
        recovery.backup = backup;
        recovery.backup_discarded = backup == BackupStatus::Incomplete;

        let mut state = self.classify(root0)?;
        let mut backup_pending = backup == BackupStatus::Complete;

        if state == RootState::Corrupted && backup_pending {
            match self.broker.with_store("locate.promote", |store| {
                backup::promote_in(store, &root0.location)
            }) {
                Ok(quarantine) => {
                    recovery.promoted = Some(quarantine);
                    backup_pending = false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "backup promotion failed, keeping backup");
                }
            }
            // A promotion can fail after root 0 was already moved aside.
            state = self.classify(root0)?;
        }

        if state == RootState::Corrupted {
            if !collaborator.confirm_corrupted_cleanup(root0) {
                tracing::info!(root = %root0.location, "corrupted root kept, aborting");
                recovery.backup_kept = backup_pending;
                return Ok(MigrationPlan::new(MigrationDecision::Abort, recovery));
            }
            self.clear_corrupted(root0, &mut recovery);
            state = match self.classify(root0)? {
                // Could be neither quarantined nor deleted; never loaded.
                RootState::Corrupted => RootState::Absent,
                other => other,
            };
        }

        if backup_pending {
            self.settle_backup(root0, &mut state, &mut recovery)?;
        }

        if state == RootState::Valid {
            return Ok(MigrationPlan::new(MigrationDecision::LoadRoot(0), recovery));
        }

        let candidates = self.scan_older()?;
        if candidates.is_empty() {
            return Ok(MigrationPlan::new(MigrationDecision::UseDefaults, recovery));
        }

        let choice = collaborator.ask_for_migration_choice(&candidates);
        let offered = |index: usize| -> Result<usize, EngineError> {
            if candidates.iter().any(|c| c.index == index) {
                Ok(index)
            } else {
                Err(EngineError::AmbiguousState(format!(
                    "root {} was not offered as a migration candidate",
                    index
                )))
            }
        };
        let every_candidate = || candidates.iter().map(|c| c.index).collect::<Vec<_>>();

        let (decision, delete_after_load) = match choice {
            MigrationChoice::LoadIndex(i) => (MigrationDecision::LoadRoot(offered(i)?), Vec::new()),
            MigrationChoice::LoadAndDeleteRest(i) => {
                (MigrationDecision::LoadRoot(offered(i)?), every_candidate())
            }
            MigrationChoice::UseDefaultsAndDeleteAll => {
                (MigrationDecision::UseDefaults, every_candidate())
            }
            MigrationChoice::Abort => (MigrationDecision::Abort, Vec::new()),
        };

        Ok(MigrationPlan {
            decision,
            candidates,
            delete_after_load,
            recovery,
        })
    }

    fn classify(&self, root: &ConfigRoot) -> Result<RootState, EngineError> {
        let state = self
            .broker
            .with_store("locate.classify", |store| guard::classify_in(store, &root.location))?;
        tracing::debug!(index = root.index, root = %root.location, %state, "classified root");
        Ok(state)
    }

    /// A complete backup that was not promoted is discarded only next to a valid
    /// root 0. An empty slot gets the backup; anything else keeps it.
    fn settle_backup(
        &self,
        root0: &ConfigRoot,
        state: &mut RootState,
        recovery: &mut RecoveryReport,
    ) -> Result<(), EngineError> {
        match *state {
            RootState::Valid => match self.broker.with_store("locate.discard_backup", |store| {
                backup::discard_in(store, &root0.location)
            }) {
                Ok(_) => recovery.backup_discarded = true,
                Err(e) => {
                    tracing::warn!(error = %e, "unneeded backup could not be discarded");
                    recovery.backup_kept = true;
                }
            },
            RootState::Absent => match self.broker.with_store("locate.restore", |store| {
                backup::restore_in(store, &root0.location)
            }) {
                Ok(()) => {
                    recovery.restored = true;
                    *state = self.classify(root0)?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "backup could not be restored, keeping it");
                    recovery.backup_kept = true;
                }
            },
            RootState::Empty | RootState::Corrupted => {
                tracing::info!(root = %root0.location, %state, "root 0 not valid, keeping backup");
                recovery.backup_kept = true;
            }
        }
        Ok(())
    }

    /// Quarantine first, delete as a fallback.
    fn clear_corrupted(&self, root0: &ConfigRoot, recovery: &mut RecoveryReport) {
        let quarantined = self.broker.with_store("locate.quarantine", |store| {
            backup::quarantine_in(store, &root0.location)
        });
        match quarantined {
            Ok(location) => recovery.quarantined = Some(location),
            Err(e) => {
                tracing::warn!(error = %e, "quarantine failed, deleting corrupted root");
                match self.broker.with_store("locate.delete_corrupted", |store| {
                    store.delete_tree(&root0.location)
                }) {
                    Ok(_) => recovery.root0_deleted = true,
                    Err(e) => tracing::warn!(error = %e, "corrupted root could not be removed"),
                }
            }
        }
    }

    fn scan_older(&self) -> Result<Vec<Candidate>, EngineError> {
        self.broker.with_store("locate.scan", |store| {
            let mut candidates = Vec::new();
            for root in self.table.older() {
                match guard::classify_in(store, &root.location) {
                    Ok(RootState::Valid) => candidates.push(Candidate::from(root)),
                    Ok(RootState::Corrupted) => {
                        tracing::debug!(index = root.index, "skipping corrupted older root")
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(index = root.index, error = %e, "older root unreadable, skipped")
                    }
                }
            }
            Ok(candidates)
        })
    }
}
