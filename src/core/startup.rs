//! Launch sequence: a pending import is settled before the locator runs.

use crate::core::broker::StoreBroker;
use crate::core::collaborator::{DecisionCollaborator, ImportChoice, ImportConflict};
use crate::core::error::EngineError;
use crate::core::guard::{self, RootState};
use crate::core::import::{self, Resolution};
use crate::core::locator::{MigrationLocator, MigrationPlan};
use crate::core::payload;
use crate::core::roots::VersionRootTable;
use crate::core::store::{KeyPath, SettingsStore, Value};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportPlan {
    pub source: KeyPath,
    pub hops: usize,
    /// Root 0 held data that was cleared to make room for the import.
    pub replaced_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum StartupPlan {
    Import(ImportPlan),
    Migrate(MigrationPlan),
    Abort,
}

/// Deletes everything in root 0 but the import pointer.
fn reset_active_in(store: &dyn SettingsStore, root0: &KeyPath) -> Result<(), EngineError> {
    let pointer = import::read_pointer_in(store, root0)?;
    store.delete_tree(root0)?;
    store.create_key(root0)?;
    if let Some(pointer) = pointer {
        store.set_value(root0, import::IMPORT_POINTER, &Value::Str(pointer))?;
    }
    Ok(())
}

/// Copies the payload of `source` into root 0 under the write marker.
fn adopt_in(store: &dyn SettingsStore, root0: &KeyPath, source: &KeyPath) -> Result<(), EngineError> {
    let Some(data) = payload::read_payload_in(store, source)? else {
        return Err(EngineError::StoreAccess(format!(
            "no configuration to adopt at {}",
            source
        )));
    };
    guard::begin_write_in(store, root0)?;
    payload::replace_payload_in(store, root0, &data)?;
    guard::end_write_in(store, root0)
}

pub struct Startup {
    broker: StoreBroker,
    locator: MigrationLocator,
    root0: KeyPath,
}

impl Startup {
    pub fn new(broker: StoreBroker, table: VersionRootTable) -> Self {
        let root0 = table.active().location.clone();
        Self {
            locator: MigrationLocator::new(broker.clone(), table),
            broker,
            root0,
        }
    }

    pub fn locator(&self) -> &MigrationLocator {
        &self.locator
    }

    pub fn run(
        &self,
        collaborator: &mut dyn DecisionCollaborator,
    ) -> Result<StartupPlan, EngineError> {
        let resolution = self
            .broker
            .with_store("startup.resolve", |store| import::resolve_in(store, &self.root0))?;

        let target = match resolution {
            Resolution::Target(target) => target,
            Resolution::NoPointer => return self.migrate(collaborator),
            Resolution::Invalid(reason) => {
                tracing::warn!(?reason, root = %self.root0, "ignoring invalid import pointer");
                self.clear_pointer();
                return self.migrate(collaborator);
            }
        };

        let replaced_active = match target.active_state {
            RootState::Corrupted => {
                tracing::info!(root = %self.root0, "clearing corrupted root before import");
                self.broker
                    .with_store("startup.reset_active", |store| reset_active_in(store, &self.root0))?;
                true
            }
            RootState::Valid => {
                let conflict = ImportConflict {
                    active: self.root0.clone(),
                    source: target.source.clone(),
                };
                match collaborator.ask_for_import_conflict(&conflict) {
                    ImportChoice::KeepCurrent => {
                        self.clear_pointer();
                        return self.migrate(collaborator);
                    }
                    ImportChoice::Overwrite => {
                        self.broker.with_store("startup.reset_active", |store| {
                            reset_active_in(store, &self.root0)
                        })?;
                        true
                    }
                    ImportChoice::Abort => return Ok(StartupPlan::Abort),
                }
            }
            RootState::Absent | RootState::Empty => false,
        };

        Ok(StartupPlan::Import(ImportPlan {
            source: target.source,
            hops: target.hops,
            replaced_active,
        }))
    }

    /// Writes the chosen payload into root 0. Call before the cleanup step.
    pub fn adopt(&self, source: &KeyPath) -> Result<(), EngineError> {
        if source == &self.root0 {
            return Ok(());
        }
        self.broker
            .with_store("startup.adopt", |store| adopt_in(store, &self.root0, source))
    }

    fn migrate(
        &self,
        collaborator: &mut dyn DecisionCollaborator,
    ) -> Result<StartupPlan, EngineError> {
        let plan = self.locator.locate(collaborator)?;
        Ok(StartupPlan::Migrate(plan))
    }

    fn clear_pointer(&self) {
        if let Err(e) = self
            .broker
            .with_store("startup.clear_pointer", |store| import::clear_pointer_in(store, &self.root0))
        {
            tracing::warn!(error = %e, "stale import pointer could not be cleared");
        }
    }
}
