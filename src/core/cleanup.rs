//! Caller-side deletions, run only after the chosen payload has been consumed.

use crate::core::broker::StoreBroker;
use crate::core::error::EngineError;
use crate::core::import;
use crate::core::locator::MigrationPlan;
use crate::core::roots::VersionRootTable;
use crate::core::startup::ImportPlan;
use crate::core::store::KeyPath;

pub struct Cleanup {
    broker: StoreBroker,
    table: VersionRootTable,
}

impl Cleanup {
    pub fn new(broker: StoreBroker, table: VersionRootTable) -> Self {
        Self { broker, table }
    }

    /// Deletes the roots a migration plan marked as superseded. Root 0 and indices
    /// outside the table are skipped. Returns the locations actually removed.
    pub fn delete_superseded(&self, plan: &MigrationPlan) -> Result<Vec<KeyPath>, EngineError> {
        let targets: Vec<KeyPath> = plan
            .delete_after_load
            .iter()
            .filter(|&&index| index != 0)
            .filter_map(|&index| self.table.get(index))
            .map(|root| root.location.clone())
            .collect();

        self.broker.with_store("cleanup.delete_superseded", |store| {
            let mut deleted = Vec::new();
            for location in targets {
                if store.delete_tree(&location)? {
                    tracing::info!(root = %location, "deleted superseded root");
                    deleted.push(location);
                }
            }
            Ok(deleted)
        })
    }

    /// Removes the import pointer from root 0, then (only if that worked and the
    /// caller asked for it) deletes the import source. Returns whether the source
    /// was deleted.
    pub fn finish_import(&self, plan: &ImportPlan, delete_source: bool) -> Result<bool, EngineError> {
        let root0 = self.table.active().location.clone();
        self.broker.with_store("cleanup.finish_import", |store| {
            import::clear_pointer_in(store, &root0)?;
            if !delete_source || plan.source == root0 {
                return Ok(false);
            }
            store.delete_tree(&plan.source)
        })
    }
}
