use crate::core::error::EngineError;
use crate::core::store::SettingsStore;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The Store Broker is the "Thin Waist" for structural store access.
///
/// Every engine operation (classify, rename, promote, resolve) runs inside
/// [`with_store`](StoreBroker::with_store), which holds the store-wide lock for the
/// whole operation and appends one audit event when it finishes. Clones share the
/// lock, so host threads that flush unrelated settings can serialize against the
/// engine by going through a clone of the same broker.
#[derive(Clone)]
pub struct StoreBroker {
    store: Arc<dyn SettingsStore>,
    lock: Arc<Mutex<()>>,
    audit_log_path: Option<PathBuf>,
    actor: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub status: String,
    pub detail: Option<String>,
}

impl StoreBroker {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
            audit_log_path: None,
            actor: "cfgroots".to_string(),
        }
    }

    /// Appends one JSON line per operation to `path`.
    pub fn with_audit_log(mut self, path: &Path) -> Self {
        self.audit_log_path = Some(path.to_path_buf());
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn audit_log_path(&self) -> Option<&Path> {
        self.audit_log_path.as_deref()
    }

    /// Execute a closure with exclusive structural access to the store.
    pub fn with_store<F, R>(&self, op_name: &str, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&dyn SettingsStore) -> Result<R, EngineError>,
    {
        let _lock = self
            .lock
            .lock()
            .map_err(|_| EngineError::StoreAccess("Store lock poisoned".to_string()))?;

        let result = f(self.store.as_ref());

        let (status, detail) = match &result {
            Ok(_) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        tracing::debug!(op = op_name, status, "store operation");
        // The store change has already happened; a lost audit line must not turn it into an error.
        if let Err(e) = self.log_event(op_name, status, detail) {
            tracing::warn!(op = op_name, error = %e, "audit log append failed");
        }

        result
    }

    fn log_event(&self, op: &str, status: &str, detail: Option<String>) -> Result<(), EngineError> {
        let Some(path) = &self.audit_log_path else {
            return Ok(());
        };

        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: self.actor.clone(),
            op: op.to_string(),
            status: status.to_string(),
            detail,
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(EngineError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(EngineError::IoError)?;
        Ok(())
    }
}

/// Reads the audit log back, skipping lines that do not parse.
pub fn read_audit_log(path: &Path) -> Result<Vec<BrokerEvent>, EngineError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(EngineError::IoError)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str::<BrokerEvent>(line).ok())
        .collect())
}
