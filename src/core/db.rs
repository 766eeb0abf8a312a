//! SQLite-backed settings store.

use crate::core::error::EngineError;
use crate::core::schemas;
use crate::core::store::{KeyPath, SEPARATOR, SettingsStore, Value};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Environment hook that fails one structural stage (`open`, `copy`, `delete`).
pub const FAULT_STAGE_ENV: &str = "CFGROOTS_STORE_FAULT_STAGE";

fn fault_injected(stage: &str) -> bool {
    std::env::var(FAULT_STAGE_ENV)
        .map(|v| v.trim().eq_ignore_ascii_case(stage))
        .unwrap_or(false)
}

fn injected_fault(stage: &str, detail: &str) -> EngineError {
    EngineError::StoreAccess(format!(
        "STORE_FAULT_INJECTED stage={} {}",
        stage, detail
    ))
}

pub fn db_connect(db_path: &str) -> Result<Connection, EngineError> {
    if fault_injected("open") {
        return Err(injected_fault("open", db_path));
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(EngineError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(EngineError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(EngineError::RusqliteError)?;
    Ok(conn)
}

pub fn settings_db_path(root: &Path) -> PathBuf {
    root.join(schemas::SETTINGS_DB_NAME)
}

fn encode(value: &Value) -> (&'static str, Vec<u8>) {
    match value {
        Value::Dword(v) => ("dword", v.to_le_bytes().to_vec()),
        Value::Str(s) => ("sz", s.as_bytes().to_vec()),
        Value::Binary(b) => ("binary", b.clone()),
    }
}

fn decode(kind: &str, data: Vec<u8>) -> Result<Value, EngineError> {
    match kind {
        "dword" => {
            let bytes: [u8; 4] = data.as_slice().try_into().map_err(|_| {
                EngineError::StoreAccess(format!("malformed dword of {} bytes", data.len()))
            })?;
            Ok(Value::Dword(u32::from_le_bytes(bytes)))
        }
        "sz" => String::from_utf8(data)
            .map(Value::Str)
            .map_err(|e| EngineError::StoreAccess(format!("malformed string value: {}", e))),
        "binary" => Ok(Value::Binary(data)),
        other => Err(EngineError::StoreAccess(format!(
            "unknown value kind: {}",
            other
        ))),
    }
}

fn subtree_prefix(path: &KeyPath) -> String {
    let mut prefix = path.canonical();
    prefix.push(SEPARATOR);
    prefix
}

fn insert_lineage(tx: &Transaction<'_>, path: &KeyPath) -> Result<(), EngineError> {
    for key in path.lineage() {
        tx.execute(
            "INSERT OR IGNORE INTO keys(path_ci, path, depth) VALUES(?1, ?2, ?3)",
            params![key.canonical(), key.to_string(), key.segments().len() as i64],
        )?;
    }
    Ok(())
}

/// Settings store persisted in a single SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(EngineError::IoError)?;
            }
        }
        let conn = db_connect(&db_path.to_string_lossy())?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(db_path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys=ON;", [])?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize(conn: &Connection) -> Result<(), EngineError> {
        conn.execute(schemas::SETTINGS_DB_SCHEMA_KEYS, [])?;
        conn.execute(schemas::SETTINGS_DB_SCHEMA_VALUES, [])?;
        conn.execute(schemas::SETTINGS_DB_SCHEMA_INDEX, [])?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        self.conn
            .lock()
            .map_err(|_| EngineError::StoreAccess("SqliteStore connection lock poisoned".to_string()))
    }
}

impl SettingsStore for SqliteStore {
    fn key_exists(&self, path: &KeyPath) -> Result<bool, EngineError> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM keys WHERE path_ci = ?1",
                params![path.canonical()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn create_key(&self, path: &KeyPath) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_lineage(&tx, path)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_tree(&self, path: &KeyPath) -> Result<bool, EngineError> {
        if fault_injected("delete") {
            return Err(injected_fault("delete", &path.to_string()));
        }
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM keys WHERE path_ci = ?1 OR substr(path_ci, 1, length(?2)) = ?2",
            params![path.canonical(), subtree_prefix(path)],
        )?;
        Ok(removed > 0)
    }

    fn get_value(&self, path: &KeyPath, name: &str) -> Result<Option<Value>, EngineError> {
        let conn = self.conn()?;
        let row: Option<(String, Vec<u8>)> = conn
            .query_row(
                "SELECT kind, data FROM key_values WHERE path_ci = ?1 AND name_ci = ?2",
                params![path.canonical(), name.to_lowercase()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(kind, data)| decode(&kind, data)).transpose()
    }

    fn set_value(&self, path: &KeyPath, name: &str, value: &Value) -> Result<(), EngineError> {
        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM keys WHERE path_ci = ?1",
                params![path.canonical()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(EngineError::StoreAccess(format!(
                "key does not exist: {}",
                path
            )));
        }
        let (kind, data) = encode(value);
        conn.execute(
            "INSERT INTO key_values(path_ci, name_ci, name, kind, data) VALUES(?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path_ci, name_ci) DO UPDATE SET name = excluded.name, kind = excluded.kind, data = excluded.data",
            params![path.canonical(), name.to_lowercase(), name, kind, data],
        )?;
        Ok(())
    }

    fn delete_value(&self, path: &KeyPath, name: &str) -> Result<bool, EngineError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM key_values WHERE path_ci = ?1 AND name_ci = ?2",
            params![path.canonical(), name.to_lowercase()],
        )?;
        Ok(removed > 0)
    }

    fn copy_tree(&self, src: &KeyPath, dst: &KeyPath) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let sources: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT path_ci, path FROM keys
                 WHERE path_ci = ?1 OR substr(path_ci, 1, length(?2)) = ?2
                 ORDER BY depth, path_ci",
            )?;
            let rows = stmt.query_map(params![src.canonical(), subtree_prefix(src)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            out
        };
        if sources.is_empty() {
            return Err(EngineError::StoreAccess(format!(
                "source key does not exist: {}",
                src
            )));
        }

        insert_lineage(&tx, dst)?;
        for (source_ci, source_path) in &sources {
            let source = KeyPath::parse(source_path)?;
            let target = match source.strip_prefix(src) {
                Some(rel) => dst.join_segments(&rel),
                None => dst.clone(),
            };
            insert_lineage(&tx, &target)?;
            tx.execute(
                "INSERT OR REPLACE INTO key_values(path_ci, name_ci, name, kind, data)
                 SELECT ?1, name_ci, name, kind, data FROM key_values WHERE path_ci = ?2",
                params![target.canonical(), source_ci],
            )?;
        }

        if fault_injected("copy") {
            // Dropping the transaction rolls the partial copy back.
            return Err(injected_fault("copy", &format!("src={} dst={}", src, dst)));
        }
        tx.commit()?;
        Ok(())
    }

    fn subkeys(&self, path: &KeyPath) -> Result<Vec<String>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT path FROM keys
             WHERE substr(path_ci, 1, length(?1)) = ?1 AND depth = ?2
             ORDER BY path_ci",
        )?;
        let rows = stmt.query_map(
            params![subtree_prefix(path), (path.segments().len() + 1) as i64],
            |row| row.get::<_, String>(0),
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(KeyPath::parse(&r?)?.name().to_string());
        }
        Ok(out)
    }

    fn values(&self, path: &KeyPath) -> Result<Vec<(String, Value)>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, kind, data FROM key_values WHERE path_ci = ?1 ORDER BY name_ci",
        )?;
        let rows = stmt.query_map(params![path.canonical()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (name, kind, data) = r?;
            out.push((name, decode(&kind, data)?));
        }
        Ok(out)
    }
}
