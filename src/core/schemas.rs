//! SQLite schema for the persistent settings store.
//!
//! Keys are addressed by their case-folded path (`path_ci`); the original spelling
//! is kept alongside for display. Values cascade with their key.

pub const SETTINGS_DB_NAME: &str = "settings.db";

pub const SETTINGS_DB_SCHEMA_KEYS: &str = "
    CREATE TABLE IF NOT EXISTS keys (
        path_ci TEXT PRIMARY KEY,
        path TEXT NOT NULL,
        depth INTEGER NOT NULL
    )
";

pub const SETTINGS_DB_SCHEMA_VALUES: &str = "
    CREATE TABLE IF NOT EXISTS key_values (
        path_ci TEXT NOT NULL,
        name_ci TEXT NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL, -- dword, sz, binary
        data BLOB NOT NULL,
        PRIMARY KEY (path_ci, name_ci),
        FOREIGN KEY(path_ci) REFERENCES keys(path_ci) ON DELETE CASCADE
    )
";

pub const SETTINGS_DB_SCHEMA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_keys_depth ON keys(depth)";
