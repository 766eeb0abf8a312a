//! Audit-event stamps and the `--format json` envelope.

use serde_json::Value as JsonValue;
use ulid::Ulid;

pub const ENVELOPE_VERSION: &str = "1.0.0";

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// CLI surfaces that answer with a JSON envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Roots,
    Classify,
    Locate,
    BackupInspect,
    ImportResolve,
    Audit,
}

impl Surface {
    pub fn as_str(self) -> &'static str {
        match self {
            Surface::Roots => "roots",
            Surface::Classify => "classify",
            Surface::Locate => "locate",
            Surface::BackupInspect => "backup.inspect",
            Surface::ImportResolve => "import.resolve",
            Surface::Audit => "audit",
        }
    }
}

/// Stamps `body` with the envelope head. Object bodies are merged at the top
/// level; anything else lands under `result`.
pub fn command_envelope(surface: Surface, body: JsonValue) -> JsonValue {
    let mut envelope = serde_json::Map::new();
    envelope.insert("envelope_version".into(), ENVELOPE_VERSION.into());
    envelope.insert("ts".into(), now_epoch_z().into());
    envelope.insert("event_id".into(), new_event_id().into());
    envelope.insert("cmd".into(), surface.as_str().into());
    envelope.insert("status".into(), "ok".into());
    match body {
        JsonValue::Object(fields) => envelope.extend(fields),
        JsonValue::Null => {}
        other => {
            envelope.insert("result".into(), other);
        }
    }
    JsonValue::Object(envelope)
}
