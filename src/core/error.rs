use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Store access error: {0}")]
    StoreAccess(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Destination key already exists: {0}")]
    DestinationExists(String),
    #[error("Unable to create key: {0}")]
    CreateFailed(String),
    #[error("Unable to copy key: {0}")]
    CopyFailed(String),
    #[error("Configuration root is already corrupted: {0}")]
    AlreadyCorrupted(String),
    #[error("Corrupted configuration: {0}")]
    Corruption(String),
    #[error("Import chain exceeded {hops} hops")]
    CycleExceeded { hops: usize },
    #[error("Ambiguous state: {0}")]
    AmbiguousState(String),
}

/// The closed failure taxonomy every engine error reduces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Open, create, copy or delete failed. Startup may continue with defaults.
    StoreAccess,
    /// A write-in-progress marker was found where a clean root was required.
    Corruption,
    /// An import pointer chain was longer than the hop bound.
    CycleExceeded,
    /// The store holds a combination the engine will not resolve on its own.
    AmbiguousState,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::RusqliteError(_)
            | EngineError::IoError(_)
            | EngineError::JsonError(_)
            | EngineError::StoreAccess(_)
            | EngineError::ConfigError(_)
            | EngineError::DestinationExists(_)
            | EngineError::CreateFailed(_)
            | EngineError::CopyFailed(_) => ErrorKind::StoreAccess,
            EngineError::AlreadyCorrupted(_) | EngineError::Corruption(_) => ErrorKind::Corruption,
            EngineError::CycleExceeded { .. } => ErrorKind::CycleExceeded,
            EngineError::AmbiguousState(_) => ErrorKind::AmbiguousState,
        }
    }
}
