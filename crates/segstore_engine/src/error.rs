//! Error types for engine operations.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during engine operations.
///
/// `NotFound` and `DuplicateKey` are **expected** outcomes that callers
/// handle as part of the normal contract; every other variant is fatal to
/// the enclosing operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested key (or cursor position) does not exist.
    #[error("key not found")]
    NotFound,

    /// An insert on a non-overwriting cursor hit an existing key.
    #[error("duplicate key")]
    DuplicateKey,

    /// The named table has not been created on this engine.
    #[error("table not found: {0}")]
    TableMissing(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted table file is corrupted.
    #[error("table file corrupted: {0}")]
    Corrupted(String),
}

impl EngineError {
    /// Returns true for the distinguished "not found" code.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns true for the distinguished "duplicate key" code.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey)
    }
}
