//! Error types for SegStore core.

use segstore_engine::EngineError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SegStore core operations.
///
/// Expected outcomes (duplicate key, entry not found) are **not** errors;
/// they are returned as explicit result variants by the index operations.
/// Everything here is fatal to the enclosing operation and carries enough
/// context to diagnose without re-running: the engine directory, the table
/// identifier, and a human-readable rendering of the failing key where one
/// exists.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Engine error without additional context.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Failed to open an engine resource at index construction.
    #[error("failed to open {what} (dir={dir:?}, table={table}): {source}")]
    Open {
        /// What was being opened ("table", "cursor").
        what: &'static str,
        /// Engine home directory.
        dir: PathBuf,
        /// Engine table identifier.
        table: String,
        /// Underlying engine failure.
        source: EngineError,
    },

    /// A structural index operation failed fatally.
    #[error("index {op} failed (dir={dir:?}, table={table}, key={key}): {source}")]
    IndexOp {
        /// The failing operation.
        op: &'static str,
        /// Engine home directory.
        dir: PathBuf,
        /// Engine table identifier.
        table: String,
        /// Human-readable form of the key involved.
        key: String,
        /// Underlying engine failure.
        source: EngineError,
    },

    /// A cursor operation failed fatally.
    #[error("index cursor {op} failed (table={table}): {source}")]
    Cursor {
        /// The failing operation.
        op: &'static str,
        /// Engine table identifier.
        table: String,
        /// Underlying engine failure.
        source: EngineError,
    },

    /// Saving or loading index storage failed.
    #[error("index {op} failed (path={path:?}): {source}")]
    Persist {
        /// The failing operation ("save", "load").
        op: &'static str,
        /// The backing file involved.
        path: PathBuf,
        /// Underlying engine failure.
        source: EngineError,
    },

    /// A filesystem error outside the engine.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// The schema definition is invalid.
    #[error("invalid schema: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// A key does not match its schema's layout.
    #[error("malformed key for schema {schema}: {message}")]
    KeyFormat {
        /// Name of the schema.
        schema: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an open-failure error.
    pub fn open(what: &'static str, dir: &Path, table: &str, source: EngineError) -> Self {
        Self::Open {
            what,
            dir: dir.to_path_buf(),
            table: table.to_string(),
            source,
        }
    }

    /// Creates a cursor-failure error.
    pub fn cursor(op: &'static str, table: &str, source: EngineError) -> Self {
        Self::Cursor {
            op,
            table: table.to_string(),
            source,
        }
    }

    /// Creates a save/load failure error.
    pub fn persist(op: &'static str, path: PathBuf, source: EngineError) -> Self {
        Self::Persist { op, path, source }
    }

    /// Creates a filesystem error.
    pub fn io(path: PathBuf, source: io::Error) -> Self {
        Self::Io { path, source }
    }

    /// Creates an invalid schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a malformed key error.
    pub fn key_format(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyFormat {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
