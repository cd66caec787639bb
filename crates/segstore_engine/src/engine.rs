//! Sorted engine and cursor trait definitions.

use crate::error::EngineResult;
use std::cmp::Ordering;
use std::path::Path;

/// Options applied when opening a cursor.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorOptions {
    /// When true, `insert` silently replaces an existing key instead of
    /// reporting `DuplicateKey`.
    pub overwrite: bool,
}

impl CursorOptions {
    /// Returns options for an overwriting cursor.
    #[must_use]
    pub fn overwriting() -> Self {
        Self { overwrite: true }
    }
}

/// A sorted key-value engine.
///
/// An engine hosts named tables, each an ordered map from byte-string keys
/// to byte-string values under unsigned byte-lexicographic comparison. All
/// access goes through cursors; the engine handle itself is shared
/// read-only across threads.
///
/// # Invariants
///
/// - `create_table` is idempotent and reloads a checkpointed table file if
///   one exists under `home()`
/// - `checkpoint` leaves the table durable: a fresh engine opened on the
///   same home directory sees the checkpointed contents after
///   `create_table`
/// - The file backing table `t` lives at `home().join(t)` so callers can
///   size it without scanning entries
pub trait SortedEngine: Send + Sync {
    /// Directory backing this engine's tables.
    ///
    /// Used for diagnostics and for sizing table files.
    fn home(&self) -> &Path;

    /// Creates the named table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a persisted table file exists but cannot be read.
    fn create_table(&self, table: &str) -> EngineResult<()>;

    /// Opens a new cursor over the named table.
    ///
    /// Each cursor owns a private session; opening one is cheap relative to
    /// a table's lifetime but is a deliberate, explicit operation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TableMissing`](crate::EngineError::TableMissing)
    /// if the table has not been created.
    fn open_cursor(&self, table: &str, options: CursorOptions) -> EngineResult<Box<dyn EngineCursor>>;

    /// Removes every entry from the named table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table has not been created.
    fn truncate_table(&self, table: &str) -> EngineResult<()>;

    /// Persists the named table durably under `home()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table has not been created or the write
    /// fails.
    fn checkpoint(&self, table: &str) -> EngineResult<()>;
}

/// A stateful cursor into one engine table.
///
/// Cursors are **not** safe for concurrent use: each one owns a private
/// engine session and must belong to exactly one actor at a time (`Send`
/// but never shared). Dropping the cursor releases the session.
///
/// A cursor is either *unpositioned* (fresh, after `reset`, or after a
/// mutation) or *positioned* on an entry readable through [`entry`]. From
/// an unpositioned cursor, `next` lands on the first entry of the table and
/// `prev` on the last.
///
/// [`entry`]: EngineCursor::entry
pub trait EngineCursor: Send {
    /// Inserts `key -> value`.
    ///
    /// Leaves the cursor unpositioned.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateKey`](crate::EngineError::DuplicateKey)
    /// when the cursor was opened without `overwrite` and the key already
    /// exists; detection is the engine's, not a separate read-then-write.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Removes the entry for `key`.
    ///
    /// Leaves the cursor unpositioned.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`](crate::EngineError::NotFound) when
    /// the key is absent.
    fn remove(&mut self, key: &[u8]) -> EngineResult<()>;

    /// Positions the cursor on `key` and returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`](crate::EngineError::NotFound) when
    /// the key is absent; the cursor is then unpositioned.
    fn search(&mut self, key: &[u8]) -> EngineResult<Vec<u8>>;

    /// Positions the cursor near `key`.
    ///
    /// Lands on the smallest entry whose key is `>= key` when one exists,
    /// otherwise on the largest entry whose key is `< key`. The returned
    /// ordering compares the landed key against `key`, so `Less` means no
    /// entry at or after the target exists.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`](crate::EngineError::NotFound) when
    /// the table is empty.
    fn search_near(&mut self, key: &[u8]) -> EngineResult<Ordering>;

    /// Advances to the next entry in key order.
    ///
    /// Returns false when no further entry exists; the position is then
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure.
    fn next(&mut self) -> EngineResult<bool>;

    /// Steps back to the previous entry in key order.
    ///
    /// Returns false when no previous entry exists.
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure.
    fn prev(&mut self) -> EngineResult<bool>;

    /// Returns the entry the cursor is positioned on, if any.
    fn entry(&self) -> Option<(&[u8], &[u8])>;

    /// Returns the cursor to the unpositioned state.
    fn reset(&mut self);
}
