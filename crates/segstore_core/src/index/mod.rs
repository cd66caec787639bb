//! Ordered indexes over a sorted engine.
//!
//! An index maps logical keys to record ids. The engine-level entry layout
//! depends on the schema's uniqueness:
//!
//! - **unique**: `storage_key -> id` (8-byte big-endian value)
//! - **non-unique**: `storage_key || id -> marker`, with the 8-byte
//!   big-endian id appended to the key so equal keys stay distinct engine
//!   entries and sort by id
//!
//! Storage keys are the byte-lexicographic form produced by
//! [`codec::to_storage`](crate::codec::to_storage) when the schema needs
//! it, otherwise the logical bytes unchanged.

mod frozen;
mod iter;
mod writable;

pub use frozen::{FrozenIndex, FrozenIter};
pub use iter::{Direction, IndexIter, SeekOutcome};
pub use writable::OrderedIndex;

use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;

/// Identifier of a record within its segment.
pub type RecordId = i64;

/// Sentinel id meaning "no record".
pub const NO_RECORD: RecordId = -1;

/// Value stored for non-unique index entries; the key carries all state.
pub(crate) const NONUNIQUE_MARKER: &[u8] = &[1];

/// Result of an index insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The binding was added.
    Inserted,
    /// The key (or exact key-id pair, for non-unique schemas) was already
    /// bound; nothing changed.
    DuplicateKey,
}

/// Result of an index replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The binding now points at the new id.
    Replaced,
    /// The new binding already existed; nothing changed.
    DuplicateKey,
}

/// A positioned scan over one index, in a fixed direction.
///
/// Implemented by [`IndexIter`] for writable indexes and [`FrozenIter`]
/// for frozen ones, so segment-level callers can scan either uniformly.
pub trait IndexCursor: Send {
    /// Steps to the next entry and returns its logical key and record id,
    /// or `None` once the scan is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure or a corrupt entry.
    fn increment(&mut self) -> CoreResult<Option<(Vec<u8>, RecordId)>>;

    /// Repositions at the lower bound of `key` in this cursor's direction
    /// and consumes the landed entry.
    ///
    /// Forward: lands on the smallest entry `>= key`. Backward: lands on
    /// the largest entry `<= key`. Subsequent [`increment`] calls continue
    /// past the landed entry.
    ///
    /// [`increment`]: IndexCursor::increment
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure.
    fn seek_lower_bound(&mut self, key: &[u8]) -> CoreResult<SeekOutcome>;

    /// Returns the cursor to its initial unpositioned state.
    fn reset(&mut self);
}

pub(crate) fn id_suffix(id: RecordId) -> [u8; 8] {
    (id as u64).to_be_bytes()
}

pub(crate) fn id_from_suffix(schema: &Schema, bytes: &[u8]) -> CoreResult<RecordId> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        CoreError::key_format(
            schema.name(),
            format!("record id field has {} bytes, expected 8", bytes.len()),
        )
    })?;
    Ok(u64::from_be_bytes(arr) as RecordId)
}

/// Splits a raw engine entry into its storage key part and record id.
pub(crate) fn split_entry<'a>(
    schema: &Schema,
    key: &'a [u8],
    value: &'a [u8],
) -> CoreResult<(&'a [u8], RecordId)> {
    if schema.is_unique() {
        Ok((key, id_from_suffix(schema, value)?))
    } else {
        if key.len() < 8 {
            return Err(CoreError::key_format(
                schema.name(),
                format!("entry key has {} bytes, too short for an id suffix", key.len()),
            ));
        }
        let (part, suffix) = key.split_at(key.len() - 8);
        Ok((part, id_from_suffix(schema, suffix)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType};

    fn schema(unique: bool) -> Schema {
        Schema::new(
            "k",
            vec![ColumnDef::new("name", ColumnType::StrZero)],
            unique,
        )
        .unwrap()
    }

    #[test]
    fn split_unique_entry() {
        let s = schema(true);
        let value = id_suffix(42);
        let (part, id) = split_entry(&s, b"ann\0", &value).unwrap();
        assert_eq!(part, b"ann\0");
        assert_eq!(id, 42);
    }

    #[test]
    fn split_nonunique_entry() {
        let s = schema(false);
        let mut key = b"ann\0".to_vec();
        key.extend_from_slice(&id_suffix(7));
        let (part, id) = split_entry(&s, &key, NONUNIQUE_MARKER).unwrap();
        assert_eq!(part, b"ann\0");
        assert_eq!(id, 7);
    }

    #[test]
    fn short_nonunique_entry_rejected() {
        let s = schema(false);
        assert!(split_entry(&s, b"abc", NONUNIQUE_MARKER).is_err());
    }

    #[test]
    fn malformed_unique_value_rejected() {
        let s = schema(true);
        assert!(split_entry(&s, b"ann\0", b"abc").is_err());
    }
}
