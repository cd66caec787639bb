//! Iterators over writable indexes.

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::index::{id_suffix, split_entry, IndexCursor, RecordId};
use crate::schema::Schema;
use segstore_engine::EngineCursor;
use std::cmp::Ordering;
use std::sync::Arc;

/// Scan direction of an index cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Backward,
}

/// Result of [`IndexCursor::seek_lower_bound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekOutcome {
    /// Landed exactly on the sought key.
    Found {
        /// Logical key of the landed entry.
        key: Vec<u8>,
        /// Record id bound at the landed entry.
        id: RecordId,
    },
    /// No entry matches exactly; landed on the nearest entry past the
    /// sought key in iteration order.
    After {
        /// Logical key of the landed entry.
        key: Vec<u8>,
        /// Record id bound at the landed entry.
        id: RecordId,
    },
    /// No entry exists at or past the sought key in iteration order.
    NotFound,
}

/// A scan over a writable [`OrderedIndex`](crate::OrderedIndex).
///
/// Holds a private engine cursor for its whole lifetime, so it observes
/// the engine's cursor isolation: mutations made to the index after the
/// iterator's first positioning are not guaranteed to be visible.
pub struct IndexIter {
    schema: Arc<Schema>,
    table: String,
    cursor: Box<dyn EngineCursor>,
    direction: Direction,
    exhausted: bool,
    buf: Vec<u8>,
}

impl IndexIter {
    pub(crate) fn new(
        schema: Arc<Schema>,
        table: String,
        cursor: Box<dyn EngineCursor>,
        direction: Direction,
    ) -> Self {
        Self {
            schema,
            table,
            cursor,
            direction,
            exhausted: false,
            buf: Vec::new(),
        }
    }

    fn step(&mut self) -> CoreResult<bool> {
        let moved = match self.direction {
            Direction::Forward => self.cursor.next(),
            Direction::Backward => self.cursor.prev(),
        };
        moved.map_err(|e| CoreError::cursor("step", &self.table, e))
    }

    /// Reads the entry under the cursor as a logical key and id.
    fn current(&self) -> CoreResult<Option<(Vec<u8>, RecordId)>> {
        let Some((key, value)) = self.cursor.entry() else {
            return Ok(None);
        };
        let (part, id) = split_entry(&self.schema, key, value)?;
        let logical = if self.schema.needs_byte_lex() {
            let mut out = Vec::with_capacity(part.len());
            codec::from_storage(&self.schema, part, &mut out)?;
            out
        } else {
            part.to_vec()
        };
        Ok(Some((logical, id)))
    }

    /// Classifies the entry the seek landed on against the target in
    /// `buf[..part_len]`.
    fn landed(&mut self, part_len: usize) -> CoreResult<SeekOutcome> {
        let exact = match self.cursor.entry() {
            Some((key, value)) => {
                let (part, _) = split_entry(&self.schema, key, value)?;
                part == &self.buf[..part_len]
            }
            None => {
                self.exhausted = true;
                return Ok(SeekOutcome::NotFound);
            }
        };
        match self.current()? {
            Some((key, id)) if exact => Ok(SeekOutcome::Found { key, id }),
            Some((key, id)) => Ok(SeekOutcome::After { key, id }),
            None => {
                self.exhausted = true;
                Ok(SeekOutcome::NotFound)
            }
        }
    }
}

impl IndexCursor for IndexIter {
    fn increment(&mut self) -> CoreResult<Option<(Vec<u8>, RecordId)>> {
        if self.exhausted {
            return Ok(None);
        }
        if !self.step()? {
            self.exhausted = true;
            return Ok(None);
        }
        self.current()
    }

    fn seek_lower_bound(&mut self, key: &[u8]) -> CoreResult<SeekOutcome> {
        self.exhausted = false;
        self.buf.clear();
        if self.schema.needs_byte_lex() {
            codec::to_storage(&self.schema, key, &mut self.buf)?;
        } else {
            self.buf.extend_from_slice(key);
        }
        let part_len = self.buf.len();
        if !self.schema.is_unique() {
            // Seek at id 0 so every binding of the key is at or after the
            // target.
            self.buf.extend_from_slice(&id_suffix(0));
        }
        let cmp = match self.cursor.search_near(&self.buf) {
            Ok(cmp) => cmp,
            Err(e) if e.is_not_found() => {
                self.exhausted = true;
                return Ok(SeekOutcome::NotFound);
            }
            Err(e) => return Err(CoreError::cursor("seek", &self.table, e)),
        };
        match (self.direction, cmp) {
            (Direction::Forward, Ordering::Less) => {
                // Landed before the target with nothing at or after it.
                self.exhausted = true;
                Ok(SeekOutcome::NotFound)
            }
            (Direction::Backward, Ordering::Greater) => {
                // Landed past the target; the lower bound is one step back.
                match self.increment()? {
                    Some((key, id)) => Ok(SeekOutcome::After { key, id }),
                    None => Ok(SeekOutcome::NotFound),
                }
            }
            _ => self.landed(part_len),
        }
    }

    fn reset(&mut self) {
        self.cursor.reset();
        self.exhausted = false;
    }
}
