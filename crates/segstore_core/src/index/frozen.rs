//! Immutable indexes served from checkpointed table files.

use crate::codec;
use crate::context::OpContext;
use crate::error::{CoreError, CoreResult};
use crate::index::{split_entry, Direction, IndexCursor, RecordId, SeekOutcome};
use crate::schema::Schema;
use segstore_engine::read_table_file;
use std::path::Path;
use std::sync::Arc;

/// A read-only ordered index.
///
/// Loaded whole from the table file a writable index checkpoints, and
/// served from a sorted in-memory vector. Answers the same exact-search
/// and cursor contract as [`OrderedIndex`](crate::OrderedIndex) without
/// an engine underneath.
pub struct FrozenIndex {
    schema: Arc<Schema>,
    /// Storage key part and record id, ascending by (part, id).
    entries: Vec<(Vec<u8>, RecordId)>,
    storage_size: u64,
}

impl FrozenIndex {
    /// Loads the index for `schema` from its table file under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing, corrupted, or holds
    /// entries that do not match the schema.
    pub fn load(dir: &Path, schema: Arc<Schema>) -> CoreResult<Self> {
        let path = dir.join(schema.table_name());
        let raw = read_table_file(&path).map_err(|e| CoreError::persist("load", path, e))?;
        let mut entries = Vec::with_capacity(raw.len());
        let mut storage_size = 0u64;
        for (key, value) in &raw {
            let (part, id) = split_entry(&schema, key, value)?;
            // Record footprint: length framing plus engine key and value,
            // summing to the table file's length.
            storage_size += (8 + key.len() + value.len()) as u64;
            entries.push((part.to_vec(), id));
        }
        tracing::debug!(
            table = %schema.table_name(),
            entries = entries.len(),
            "loaded frozen index"
        );
        Ok(Self {
            schema,
            entries,
            storage_size,
        })
    }

    /// The schema this index is built on.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index holds no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Storage footprint in bytes, equal to the table file's length and to
    /// the writable side's running estimate for the same bindings.
    #[must_use]
    pub fn storage_size(&self) -> u64 {
        self.storage_size
    }

    /// Appends every record id bound to `key` onto `out`, in ascending id
    /// order for non-unique schemas.
    ///
    /// # Errors
    ///
    /// Returns an error when the key does not match the schema.
    pub fn search_exact_append(
        &self,
        key: &[u8],
        out: &mut Vec<RecordId>,
        ctx: &mut OpContext,
    ) -> CoreResult<()> {
        let target = self.storage_key(key, ctx)?;
        let start = self
            .entries
            .partition_point(|(part, _)| part.as_slice() < target);
        for (part, id) in &self.entries[start..] {
            if part.as_slice() != target {
                break;
            }
            out.push(*id);
        }
        Ok(())
    }

    /// Opens an ascending scan.
    #[must_use]
    pub fn iter_forward(&self) -> FrozenIter<'_> {
        FrozenIter::new(self, Direction::Forward)
    }

    /// Opens a descending scan.
    #[must_use]
    pub fn iter_backward(&self) -> FrozenIter<'_> {
        FrozenIter::new(self, Direction::Backward)
    }

    fn storage_key<'a>(&self, key: &'a [u8], ctx: &'a mut OpContext) -> CoreResult<&'a [u8]> {
        if self.schema.needs_byte_lex() {
            ctx.key_buf.clear();
            codec::to_storage(&self.schema, key, &mut ctx.key_buf)?;
            Ok(&ctx.key_buf)
        } else {
            Ok(key)
        }
    }

    fn logical_key(&self, part: &[u8]) -> CoreResult<Vec<u8>> {
        if self.schema.needs_byte_lex() {
            let mut out = Vec::with_capacity(part.len());
            codec::from_storage(&self.schema, part, &mut out)?;
            Ok(out)
        } else {
            Ok(part.to_vec())
        }
    }
}

/// A scan over a [`FrozenIndex`].
pub struct FrozenIter<'a> {
    index: &'a FrozenIndex,
    direction: Direction,
    /// Position of the next entry to yield; `None` when exhausted.
    next_pos: Option<usize>,
    buf: Vec<u8>,
}

impl<'a> FrozenIter<'a> {
    fn new(index: &'a FrozenIndex, direction: Direction) -> Self {
        Self {
            index,
            direction,
            next_pos: Self::start_pos(index, direction),
            buf: Vec::new(),
        }
    }

    fn start_pos(index: &FrozenIndex, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Forward => (!index.entries.is_empty()).then_some(0),
            Direction::Backward => index.entries.len().checked_sub(1),
        }
    }

    fn advance_from(&self, pos: usize) -> Option<usize> {
        match self.direction {
            Direction::Forward => {
                let next = pos + 1;
                (next < self.index.entries.len()).then_some(next)
            }
            Direction::Backward => pos.checked_sub(1),
        }
    }

    fn yield_at(&mut self, pos: usize) -> CoreResult<(Vec<u8>, RecordId)> {
        let (part, id) = &self.index.entries[pos];
        let key = self.index.logical_key(part)?;
        self.next_pos = self.advance_from(pos);
        Ok((key, *id))
    }
}

impl IndexCursor for FrozenIter<'_> {
    fn increment(&mut self) -> CoreResult<Option<(Vec<u8>, RecordId)>> {
        match self.next_pos {
            Some(pos) => self.yield_at(pos).map(Some),
            None => Ok(None),
        }
    }

    fn seek_lower_bound(&mut self, key: &[u8]) -> CoreResult<SeekOutcome> {
        self.buf.clear();
        if self.index.schema.needs_byte_lex() {
            codec::to_storage(&self.index.schema, key, &mut self.buf)?;
        } else {
            self.buf.extend_from_slice(key);
        }
        let entries = &self.index.entries;
        // Position of the first entry at or past (key, id 0).
        let lb = entries.partition_point(|(part, _)| part.as_slice() < self.buf.as_slice());

        let landed = match self.direction {
            Direction::Forward => (lb < entries.len()).then_some(lb),
            Direction::Backward => {
                // An exact hit for the backward bound means the first
                // binding of the key; otherwise the entry just before it.
                let exact = lb < entries.len()
                    && entries[lb].0 == self.buf
                    && (self.index.schema.is_unique() || entries[lb].1 == 0);
                if exact {
                    Some(lb)
                } else {
                    lb.checked_sub(1)
                }
            }
        };
        let Some(pos) = landed else {
            self.next_pos = None;
            return Ok(SeekOutcome::NotFound);
        };
        let exact = match self.direction {
            Direction::Forward => entries[pos].0 == self.buf,
            Direction::Backward => {
                entries[pos].0 == self.buf
                    && (self.index.schema.is_unique() || entries[pos].1 == 0)
            }
        };
        let (key, id) = self.yield_at(pos)?;
        Ok(if exact {
            SeekOutcome::Found { key, id }
        } else {
            SeekOutcome::After { key, id }
        })
    }

    fn reset(&mut self) {
        self.next_pos = Self::start_pos(self.index, self.direction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::OrderedIndex;
    use crate::schema::{ColumnDef, ColumnType};
    use segstore_engine::MemoryEngine;

    fn str_schema(unique: bool) -> Arc<Schema> {
        Arc::new(
            Schema::new("name", vec![ColumnDef::new("name", ColumnType::StrZero)], unique)
                .unwrap(),
        )
    }

    fn key(s: &str) -> Vec<u8> {
        let mut k = s.as_bytes().to_vec();
        k.push(0);
        k
    }

    /// Builds a frozen index by checkpointing a writable one.
    fn frozen(unique: bool, bindings: &[(&str, RecordId)]) -> (tempfile::TempDir, FrozenIndex) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MemoryEngine::open(dir.path()).unwrap());
        let schema = str_schema(unique);
        let writable = OrderedIndex::open(engine, Arc::clone(&schema)).unwrap();
        let mut ctx = OpContext::new();
        for (s, id) in bindings {
            writable.insert(&key(s), *id, &mut ctx).unwrap();
        }
        writable.save().unwrap();
        let frozen = FrozenIndex::load(dir.path(), schema).unwrap();
        (dir, frozen)
    }

    #[test]
    fn search_matches_writable_results() {
        let (_dir, index) = frozen(false, &[("tag", 30), ("tag", 10), ("other", 1)]);
        let mut ctx = OpContext::new();
        let mut out = Vec::new();
        index.search_exact_append(&key("tag"), &mut out, &mut ctx).unwrap();
        assert_eq!(out, [10, 30]);

        out.clear();
        index.search_exact_append(&key("none"), &mut out, &mut ctx).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn storage_size_matches_the_table_file() {
        let (dir, index) = frozen(true, &[("a", 1), ("ccc", 3)]);
        // Per binding: 8 bytes framing, the key, an 8-byte id value.
        let expected = (key("a").len() + 16 + key("ccc").len() + 16) as u64;
        assert_eq!(index.storage_size(), expected);
        assert_eq!(index.len(), 2);

        let file_len = std::fs::metadata(dir.path().join(index.schema().table_name()))
            .unwrap()
            .len();
        assert_eq!(index.storage_size(), file_len);
    }

    #[test]
    fn forward_seeks() {
        let (_dir, index) = frozen(true, &[("a", 1), ("c", 3), ("e", 5)]);
        let mut it = index.iter_forward();
        assert_eq!(
            it.seek_lower_bound(&key("c")).unwrap(),
            SeekOutcome::Found { key: key("c"), id: 3 }
        );
        assert_eq!(it.increment().unwrap(), Some((key("e"), 5)));
        assert_eq!(it.increment().unwrap(), None);

        assert_eq!(
            it.seek_lower_bound(&key("b")).unwrap(),
            SeekOutcome::After { key: key("c"), id: 3 }
        );
        assert_eq!(it.seek_lower_bound(&key("f")).unwrap(), SeekOutcome::NotFound);
    }

    #[test]
    fn backward_seeks() {
        let (_dir, index) = frozen(true, &[("a", 1), ("c", 3), ("e", 5)]);
        let mut it = index.iter_backward();
        assert_eq!(
            it.seek_lower_bound(&key("c")).unwrap(),
            SeekOutcome::Found { key: key("c"), id: 3 }
        );
        assert_eq!(it.increment().unwrap(), Some((key("a"), 1)));
        assert_eq!(it.increment().unwrap(), None);

        assert_eq!(
            it.seek_lower_bound(&key("d")).unwrap(),
            SeekOutcome::After { key: key("c"), id: 3 }
        );
        assert_eq!(it.seek_lower_bound(&key("0")).unwrap(), SeekOutcome::NotFound);
    }

    #[test]
    fn backward_seeks_over_nonunique_keys_match_writable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MemoryEngine::open(dir.path()).unwrap());
        let schema = str_schema(false);
        let writable = OrderedIndex::open(engine, Arc::clone(&schema)).unwrap();
        let mut ctx = OpContext::new();
        writable.insert(&key("aa"), 7, &mut ctx).unwrap();
        for id in [9, 2, 5] {
            writable.insert(&key("dup"), id, &mut ctx).unwrap();
        }
        writable.insert(&key("zz"), 1, &mut ctx).unwrap();
        writable.save().unwrap();
        let frozen = FrozenIndex::load(dir.path(), schema).unwrap();

        // Both sides must land on the same entry for the same target.
        for target in ["aa", "dup", "m", "zz", "zzz"] {
            let mut w = writable.iter_backward().unwrap();
            let mut f = frozen.iter_backward();
            assert_eq!(
                w.seek_lower_bound(&key(target)).unwrap(),
                f.seek_lower_bound(&key(target)).unwrap(),
                "target {target:?}"
            );
        }

        // No dup binding carries id 0, so the bound falls before the key
        // and the scan walks back from there.
        let mut it = frozen.iter_backward();
        assert_eq!(
            it.seek_lower_bound(&key("dup")).unwrap(),
            SeekOutcome::After { key: key("aa"), id: 7 }
        );
        assert_eq!(it.increment().unwrap(), None);

        assert_eq!(
            it.seek_lower_bound(&key("m")).unwrap(),
            SeekOutcome::After { key: key("dup"), id: 9 }
        );
        assert_eq!(it.increment().unwrap(), Some((key("dup"), 5)));
        assert_eq!(it.increment().unwrap(), Some((key("dup"), 2)));
        assert_eq!(it.increment().unwrap(), Some((key("aa"), 7)));
        assert_eq!(it.increment().unwrap(), None);
    }

    #[test]
    fn backward_seek_finds_the_zero_id_binding() {
        let (_dir, index) = frozen(false, &[("dup", 0), ("dup", 4), ("aa", 7)]);
        let mut it = index.iter_backward();
        assert_eq!(
            it.seek_lower_bound(&key("dup")).unwrap(),
            SeekOutcome::Found { key: key("dup"), id: 0 }
        );
        assert_eq!(it.increment().unwrap(), Some((key("aa"), 7)));
        assert_eq!(it.increment().unwrap(), None);
    }

    #[test]
    fn full_scans_both_directions() {
        let (_dir, index) = frozen(true, &[("c", 3), ("a", 1), ("e", 5)]);

        let mut forward = Vec::new();
        let mut it = index.iter_forward();
        while let Some((_, id)) = it.increment().unwrap() {
            forward.push(id);
        }
        assert_eq!(forward, [1, 3, 5]);

        let mut backward = Vec::new();
        let mut it = index.iter_backward();
        while let Some((_, id)) = it.increment().unwrap() {
            backward.push(id);
        }
        assert_eq!(backward, [5, 3, 1]);

        it.reset();
        assert_eq!(it.increment().unwrap(), Some((key("e"), 5)));
    }

    #[test]
    fn empty_index_scans_nothing() {
        let (_dir, index) = frozen(true, &[]);
        assert!(index.is_empty());
        let mut it = index.iter_forward();
        assert_eq!(it.increment().unwrap(), None);
        assert_eq!(it.seek_lower_bound(&key("a")).unwrap(), SeekOutcome::NotFound);
    }

    #[test]
    fn missing_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FrozenIndex::load(dir.path(), str_schema(true)).is_err());
    }
}
