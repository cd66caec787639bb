//! Table segments: one index per declared key.
//!
//! A record touches every index of its segment, one key per index, all
//! under the same record id. Multi-index mutations are not transactional
//! at the engine level; instead a failed fan-out is rolled back index by
//! index so the segment never keeps a partial record.

use crate::context::OpContext;
use crate::error::{CoreError, CoreResult};
use crate::index::{
    FrozenIndex, IndexCursor, InsertOutcome, OrderedIndex, RecordId, ReplaceOutcome,
};
use crate::schema::Schema;
use segstore_engine::SortedEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One index of a segment, writable or frozen.
pub enum SegmentIndex {
    /// Mutable index over the segment's engine.
    Writable(OrderedIndex),
    /// Immutable index loaded from a checkpointed table file.
    Frozen(FrozenIndex),
}

impl SegmentIndex {
    /// The schema this index is built on.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        match self {
            Self::Writable(ix) => ix.schema(),
            Self::Frozen(ix) => ix.schema(),
        }
    }

    /// Appends every record id bound to `key` onto `out`.
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure or a key that does not match
    /// the schema.
    pub fn search_exact_append(
        &self,
        key: &[u8],
        out: &mut Vec<RecordId>,
        ctx: &mut OpContext,
    ) -> CoreResult<()> {
        match self {
            Self::Writable(ix) => ix.search_exact_append(key, out, ctx),
            Self::Frozen(ix) => ix.search_exact_append(key, out, ctx),
        }
    }

    /// Opens an ascending scan.
    ///
    /// # Errors
    ///
    /// Returns an error when a cursor cannot be opened.
    pub fn iter_forward(&self) -> CoreResult<Box<dyn IndexCursor + '_>> {
        match self {
            Self::Writable(ix) => Ok(Box::new(ix.iter_forward()?)),
            Self::Frozen(ix) => Ok(Box::new(ix.iter_forward())),
        }
    }

    /// Opens a descending scan.
    ///
    /// # Errors
    ///
    /// Returns an error when a cursor cannot be opened.
    pub fn iter_backward(&self) -> CoreResult<Box<dyn IndexCursor + '_>> {
        match self {
            Self::Writable(ix) => Ok(Box::new(ix.iter_backward()?)),
            Self::Frozen(ix) => Ok(Box::new(ix.iter_backward())),
        }
    }

    /// Estimated storage footprint in bytes.
    #[must_use]
    pub fn storage_size(&self) -> u64 {
        match self {
            Self::Writable(ix) => ix.storage_size(),
            Self::Frozen(ix) => ix.storage_size(),
        }
    }
}

/// A collection of indexes sharing one record id space.
pub struct Segment {
    dir: PathBuf,
    indexes: Vec<SegmentIndex>,
    readonly: bool,
}

impl Segment {
    /// Creates a writable segment with one [`OrderedIndex`] per schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema list is empty or an index table
    /// cannot be opened.
    pub fn create_writable(
        engine: Arc<dyn SortedEngine>,
        schemas: Vec<Arc<Schema>>,
    ) -> CoreResult<Self> {
        if schemas.is_empty() {
            return Err(CoreError::schema("segment declares no indexes"));
        }
        let dir = engine.home().to_path_buf();
        let indexes = schemas
            .into_iter()
            .map(|schema| {
                OrderedIndex::open(Arc::clone(&engine), schema).map(SegmentIndex::Writable)
            })
            .collect::<CoreResult<Vec<_>>>()?;
        tracing::debug!(dir = ?dir, indexes = indexes.len(), "created writable segment");
        Ok(Self {
            dir,
            indexes,
            readonly: false,
        })
    }

    /// Opens a readonly segment from checkpointed table files under `dir`,
    /// one [`FrozenIndex`] per schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema list is empty or a table file is
    /// missing or corrupted.
    pub fn open_readonly(dir: &Path, schemas: Vec<Arc<Schema>>) -> CoreResult<Self> {
        if schemas.is_empty() {
            return Err(CoreError::schema("segment declares no indexes"));
        }
        let indexes = schemas
            .into_iter()
            .map(|schema| FrozenIndex::load(dir, schema).map(SegmentIndex::Frozen))
            .collect::<CoreResult<Vec<_>>>()?;
        tracing::debug!(dir = ?dir, indexes = indexes.len(), "opened readonly segment");
        Ok(Self {
            dir: dir.to_path_buf(),
            indexes,
            readonly: true,
        })
    }

    /// True when this segment serves frozen indexes.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Directory holding the segment's table files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of indexes.
    #[must_use]
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// The index at `pos`, if any.
    #[must_use]
    pub fn index(&self, pos: usize) -> Option<&SegmentIndex> {
        self.indexes.get(pos)
    }

    /// Inserts a record: binds `keys[i]` to `id` in index `i`.
    ///
    /// If any index reports a duplicate, bindings already made are removed
    /// and [`InsertOutcome::DuplicateKey`] is returned, leaving the
    /// segment without a partial record.
    ///
    /// # Errors
    ///
    /// Returns an error when the segment is readonly, the key count does
    /// not match the index count, or an index fails fatally.
    pub fn insert_record(
        &self,
        keys: &[&[u8]],
        id: RecordId,
        ctx: &mut OpContext,
    ) -> CoreResult<InsertOutcome> {
        self.check_fanout(keys.len())?;
        for (pos, key) in keys.iter().enumerate() {
            match self.writable(pos)?.insert(key, id, ctx)? {
                InsertOutcome::Inserted => {}
                InsertOutcome::DuplicateKey => {
                    for (undo, undo_key) in keys.iter().enumerate().take(pos).rev() {
                        self.writable(undo)?.remove(undo_key, id, ctx)?;
                    }
                    return Ok(InsertOutcome::DuplicateKey);
                }
            }
        }
        Ok(InsertOutcome::Inserted)
    }

    /// Rebinds a record's keys from `old_id` to `new_id` across every
    /// index.
    ///
    /// If any index reports a duplicate, indexes already rebound are
    /// switched back and [`ReplaceOutcome::DuplicateKey`] is returned.
    ///
    /// # Errors
    ///
    /// Returns an error when the segment is readonly, the key count does
    /// not match the index count, or an index fails fatally.
    pub fn replace_record(
        &self,
        keys: &[&[u8]],
        old_id: RecordId,
        new_id: RecordId,
        ctx: &mut OpContext,
    ) -> CoreResult<ReplaceOutcome> {
        self.check_fanout(keys.len())?;
        for (pos, key) in keys.iter().enumerate() {
            match self.writable(pos)?.replace(key, old_id, new_id, ctx)? {
                ReplaceOutcome::Replaced => {}
                ReplaceOutcome::DuplicateKey => {
                    for (undo, undo_key) in keys.iter().enumerate().take(pos).rev() {
                        self.writable(undo)?.replace(undo_key, new_id, old_id, ctx)?;
                    }
                    return Ok(ReplaceOutcome::DuplicateKey);
                }
            }
        }
        Ok(ReplaceOutcome::Replaced)
    }

    /// Removes a record's bindings from every index.
    ///
    /// Absent bindings are skipped, matching the per-index remove
    /// contract.
    ///
    /// # Errors
    ///
    /// Returns an error when the segment is readonly, the key count does
    /// not match the index count, or an index fails fatally.
    pub fn remove_record(&self, keys: &[&[u8]], id: RecordId, ctx: &mut OpContext) -> CoreResult<()> {
        self.check_fanout(keys.len())?;
        for (pos, key) in keys.iter().enumerate() {
            self.writable(pos)?.remove(key, id, ctx)?;
        }
        Ok(())
    }

    /// Appends the record ids bound to `key` in index `index_pos`.
    ///
    /// # Errors
    ///
    /// Returns an error when the index position is out of range or the
    /// index fails.
    pub fn search_exact(
        &self,
        index_pos: usize,
        key: &[u8],
        out: &mut Vec<RecordId>,
        ctx: &mut OpContext,
    ) -> CoreResult<()> {
        self.index_at(index_pos)?.search_exact_append(key, out, ctx)
    }

    /// Opens an ascending scan of index `index_pos`.
    ///
    /// # Errors
    ///
    /// Returns an error when the index position is out of range or a
    /// cursor cannot be opened.
    pub fn iter_forward(&self, index_pos: usize) -> CoreResult<Box<dyn IndexCursor + '_>> {
        self.index_at(index_pos)?.iter_forward()
    }

    /// Opens a descending scan of index `index_pos`.
    ///
    /// # Errors
    ///
    /// Returns an error when the index position is out of range or a
    /// cursor cannot be opened.
    pub fn iter_backward(&self, index_pos: usize) -> CoreResult<Box<dyn IndexCursor + '_>> {
        self.index_at(index_pos)?.iter_backward()
    }

    /// Checkpoints every writable index; a no-op on readonly segments.
    ///
    /// # Errors
    ///
    /// Returns an error when a checkpoint fails.
    pub fn save(&self) -> CoreResult<()> {
        for index in &self.indexes {
            if let SegmentIndex::Writable(ix) = index {
                ix.save()?;
            }
        }
        Ok(())
    }

    /// Refreshes every writable index's storage size estimate from its
    /// checkpointed file; a no-op on readonly segments.
    ///
    /// # Errors
    ///
    /// Returns an error when a file cannot be inspected.
    pub fn load(&self) -> CoreResult<()> {
        for index in &self.indexes {
            if let SegmentIndex::Writable(ix) = index {
                ix.load()?;
            }
        }
        Ok(())
    }

    /// Removes every binding from every index.
    ///
    /// # Errors
    ///
    /// Returns an error when the segment is readonly or an index fails.
    pub fn clear(&self) -> CoreResult<()> {
        if self.readonly {
            return Err(CoreError::invalid_operation(
                "clear is not permitted on a readonly segment",
            ));
        }
        for pos in 0..self.indexes.len() {
            self.writable(pos)?.clear()?;
        }
        Ok(())
    }

    /// Sum of the indexes' storage footprints in bytes.
    #[must_use]
    pub fn total_storage_size(&self) -> u64 {
        self.indexes.iter().map(SegmentIndex::storage_size).sum()
    }

    fn check_fanout(&self, keys: usize) -> CoreResult<()> {
        if keys != self.indexes.len() {
            return Err(CoreError::invalid_operation(format!(
                "record carries {keys} keys but the segment has {} indexes",
                self.indexes.len()
            )));
        }
        Ok(())
    }

    fn index_at(&self, pos: usize) -> CoreResult<&SegmentIndex> {
        self.indexes.get(pos).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "index position {pos} out of range for a segment with {} indexes",
                self.indexes.len()
            ))
        })
    }

    fn writable(&self, pos: usize) -> CoreResult<&OrderedIndex> {
        match self.index_at(pos)? {
            SegmentIndex::Writable(ix) => Ok(ix),
            SegmentIndex::Frozen(_) => Err(CoreError::invalid_operation(
                "mutation is not permitted on a readonly segment",
            )),
        }
    }
}
