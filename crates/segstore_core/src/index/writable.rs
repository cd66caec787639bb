//! Writable ordered index over a sorted engine.

use crate::codec;
use crate::context::OpContext;
use crate::error::{CoreError, CoreResult};
use crate::index::{
    id_from_suffix, id_suffix, Direction, IndexIter, InsertOutcome, RecordId, ReplaceOutcome,
    NONUNIQUE_MARKER,
};
use crate::schema::Schema;
use parking_lot::Mutex;
use segstore_engine::{CursorOptions, EngineCursor, EngineError, SortedEngine};
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicI64, Ordering as MemOrdering};
use std::sync::Arc;

/// The two long-lived point cursors of an index.
///
/// `point` rejects duplicates, making the engine authoritative for
/// uniqueness; `replace` overwrites. Both live behind the structural mutex
/// so every point operation on the index is serialized.
struct PointCursors {
    point: Box<dyn EngineCursor>,
    replace: Box<dyn EngineCursor>,
}

/// A mutable ordered index mapping logical keys to record ids.
///
/// The index owns one engine table named after its schema. Point
/// operations share two long-lived cursors under a mutex; scans open a
/// private cursor per [`IndexIter`] and proceed without blocking point
/// operations.
///
/// Uniqueness is enforced by the engine, not by a read-then-write: the
/// insert itself reports the duplicate, so concurrent inserts of the same
/// key admit exactly one winner.
pub struct OrderedIndex {
    schema: Arc<Schema>,
    engine: Arc<dyn SortedEngine>,
    table: String,
    cursors: Mutex<PointCursors>,
    /// Estimated on-disk size: each binding counts its table-file record
    /// footprint (length framing, engine key, value), so the running
    /// estimate matches what [`load`](Self::load) reads back from the
    /// checkpointed file.
    storage_size: AtomicI64,
}

impl OrderedIndex {
    /// Opens (creating if needed) the index table on `engine`.
    ///
    /// # Errors
    ///
    /// Returns an error when the table cannot be created or cursors cannot
    /// be opened.
    pub fn open(engine: Arc<dyn SortedEngine>, schema: Arc<Schema>) -> CoreResult<Self> {
        let table = schema.table_name();
        engine
            .create_table(&table)
            .map_err(|e| CoreError::open("table", engine.home(), &table, e))?;
        let point = engine
            .open_cursor(&table, CursorOptions::default())
            .map_err(|e| CoreError::open("cursor", engine.home(), &table, e))?;
        let replace = engine
            .open_cursor(&table, CursorOptions::overwriting())
            .map_err(|e| CoreError::open("cursor", engine.home(), &table, e))?;
        tracing::debug!(table = %table, unique = schema.is_unique(), "opened writable index");
        Ok(Self {
            schema,
            engine,
            table,
            cursors: Mutex::new(PointCursors { point, replace }),
            storage_size: AtomicI64::new(0),
        })
    }

    /// The schema this index is built on.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The engine table backing this index.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Binds `key` to `id`.
    ///
    /// Returns [`InsertOutcome::DuplicateKey`] without mutating when the
    /// key is already bound (unique schema) or the exact key-id pair
    /// already exists (non-unique schema).
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure or a key that does not match
    /// the schema.
    pub fn insert(
        &self,
        key: &[u8],
        id: RecordId,
        ctx: &mut OpContext,
    ) -> CoreResult<InsertOutcome> {
        let delta = entry_size(key, self.schema.is_unique());
        let value = id_suffix(id);
        let (entry, value): (&[u8], &[u8]) = if self.schema.is_unique() {
            (self.entry_key(key, None, ctx)?, &value)
        } else {
            (self.entry_key(key, Some(id), ctx)?, NONUNIQUE_MARKER)
        };
        let mut cursors = self.cursors.lock();
        match cursors.point.insert(entry, value) {
            Ok(()) => {
                self.storage_size.fetch_add(delta, MemOrdering::Relaxed);
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if e.is_duplicate() => Ok(InsertOutcome::DuplicateKey),
            Err(e) => Err(self.fatal("insert", Some(key), e)),
        }
    }

    /// Rebinds `key` from `old_id` to `new_id`.
    ///
    /// For a unique schema this overwrites the single binding. For a
    /// non-unique schema the new binding is inserted before the old one is
    /// removed, so the key never transiently has no binding; if the new
    /// binding already exists nothing is mutated and
    /// [`ReplaceOutcome::DuplicateKey`] is returned.
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure or a key that does not match
    /// the schema.
    pub fn replace(
        &self,
        key: &[u8],
        old_id: RecordId,
        new_id: RecordId,
        ctx: &mut OpContext,
    ) -> CoreResult<ReplaceOutcome> {
        if self.schema.is_unique() {
            let value = id_suffix(new_id);
            let entry = self.entry_key(key, None, ctx)?;
            let mut cursors = self.cursors.lock();
            cursors
                .replace
                .insert(entry, &value)
                .map_err(|e| self.fatal("replace", Some(key), e))?;
            return Ok(ReplaceOutcome::Replaced);
        }

        let delta = entry_size(key, self.schema.is_unique());
        let mut cursors = self.cursors.lock();
        {
            // Probe first, then insert the new binding before removing the
            // old one: the key never transiently has no binding, and a
            // duplicate leaves the index untouched. The mutex makes the
            // probe-then-insert race-free.
            let new_entry = self.entry_key(key, Some(new_id), ctx)?;
            match cursors.replace.search(new_entry) {
                Ok(_) => return Ok(ReplaceOutcome::DuplicateKey),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(self.fatal("replace", Some(key), e)),
            }
            cursors
                .replace
                .insert(new_entry, NONUNIQUE_MARKER)
                .map_err(|e| self.fatal("replace", Some(key), e))?;
            self.storage_size.fetch_add(delta, MemOrdering::Relaxed);
        }
        let old_entry = self.entry_key(key, Some(old_id), ctx)?;
        match cursors.replace.remove(old_entry) {
            Ok(()) => self.shrink(delta),
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    table = %self.table,
                    key = %self.schema.display_key(key),
                    old_id,
                    "replace found no old binding to remove"
                );
            }
            Err(e) => return Err(self.fatal("replace", Some(key), e)),
        }
        Ok(ReplaceOutcome::Replaced)
    }

    /// Unbinds `key` from `id`.
    ///
    /// Removing an absent binding is not an error; it logs a warning and
    /// returns false, so removal is idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure or a key that does not match
    /// the schema.
    pub fn remove(&self, key: &[u8], id: RecordId, ctx: &mut OpContext) -> CoreResult<bool> {
        let delta = entry_size(key, self.schema.is_unique());
        let entry = if self.schema.is_unique() {
            self.entry_key(key, None, ctx)?
        } else {
            self.entry_key(key, Some(id), ctx)?
        };
        let mut cursors = self.cursors.lock();
        match cursors.point.remove(entry) {
            Ok(()) => {
                self.shrink(delta);
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    table = %self.table,
                    key = %self.schema.display_key(key),
                    id,
                    "remove of absent index entry"
                );
                Ok(false)
            }
            Err(e) => Err(self.fatal("remove", Some(key), e)),
        }
    }

    /// Appends every record id bound to `key` onto `out`, in ascending id
    /// order for non-unique schemas.
    ///
    /// An unbound key appends nothing.
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
        if self.schema.is_unique() {
            let entry = self.entry_key(key, None, ctx)?;
            let mut cursors = self.cursors.lock();
            let found = match cursors.point.search(entry) {
                Ok(value) => Some(value),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(self.fatal("search", Some(key), e)),
            };
            cursors.point.reset();
            drop(cursors);
            if let Some(value) = found {
                out.push(id_from_suffix(&self.schema, &value)?);
            }
            return Ok(());
        }

        let entry = self.entry_key(key, Some(0), ctx)?;
        let part_len = entry.len() - 8;
        let mut cursors = self.cursors.lock();
        let cur = &mut cursors.point;
        match cur.search_near(entry) {
            Ok(Ordering::Less) | Err(EngineError::NotFound) => {
                cur.reset();
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(self.fatal("search", Some(key), e)),
        }
        loop {
            let id = match cur.entry() {
                Some((k, _)) if k.len() == part_len + 8 && k[..part_len] == entry[..part_len] => {
                    id_from_suffix(&self.schema, &k[part_len..])?
                }
                _ => break,
            };
            out.push(id);
            if !cur.next().map_err(|e| self.fatal("search", Some(key), e))? {
                break;
            }
        }
        cur.reset();
        Ok(())
    }

    /// Opens an ascending scan.
    ///
    /// # Errors
    ///
    /// Returns an error when a cursor cannot be opened.
    pub fn iter_forward(&self) -> CoreResult<IndexIter> {
        self.open_iter(Direction::Forward)
    }

    /// Opens a descending scan.
    ///
    /// # Errors
    ///
    /// Returns an error when a cursor cannot be opened.
    pub fn iter_backward(&self) -> CoreResult<IndexIter> {
        self.open_iter(Direction::Backward)
    }

    fn open_iter(&self, direction: Direction) -> CoreResult<IndexIter> {
        // Serialize against point mutations so the iterator's first
        // snapshot is well defined.
        let _cursors = self.cursors.lock();
        let cursor = self
            .engine
            .open_cursor(&self.table, CursorOptions::default())
            .map_err(|e| CoreError::open("cursor", self.engine.home(), &self.table, e))?;
        Ok(IndexIter::new(
            Arc::clone(&self.schema),
            self.table.clone(),
            cursor,
            direction,
        ))
    }

    /// Checkpoints the index table durably under the engine home.
    ///
    /// # Errors
    ///
    /// Returns an error when the checkpoint fails.
    pub fn save(&self) -> CoreResult<()> {
        self.engine
            .checkpoint(&self.table)
            .map_err(|e| CoreError::persist("save", self.engine.home().join(&self.table), e))
    }

    /// Refreshes the storage size estimate from the checkpointed table
    /// file, without scanning entries.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be inspected.
    pub fn load(&self) -> CoreResult<()> {
        let path = self.engine.home().join(&self.table);
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len() as i64,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(CoreError::io(path, e)),
        };
        self.storage_size.store(len, MemOrdering::Relaxed);
        Ok(())
    }

    /// Removes every binding.
    ///
    /// # Errors
    ///
    /// Returns an error on engine failure.
    pub fn clear(&self) -> CoreResult<()> {
        let mut cursors = self.cursors.lock();
        cursors.point.reset();
        cursors.replace.reset();
        self.engine
            .truncate_table(&self.table)
            .map_err(|e| self.fatal("clear", None, e))?;
        self.storage_size.store(0, MemOrdering::Relaxed);
        Ok(())
    }

    /// Estimated storage footprint in bytes.
    #[must_use]
    pub fn storage_size(&self) -> u64 {
        self.storage_size.load(MemOrdering::Relaxed).max(0) as u64
    }

    /// Builds the engine entry key for `key`, with the id suffix appended
    /// when `id` is given. Borrows from `key` directly when no rewrite is
    /// needed, otherwise from the context scratch buffer.
    fn entry_key<'a>(
        &self,
        key: &'a [u8],
        id: Option<RecordId>,
        ctx: &'a mut OpContext,
    ) -> CoreResult<&'a [u8]> {
        if !self.schema.needs_byte_lex() && id.is_none() {
            return Ok(key);
        }
        ctx.key_buf.clear();
        if self.schema.needs_byte_lex() {
            codec::to_storage(&self.schema, key, &mut ctx.key_buf)?;
        } else {
            ctx.key_buf.extend_from_slice(key);
        }
        if let Some(id) = id {
            ctx.key_buf.extend_from_slice(&id_suffix(id));
        }
        Ok(&ctx.key_buf)
    }

    fn shrink(&self, delta: i64) {
        // Clamp at zero; the estimate must never go negative.
        let _ = self
            .storage_size
            .fetch_update(MemOrdering::Relaxed, MemOrdering::Relaxed, |v| {
                Some((v - delta).max(0))
            });
    }

    fn fatal(&self, op: &'static str, key: Option<&[u8]>, source: EngineError) -> CoreError {
        CoreError::IndexOp {
            op,
            dir: self.engine.home().to_path_buf(),
            table: self.table.clone(),
            key: key.map_or_else(|| "*".to_string(), |k| self.schema.display_key(k)),
            source,
        }
    }
}

/// Table-file record footprint of one binding: 8 bytes of length framing
/// plus the engine key and value. Storage rewrites preserve length, so the
/// logical key sizes the entry.
fn entry_size(key: &[u8], unique: bool) -> i64 {
    let (key_len, value_len) = if unique {
        (key.len(), 8)
    } else {
        (key.len() + 8, NONUNIQUE_MARKER.len())
    };
    (8 + key_len + value_len) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType};
    use segstore_engine::MemoryEngine;
    use std::thread;

    fn str_schema(unique: bool) -> Arc<Schema> {
        Arc::new(
            Schema::new("name", vec![ColumnDef::new("name", ColumnType::StrZero)], unique)
                .unwrap(),
        )
    }

    fn index(unique: bool) -> (tempfile::TempDir, OrderedIndex) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MemoryEngine::open(dir.path()).unwrap());
        let index = OrderedIndex::open(engine, str_schema(unique)).unwrap();
        (dir, index)
    }

    fn key(s: &str) -> Vec<u8> {
        let mut k = s.as_bytes().to_vec();
        k.push(0);
        k
    }

    fn ids(index: &OrderedIndex, k: &[u8], ctx: &mut OpContext) -> Vec<RecordId> {
        let mut out = Vec::new();
        index.search_exact_append(k, &mut out, ctx).unwrap();
        out
    }

    #[test]
    fn unique_insert_and_search() {
        let (_dir, index) = index(true);
        let mut ctx = OpContext::new();
        assert_eq!(
            index.insert(&key("ann"), 10, &mut ctx).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(ids(&index, &key("ann"), &mut ctx), [10]);
        assert!(ids(&index, &key("bob"), &mut ctx).is_empty());
    }

    #[test]
    fn unique_duplicate_rejected_without_mutation() {
        let (_dir, index) = index(true);
        let mut ctx = OpContext::new();
        index.insert(&key("ann"), 10, &mut ctx).unwrap();
        let size = index.storage_size();
        assert_eq!(
            index.insert(&key("ann"), 11, &mut ctx).unwrap(),
            InsertOutcome::DuplicateKey
        );
        assert_eq!(ids(&index, &key("ann"), &mut ctx), [10]);
        assert_eq!(index.storage_size(), size);
    }

    #[test]
    fn concurrent_unique_inserts_admit_one_winner() {
        let (_dir, index) = index(true);
        let index = Arc::new(index);
        let mut handles = Vec::new();
        for id in 0..8 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                let mut ctx = OpContext::new();
                index.insert(&key("contested"), id, &mut ctx).unwrap()
            }));
        }
        let outcomes: Vec<InsertOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = outcomes
            .iter()
            .filter(|o| **o == InsertOutcome::Inserted)
            .count();
        assert_eq!(winners, 1);

        let mut ctx = OpContext::new();
        assert_eq!(ids(&index, &key("contested"), &mut ctx).len(), 1);
    }

    #[test]
    fn nonunique_key_holds_many_ids() {
        let (_dir, index) = index(false);
        let mut ctx = OpContext::new();
        for id in [30, 10, 20] {
            assert_eq!(
                index.insert(&key("tag"), id, &mut ctx).unwrap(),
                InsertOutcome::Inserted
            );
        }
        // Ascending id order.
        assert_eq!(ids(&index, &key("tag"), &mut ctx), [10, 20, 30]);

        // The exact pair is a duplicate; a new id is not.
        assert_eq!(
            index.insert(&key("tag"), 20, &mut ctx).unwrap(),
            InsertOutcome::DuplicateKey
        );
        assert_eq!(
            index.insert(&key("tag"), 40, &mut ctx).unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[test]
    fn remove_is_idempotent_and_size_never_negative() {
        let (_dir, index) = index(true);
        let mut ctx = OpContext::new();
        index.insert(&key("ann"), 1, &mut ctx).unwrap();
        assert!(index.remove(&key("ann"), 1, &mut ctx).unwrap());
        assert!(!index.remove(&key("ann"), 1, &mut ctx).unwrap());
        assert!(!index.remove(&key("ghost"), 9, &mut ctx).unwrap());
        assert_eq!(index.storage_size(), 0);
    }

    #[test]
    fn replace_unique_rebinds() {
        let (_dir, index) = index(true);
        let mut ctx = OpContext::new();
        index.insert(&key("ann"), 1, &mut ctx).unwrap();
        let size = index.storage_size();
        assert_eq!(
            index.replace(&key("ann"), 1, 2, &mut ctx).unwrap(),
            ReplaceOutcome::Replaced
        );
        assert_eq!(ids(&index, &key("ann"), &mut ctx), [2]);
        assert_eq!(index.storage_size(), size);
    }

    #[test]
    fn replace_nonunique_never_drops_to_zero_bindings() {
        let (_dir, index) = index(false);
        let mut ctx = OpContext::new();
        index.insert(&key("tag"), 1, &mut ctx).unwrap();
        index.insert(&key("tag"), 2, &mut ctx).unwrap();

        assert_eq!(
            index.replace(&key("tag"), 1, 3, &mut ctx).unwrap(),
            ReplaceOutcome::Replaced
        );
        assert_eq!(ids(&index, &key("tag"), &mut ctx), [2, 3]);

        // New binding already exists: nothing changes.
        assert_eq!(
            index.replace(&key("tag"), 2, 3, &mut ctx).unwrap(),
            ReplaceOutcome::DuplicateKey
        );
        assert_eq!(ids(&index, &key("tag"), &mut ctx), [2, 3]);
    }

    #[test]
    fn storage_size_tracks_inserts_and_removes() {
        let (_dir, index) = index(true);
        let mut ctx = OpContext::new();
        let keys = [key("a"), key("bb"), key("ccc")];
        // Per binding: 8 bytes framing, the key, an 8-byte id value.
        let expected: u64 = keys.iter().map(|k| (k.len() + 16) as u64).sum();
        for (id, k) in keys.iter().enumerate() {
            index.insert(k, id as RecordId, &mut ctx).unwrap();
        }
        assert_eq!(index.storage_size(), expected);
        for (id, k) in keys.iter().enumerate() {
            index.remove(k, id as RecordId, &mut ctx).unwrap();
        }
        assert_eq!(index.storage_size(), 0);
    }

    #[test]
    fn save_then_load_keeps_the_size_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MemoryEngine::open(dir.path()).unwrap());
        let index = OrderedIndex::open(engine, str_schema(true)).unwrap();
        let mut ctx = OpContext::new();
        index.insert(&key("ann"), 1, &mut ctx).unwrap();
        index.insert(&key("bob"), 2, &mut ctx).unwrap();

        let before = index.storage_size();
        index.save().unwrap();
        index.load().unwrap();
        assert_eq!(index.storage_size(), before);

        // load() sizes from the file alone, so the file must agree too.
        let file_len = std::fs::metadata(dir.path().join(index.table()))
            .unwrap()
            .len();
        assert_eq!(index.storage_size(), file_len);
    }

    #[test]
    fn nonunique_size_estimate_matches_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MemoryEngine::open(dir.path()).unwrap());
        let index = OrderedIndex::open(engine, str_schema(false)).unwrap();
        let mut ctx = OpContext::new();
        for id in [1, 2, 3] {
            index.insert(&key("tag"), id, &mut ctx).unwrap();
        }

        let before = index.storage_size();
        index.save().unwrap();
        index.load().unwrap();
        assert_eq!(index.storage_size(), before);
    }

    #[test]
    fn clear_removes_everything() {
        let (_dir, index) = index(false);
        let mut ctx = OpContext::new();
        index.insert(&key("tag"), 1, &mut ctx).unwrap();
        index.insert(&key("tag"), 2, &mut ctx).unwrap();
        index.clear().unwrap();
        assert!(ids(&index, &key("tag"), &mut ctx).is_empty());
        assert_eq!(index.storage_size(), 0);
    }
}
