//! In-memory sorted engine with file checkpointing.

use crate::engine::{CursorOptions, EngineCursor, SortedEngine};
use crate::error::{EngineError, EngineResult};
use crate::file::{read_table_file, write_table_file};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;
type Table = Arc<RwLock<TableMap>>;

/// An in-memory sorted engine.
///
/// Each table is a `BTreeMap` shared between the engine and its cursors.
/// `checkpoint` persists a table to `home/<table>` and `create_table`
/// reloads such a file, so data survives reopening the engine on the same
/// directory.
///
/// This engine backs writable segments and the test suite; production
/// deployments would bind an embedded store behind the same
/// [`SortedEngine`] contract.
///
/// # Thread Safety
///
/// The engine handle is shared read-only across threads. Cursors are
/// single-owner; see [`EngineCursor`].
pub struct MemoryEngine {
    home: PathBuf,
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryEngine {
    /// Opens an engine rooted at `home`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(home: impl Into<PathBuf>) -> EngineResult<Self> {
        let home = home.into();
        fs::create_dir_all(&home)?;
        Ok(Self {
            home,
            tables: RwLock::new(HashMap::new()),
        })
    }

    fn table(&self, name: &str) -> EngineResult<Table> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::TableMissing(name.to_string()))
    }
}

impl SortedEngine for MemoryEngine {
    fn home(&self) -> &Path {
        &self.home
    }

    fn create_table(&self, table: &str) -> EngineResult<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(table) {
            return Ok(());
        }
        let path = self.home.join(table);
        let map = if path.exists() {
            read_table_file(&path)?.into_iter().collect()
        } else {
            TableMap::new()
        };
        tables.insert(table.to_string(), Arc::new(RwLock::new(map)));
        Ok(())
    }

    fn open_cursor(&self, table: &str, options: CursorOptions) -> EngineResult<Box<dyn EngineCursor>> {
        let table = self.table(table)?;
        Ok(Box::new(MemoryCursor {
            table,
            overwrite: options.overwrite,
            snapshot: None,
            current: None,
        }))
    }

    fn truncate_table(&self, table: &str) -> EngineResult<()> {
        self.table(table)?.write().clear();
        Ok(())
    }

    fn checkpoint(&self, table: &str) -> EngineResult<()> {
        let map = self.table(table)?;
        let map = map.read();
        write_table_file(
            &self.home.join(table),
            map.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        )
    }
}

/// Cursor over one in-memory table.
///
/// Positioning operations work against a snapshot of the table taken when
/// the cursor first positions itself, giving stable-cursor isolation: a
/// scan is never torn by concurrent mutation. Mutations act on the live
/// table and return the cursor to the unpositioned state, dropping the
/// snapshot.
struct MemoryCursor {
    table: Table,
    overwrite: bool,
    snapshot: Option<TableMap>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl MemoryCursor {
    fn unposition(&mut self) {
        self.snapshot = None;
        self.current = None;
    }

    /// Takes the current snapshot, cloning the live table when unpositioned.
    fn snapshot(&mut self) -> TableMap {
        match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => self.table.read().clone(),
        }
    }

    fn step(&mut self, forward: bool) -> EngineResult<bool> {
        let snapshot = self.snapshot();
        let landed = {
            let range = match &self.current {
                None => snapshot.range::<[u8], _>(..),
                Some((k, _)) if forward => {
                    snapshot.range::<[u8], _>((Bound::Excluded(k.as_slice()), Bound::Unbounded))
                }
                Some((k, _)) => {
                    snapshot.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(k.as_slice())))
                }
            };
            let entry = if forward {
                range.into_iter().next()
            } else {
                range.into_iter().next_back()
            };
            entry.map(|(k, v)| (k.clone(), v.clone()))
        };
        self.snapshot = Some(snapshot);
        match landed {
            Some(entry) => {
                self.current = Some(entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl EngineCursor for MemoryCursor {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.unposition();
        let mut map = self.table.write();
        if !self.overwrite && map.contains_key(key) {
            return Err(EngineError::DuplicateKey);
        }
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> EngineResult<()> {
        self.unposition();
        match self.table.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound),
        }
    }

    fn search(&mut self, key: &[u8]) -> EngineResult<Vec<u8>> {
        // Repositioning takes a fresh snapshot.
        self.unposition();
        let snapshot = self.snapshot();
        let found = snapshot.get(key).cloned();
        self.snapshot = Some(snapshot);
        match found {
            Some(value) => {
                self.current = Some((key.to_vec(), value.clone()));
                Ok(value)
            }
            None => Err(EngineError::NotFound),
        }
    }

    fn search_near(&mut self, key: &[u8]) -> EngineResult<Ordering> {
        self.unposition();
        let snapshot = self.snapshot();
        let landed = snapshot
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .or_else(|| snapshot.iter().next_back())
            .map(|(k, v)| (k.clone(), v.clone()));
        self.snapshot = Some(snapshot);
        match landed {
            Some((k, v)) => {
                let cmp = k.as_slice().cmp(key);
                self.current = Some((k, v));
                Ok(cmp)
            }
            None => Err(EngineError::NotFound),
        }
    }

    fn next(&mut self) -> EngineResult<bool> {
        self.step(true)
    }

    fn prev(&mut self) -> EngineResult<bool> {
        self.step(false)
    }

    fn entry(&self) -> Option<(&[u8], &[u8])> {
        self.current
            .as_ref()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    fn reset(&mut self) {
        self.unposition();
    }
}
