//! On-disk table file codec.
//!
//! A table file is a flat sequence of length-prefixed records:
//!
//! ```text
//! | key_len (4, LE) | value_len (4, LE) | key (N) | value (M) | ...
//! ```
//!
//! Records are written in ascending key order, so a reader can rebuild an
//! ordered table or serve it as an immutable index without re-sorting.
//! Writes go through a temporary file renamed into place so a crashed
//! checkpoint never leaves a half-written file behind.

use crate::error::{EngineError, EngineResult};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes `entries` to `path` atomically.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be written or renamed.
pub fn write_table_file<'a, I>(path: &Path, entries: I) -> EngineResult<()>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let tmp = path.with_extension("tmp");
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        for (key, value) in entries {
            out.write_all(&(key.len() as u32).to_le_bytes())?;
            out.write_all(&(value.len() as u32).to_le_bytes())?;
            out.write_all(key)?;
            out.write_all(value)?;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads every record from a table file.
///
/// # Errors
///
/// Returns [`EngineError::Corrupted`] when the file ends mid-record.
pub fn read_table_file(path: &Path) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let data = fs::read(path)?;
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < 8 {
            return Err(corrupted(path, pos));
        }
        let key_len = read_u32(&data[pos..]) as usize;
        let value_len = read_u32(&data[pos + 4..]) as usize;
        pos += 8;
        if data.len() - pos < key_len + value_len {
            return Err(corrupted(path, pos));
        }
        let key = data[pos..pos + key_len].to_vec();
        pos += key_len;
        let value = data[pos..pos + value_len].to_vec();
        pos += value_len;
        entries.push((key, value));
    }
    Ok(entries)
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

fn corrupted(path: &Path, pos: usize) -> EngineError {
    EngineError::Corrupted(format!(
        "truncated record at offset {} in {}",
        pos,
        path.display()
    ))
}
