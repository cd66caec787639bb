//! # SegStore Core
//!
//! Schema-driven ordered indexes and table segments.
//!
//! A logical table is partitioned into segments: **writable** segments keep
//! one [`OrderedIndex`] per declared key on top of a pluggable sorted
//! key-value engine, and **readonly** segments serve the same cursor
//! contract from immutable [`FrozenIndex`] structures.
//!
//! This crate provides:
//! - [`Schema`] / key codec: deterministic, byte-lexicographically
//!   comparable encoding of heterogeneous typed columns
//! - [`OrderedIndex`]: insert / replace / remove / exact search with
//!   engine-authoritative uniqueness and per-index structural locking
//! - [`IndexIter`]: bidirectional cursors with lower-bound seeking
//! - [`Segment`]: per-key index ownership and save / load / clear fan-out

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod context;
mod error;
mod index;
mod schema;
mod segment;

pub use context::OpContext;
pub use error::{CoreError, CoreResult};
pub use index::{
    Direction, FrozenIndex, FrozenIter, IndexCursor, IndexIter, InsertOutcome, OrderedIndex,
    RecordId, ReplaceOutcome, SeekOutcome, NO_RECORD,
};
pub use schema::{ColumnDef, ColumnType, Schema};
pub use segment::{Segment, SegmentIndex};
