//! # SegStore Engine
//!
//! Sorted key-value engine contract and reference implementation for SegStore.
//!
//! This crate defines the collaborator interface that SegStore's ordered
//! indexes are built against. An engine is an **ordered byte-string map**
//! accessed through cursors; it does not understand schemas, segments, or
//! record identifiers.
//!
//! ## Design Principles
//!
//! - Engines store opaque keys and values, ordered by unsigned byte
//!   comparison
//! - Every concurrent actor owns its own cursor; cursors are never shared
//! - Expected outcomes (`NotFound`, `DuplicateKey`) are distinguished error
//!   codes, everything else is fatal
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - In-memory B-tree engine with file checkpointing,
//!   used by tests and writable segments

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod file;
mod memory;

pub use engine::{CursorOptions, EngineCursor, SortedEngine};
pub use error::{EngineError, EngineResult};
pub use file::{read_table_file, write_table_file};
pub use memory::MemoryEngine;
