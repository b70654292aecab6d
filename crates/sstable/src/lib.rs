//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the StrataDB storage engine.
//!
//! When an immutable memtable is flushed, its records become an SSTable;
//! compaction merges several SSTables into one. Tables are *write-once,
//! read-many* -- once created they are never modified, only superseded and
//! unlinked.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ PREFIX (16 bytes)                                             │
//! │   magic "STDB" | version (u32) | trailer_offset (u64)         │
//! ├───────────────────────────────────────────────────────────────┤
//! │ DATA SECTION (records in ascending key order)                 │
//! │   timestamp (i64) | deleted (u8) | key_len (u32) | key        │
//! │   has_value (u8) | [encoded value]                            │
//! ├───────────────────────────────────────────────────────────────┤
//! │ TRAILER (at trailer_offset)                                   │
//! │   index_count (u32)                                           │
//! │   per entry: key_len (u32) | key | offset (u64) | size (u32)  │
//! │   bloom: bit_count (i32) | hash_count (i32) | bits            │
//! │   min_key_len (u32) | min_key                                 │
//! │   max_key_len (u32) | max_key                                 │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers little-endian. The file is self-describing; there are no
//! sidecar files. Tombstones are stored like live records with
//! `deleted = 1` and no value, so a table can shadow keys in older tables.

use std::io;
use thiserror::Error;

pub mod format;
mod merge;
mod reader;
mod writer;

pub use merge::MergeIterator;
pub use reader::SsTable;
pub use writer::SsTableWriter;

/// Errors that can occur reading or writing SSTables.
#[derive(Debug, Error)]
pub enum SsTableError {
    /// The file violates the format: wrong magic, unsupported version,
    /// out-of-range trailer offset, or a record that disagrees with its
    /// index extent. Fatal for the file.
    #[error("corrupt sstable: {0}")]
    Corrupt(String),

    /// Refusal to write a table with no records.
    #[error("refusing to write an empty sstable")]
    Empty,

    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests;
