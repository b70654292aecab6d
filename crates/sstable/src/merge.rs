//! Merge iterator over multiple [`SsTable`]s.
//!
//! Produces `(key, Record)` pairs in ascending key order. When the same key
//! appears in multiple tables, only the record with the **greatest
//! timestamp** is emitted; a timestamp tie goes to the newer table.
//!
//! This is the core primitive for compaction: walk N input tables in sorted
//! order, coalesce per key, and hand the survivors to the writer.

use memtable::Record;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{SsTable, SsTableError};

/// A pending key from one source table, used for heap-based merge ordering.
///
/// Only the key and the source index are stored -- the actual [`Record`] is
/// read from disk when the key reaches the top of the heap.
struct HeapEntry {
    key: Vec<u8>,
    /// Index into the `tables` / `key_iters` arrays. Tables are ordered
    /// oldest-first, so a higher source is a newer table.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the key comparison so the
        // smallest key surfaces first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges tables (ordered oldest-first) into one sorted record stream.
pub struct MergeIterator<'a> {
    tables: Vec<&'a SsTable>,
    /// Per-table: sorted keys remaining to be yielded.
    key_iters: Vec<std::vec::IntoIter<Vec<u8>>>,
    heap: BinaryHeap<HeapEntry>,
}

impl<'a> MergeIterator<'a> {
    /// Creates a merge iterator over `tables`, which the caller must pass in
    /// oldest-first order (timestamp ties resolve toward higher indices).
    pub fn new(tables: Vec<&'a SsTable>) -> Self {
        let mut key_iters = Vec::with_capacity(tables.len());
        let mut heap = BinaryHeap::new();

        for (i, table) in tables.iter().enumerate() {
            let keys: Vec<Vec<u8>> = table.keys().map(|k| k.to_vec()).collect();
            let mut iter = keys.into_iter();
            if let Some(first_key) = iter.next() {
                heap.push(HeapEntry {
                    key: first_key,
                    source: i,
                });
            }
            key_iters.push(iter);
        }

        Self {
            tables,
            key_iters,
            heap,
        }
    }

    fn advance(&mut self, source: usize) {
        if let Some(next_key) = self.key_iters[source].next() {
            self.heap.push(HeapEntry {
                key: next_key,
                source,
            });
        }
    }

    /// Returns the next `(key, record)` in ascending key order, or `None`
    /// when all sources are exhausted.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Record)>, SsTableError> {
        let top = match self.heap.pop() {
            Some(e) => e,
            None => return Ok(None),
        };

        let mut best_source = top.source;
        let mut best = match self.tables[top.source].get(&top.key)? {
            Some(record) => record,
            None => {
                return Err(SsTableError::Corrupt(format!(
                    "indexed key vanished from {:?}",
                    self.tables[top.source].path()
                )))
            }
        };
        self.advance(top.source);

        // Drain every other source holding this key, keeping the winner:
        // greatest timestamp, ties to the newer (higher-index) table.
        let key = top.key;
        while let Some(peek) = self.heap.peek() {
            if peek.key != key {
                break;
            }
            let dup = self.heap.pop().expect("peeked entry");

            if let Some(candidate) = self.tables[dup.source].get(&dup.key)? {
                let wins = candidate.timestamp > best.timestamp
                    || (candidate.timestamp == best.timestamp && dup.source > best_source);
                if wins {
                    best = candidate;
                    best_source = dup.source;
                }
            }
            self.advance(dup.source);
        }

        Ok(Some((key, best)))
    }

    /// Collects all remaining entries into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, Record)>, SsTableError> {
        let mut result = Vec::new();
        while let Some(pair) = self.next_entry()? {
            result.push(pair);
        }
        Ok(result)
    }
}
