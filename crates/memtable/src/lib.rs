//! # MemTable - In-Memory Write Buffer
//!
//! An ordered map from key to the latest [`Record`], buffering recent writes
//! until they are flushed to an SSTable.
//!
//! The map is a lock-free skip list ([`crossbeam_skiplist::SkipMap`]), so
//! point reads never contend with the engine's write mutex: the database
//! serializes all *mutations*, but `get`/`entry` may run concurrently from
//! any thread. Iteration order is ascending by key, which is exactly the
//! order the flush path consumes.

use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicI64, Ordering};
use value::Value;

/// Fixed per-record overhead charged to [`MemTable::byte_size`]:
/// timestamp + tombstone flag + map-node bookkeeping, approximated.
const RECORD_OVERHEAD: i64 = 24;

/// The latest state of one key: a value or a tombstone, with the version
/// timestamp that wrote it.
///
/// `value == None` signifies a tombstone (delete).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: i64,
    pub value: Option<Value>,
}

impl Record {
    /// Returns `true` if this record marks a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Bytes this record contributes to the memtable footprint, excluding
    /// the key.
    fn charged_bytes(&self) -> i64 {
        let value_bytes = self
            .value
            .as_ref()
            .map(|v| v.encoded_size() as i64)
            .unwrap_or(0);
        value_bytes + RECORD_OVERHEAD
    }
}

/// In-memory ordered map of the most recent write per key.
///
/// Tombstones are retained: a deleted key stays present as a `Record` with
/// `value == None` so that it can shadow older values in lower layers and
/// survive the flush into an SSTable.
#[derive(Debug)]
pub struct MemTable {
    map: SkipMap<Vec<u8>, Record>,
    approx_bytes: AtomicI64,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            approx_bytes: AtomicI64::new(0),
        }
    }

    /// Inserts or replaces the record for `key` with a put at `timestamp`.
    ///
    /// The engine's serialized write path guarantees `timestamp` is at least
    /// as fresh as whatever the key currently holds, so replacement is
    /// unconditional.
    pub fn put(&self, key: &[u8], value: Value, timestamp: i64) {
        self.insert(
            key,
            Record {
                timestamp,
                value: Some(value),
            },
        );
    }

    /// Replaces the record for `key` with a tombstone at `timestamp`.
    pub fn delete(&self, key: &[u8], timestamp: i64) {
        self.insert(
            key,
            Record {
                timestamp,
                value: None,
            },
        );
    }

    fn insert(&self, key: &[u8], record: Record) {
        let delta = if let Some(old) = self.map.get(key) {
            record.charged_bytes() - old.value().charged_bytes()
        } else {
            key.len() as i64 + record.charged_bytes()
        };
        self.map.insert(key.to_vec(), record);
        self.approx_bytes.fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns the live value for `key`, or `None` if the key is absent or
    /// tombstoned.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.map.get(key).and_then(|e| e.value().value.clone())
    }

    /// Returns the raw record for `key`, tombstones included.
    ///
    /// The read path needs this to distinguish "deleted here" (a definitive
    /// miss) from "never seen here" (keep looking in older layers).
    #[must_use]
    pub fn entry(&self, key: &[u8]) -> Option<Record> {
        self.map.get(key).map(|e| e.value().clone())
    }

    /// Visits every record in ascending key order, tombstones included.
    ///
    /// This is the flush input: the visit order is the SSTable data order.
    pub fn each<F>(&self, mut visit: F)
    where
        F: FnMut(&[u8], &Record),
    {
        for entry in self.map.iter() {
            visit(entry.key(), entry.value());
        }
    }

    /// Approximate in-memory footprint: key bytes + encoded value bytes +
    /// a fixed per-record overhead. Drives the flush-threshold check.
    #[must_use]
    pub fn byte_size(&self) -> i64 {
        self.approx_bytes.load(Ordering::Relaxed)
    }

    /// Number of logical rows. Repeated writes to one key -- including a put
    /// after a delete -- count as a single row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Empties the table and resets the size accounting.
    pub fn clear(&self) {
        while self.map.pop_front().is_some() {}
        self.approx_bytes.store(0, Ordering::Relaxed);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
