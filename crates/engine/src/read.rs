//! Read path: `get()` and `scan()`.
//!
//! Point lookups walk the layers newest to oldest -- active memtable,
//! immutable memtables, SSTables -- and the first layer that knows the key
//! wins. A tombstone is a definitive miss at its layer: it shadows anything
//! older.
//!
//! Range scans go the other way: layers feed an accumulator oldest to
//! newest, each key keeping the record with the greatest timestamp (ties to
//! the newer layer), and tombstoned keys are filtered before the visitor
//! runs.

use anyhow::Result;
use memtable::Record;
use std::collections::BTreeMap;
use value::Value;

use crate::Database;

impl Database {
    /// Looks up a key, returning its live value or `None` if the key is
    /// absent or deleted.
    ///
    /// A read observes all writes acknowledged before it began. Individual
    /// SSTable read failures are logged and treated as misses for that
    /// layer; an error is returned only if *every* SSTable layer failed.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        let inner = &self.inner;
        let key = key.as_bytes();

        // 1. Active memtable. Internally synchronized, so no write lock.
        let active = inner.active.read().clone();
        if let Some(record) = active.entry(key) {
            return Ok(record.value);
        }

        // 2. Immutable memtables, newest first.
        let immutables = inner.immutables.read().clone();
        for mem in immutables.iter().rev() {
            if let Some(record) = mem.entry(key) {
                return Ok(record.value);
            }
        }

        // 3. SSTables, newest first, from a point-in-time snapshot.
        let tables = inner.compaction.snapshot();
        let mut failures = 0;
        let mut last_error = None;
        for table in tables.iter().rev() {
            match table.get(key) {
                Ok(Some(record)) => return Ok(record.value),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(
                        table = %table.path().display(),
                        error = %err,
                        "sstable read failed; treating layer as a miss"
                    );
                    failures += 1;
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if failures == tables.len() => {
                Err(anyhow::Error::new(err).context("every sstable layer failed"))
            }
            _ => Ok(None),
        }
    }

    /// Visits every live key in `[start, end]` (inclusive bounds, `None` =
    /// open) in ascending key order, with the value `get` would return on a
    /// quiescent database.
    pub fn scan<F>(&self, start: Option<&str>, end: Option<&str>, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &Value),
    {
        self.ensure_open()?;
        let inner = &self.inner;
        let start = start.map(str::as_bytes);
        let end = end.map(str::as_bytes);

        // Collect the winning record per key. Layers are fed oldest to
        // newest, and a tie on timestamp lets the newer layer overwrite.
        let mut merged: BTreeMap<Vec<u8>, Record> = BTreeMap::new();
        let mut merge = |key: &[u8], record: &Record| {
            match merged.get(key) {
                Some(existing) if existing.timestamp > record.timestamp => {}
                _ => {
                    merged.insert(key.to_vec(), record.clone());
                }
            }
        };

        // 1. SSTables, oldest first.
        for table in inner.compaction.snapshot() {
            table.scan(start, end, &mut merge)?;
        }

        // 2. Immutable memtables, oldest first.
        let in_range = |key: &[u8]| {
            start.map_or(true, |s| key >= s) && end.map_or(true, |e| key <= e)
        };
        let immutables = inner.immutables.read().clone();
        for mem in immutables.iter() {
            mem.each(|key, record| {
                if in_range(key) {
                    merge(key, record);
                }
            });
        }

        // 3. Active memtable last: the freshest layer wins ties.
        let active = inner.active.read().clone();
        active.each(|key, record| {
            if in_range(key) {
                merge(key, record);
            }
        });

        for (key, record) in &merged {
            if let Some(value) = &record.value {
                let key = std::str::from_utf8(key)
                    .map_err(|e| anyhow::anyhow!("stored key is not valid utf-8: {}", e))?;
                visit(key, value);
            }
        }
        Ok(())
    }
}
