//! Write path: `put()`, `delete()`, `flush()`, and memtable rotation.
//!
//! All mutations flow through this module. Each write is stamped with the
//! current wall clock, appended to the WAL for durability, then applied to
//! the active memtable. When the memtable crosses the flush threshold it is
//! rotated onto the immutable queue and the WAL restarts empty.

use anyhow::Result;
use memtable::MemTable;
use std::sync::Arc;
use value::Value;
use wal::WalRecord;

use crate::{flush, now_ms, Database};

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;

impl Database {
    /// Inserts or updates a key.
    ///
    /// Accepts any supported scalar through `Into<Value>`:
    /// `db.put("age", 30i64)?`, `db.put("name", "Alice")?`.
    ///
    /// The record is appended to the WAL first; only a successful append is
    /// applied to the memtable. If the WAL write fails the error is
    /// returned and the store is unchanged.
    pub fn put(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.write(key, Some(value.into()))
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// The tombstone shadows any older value in lower layers until a
    /// compaction garbage-collects both.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.write(key, None)
    }

    fn write(&self, key: &str, value: Option<Value>) -> Result<()> {
        self.ensure_open()?;
        anyhow::ensure!(!key.is_empty(), "key must not be empty");
        anyhow::ensure!(
            key.len() <= MAX_KEY_SIZE,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        );

        let inner = &self.inner;
        let _guard = inner.write_lock.lock();

        let timestamp = now_ms();
        let record = match &value {
            Some(v) => WalRecord::Put {
                timestamp,
                key: key.as_bytes().to_vec(),
                value: v.clone(),
            },
            None => WalRecord::Delete {
                timestamp,
                key: key.as_bytes().to_vec(),
            },
        };

        // WAL first. A failure here means the write was never acknowledged.
        inner.wal.append(&record)?;

        let active = inner.active.read().clone();
        match value {
            Some(v) => active.put(key.as_bytes(), v, timestamp),
            None => active.delete(key.as_bytes(), timestamp),
        }

        if active.byte_size() >= inner.options.flush_threshold {
            self.rotate_locked()?;
        }

        Ok(())
    }

    /// Synchronously persists all in-memory data to SSTables.
    ///
    /// Rotates the active memtable (if non-empty) onto the immutable queue
    /// and drains the whole queue to disk before returning. A no-op on an
    /// empty store.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;

        {
            let inner = &self.inner;
            let _guard = inner.write_lock.lock();
            if !inner.active.read().is_empty() {
                self.rotate_locked()?;
            }
        }

        flush::drain_immutables(&self.inner)
    }

    /// Rotation: push the active memtable onto the immutable queue, install
    /// a fresh one, and truncate the WAL.
    ///
    /// Caller must hold `write_lock`. The truncation is safe because every
    /// record in the old memtable is now held in the queue awaiting flush,
    /// and writes acknowledged after this point land in the new WAL
    /// generation.
    fn rotate_locked(&self) -> Result<()> {
        let inner = &self.inner;

        let old = {
            let mut active = inner.active.write();
            std::mem::replace(&mut *active, Arc::new(MemTable::new()))
        };
        inner.immutables.write().push(old);

        inner.wal.truncate()?;
        Ok(())
    }
}
