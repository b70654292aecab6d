//! Background flush: immutable memtables become SSTables.
//!
//! A worker thread wakes on `flush_interval`, drains the immutable queue
//! oldest-first, and exits when the database's running flag clears. Errors
//! are logged and retried on the next tick -- the memtable stays queued, so
//! nothing is lost.

use anyhow::{Context, Result};
use sstable::{SsTable, SsTableWriter};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::{unique_sstable_path, Inner};

/// Spawns the flush worker thread.
pub(crate) fn spawn_flush_worker(inner: Arc<Inner>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("stratadb-flush".to_string())
        .spawn(move || {
            while inner.running.load(Ordering::Relaxed) {
                if let Err(err) = drain_immutables(&inner) {
                    tracing::error!(error = %err, "background flush failed; will retry");
                }
                sleep_interruptible(&inner, inner.options.flush_interval);
            }
        })
        .context("spawn flush worker")?;
    Ok(handle)
}

/// Sleeps up to `interval`, waking early when the running flag clears.
fn sleep_interruptible(inner: &Inner, interval: Duration) {
    let deadline = Instant::now() + interval;
    while inner.running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let remaining = deadline.saturating_duration_since(now);
        std::thread::sleep(remaining.min(Duration::from_millis(25)));
    }
}

/// Writes every queued immutable memtable to a new SSTable, oldest first.
///
/// Each table is registered with the compaction manager **before** its
/// memtable leaves the queue, so a concurrent read always finds the data in
/// at least one of the two structures.
pub(crate) fn drain_immutables(inner: &Inner) -> Result<()> {
    // One drain at a time: the worker tick and an explicit flush() may race
    // here, and the peek-then-pop below relies on being the only consumer.
    let _guard = inner.flush_lock.lock();

    loop {
        // Peek, don't pop: the memtable must stay visible to readers until
        // its SSTable replacement is registered.
        let oldest = match inner.immutables.read().first() {
            Some(mem) => mem.clone(),
            None => return Ok(()),
        };

        if !oldest.is_empty() {
            let mut records = Vec::with_capacity(oldest.len());
            oldest.each(|key, record| records.push((key.to_vec(), record.clone())));

            let path = unique_sstable_path(&inner.dir);
            SsTableWriter::write_records(&path, records)
                .with_context(|| format!("write sstable {}", path.display()))?;
            let table = SsTable::open(&path)
                .with_context(|| format!("reopen flushed sstable {}", path.display()))?;

            tracing::debug!(
                table = %path.display(),
                rows = oldest.len(),
                "flushed immutable memtable"
            );
            inner.compaction.add(Arc::new(table));
        }

        let mut queue = inner.immutables.write();
        debug_assert!(Arc::ptr_eq(&queue[0], &oldest));
        queue.remove(0);
    }
}
