//! The compaction manager: owner of the live SSTable set.
//!
//! The manager holds the ordered list of live tables (oldest first) that
//! the read path snapshots and the flush path appends to. When the list
//! grows past a threshold it performs a *full* merge: every live table is
//! folded into one, keeping only the record with the greatest timestamp per
//! key and discarding keys whose winner is a tombstone. After a full merge
//! nothing older can resurface, so dropping tombstones is safe.
//!
//! Readers keep `Arc` snapshots; superseded files are unlinked while those
//! handles are still open, so an in-flight read finishes against the
//! unlinked inode and the file vanishes when the last reference drops.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use sstable::{MergeIterator, SsTable, SsTableWriter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::unique_sstable_path;

/// Owns the live SSTable list and the background compaction worker.
pub struct CompactionManager {
    dir: PathBuf,
    /// Live tables, oldest first. The single source of truth for disk
    /// state; readers must go through [`snapshot`](Self::snapshot).
    tables: RwLock<Vec<Arc<SsTable>>>,
    /// Shared with the database's other workers; cleared on close.
    running: RwLock<Option<Arc<AtomicBool>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// One merge at a time: the worker and explicit `compact()` calls may
    /// race, and the list swap assumes the inputs are still live.
    merge_lock: Mutex<()>,
}

impl CompactionManager {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            tables: RwLock::new(Vec::new()),
            running: RwLock::new(None),
            worker: Mutex::new(None),
            merge_lock: Mutex::new(()),
        }
    }

    /// Registers a new live table at the end of the list (newest position).
    pub fn add(&self, table: Arc<SsTable>) {
        self.tables.write().push(table);
    }

    /// Returns a point-in-time copy of the live list, oldest first.
    ///
    /// The snapshot outlives list mutations: tables it references stay
    /// readable even after a concurrent compaction replaces and unlinks
    /// them.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<SsTable>> {
        self.tables.read().clone()
    }

    /// Starts the background worker: every `interval` it runs
    /// [`compact_if_needed`](Self::compact_if_needed) with `threshold`,
    /// until `running` clears or [`stop`](Self::stop) is called.
    pub fn start(
        self: &Arc<Self>,
        threshold: usize,
        interval: Duration,
        running: Arc<AtomicBool>,
    ) -> Result<()> {
        *self.running.write() = Some(running.clone());

        let manager = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("stratadb-compaction".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match manager.compact_if_needed(threshold) {
                        Ok(true) => tracing::debug!("background compaction completed"),
                        Ok(false) => {}
                        Err(err) => {
                            tracing::error!(error = %err, "compaction failed; will retry")
                        }
                    }

                    let deadline = Instant::now() + interval;
                    while running.load(Ordering::Relaxed) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        let remaining = deadline.saturating_duration_since(now);
                        std::thread::sleep(remaining.min(Duration::from_millis(25)));
                    }
                }
            })
            .context("spawn compaction worker")?;

        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Signals the worker to exit and waits for it.
    pub fn stop(&self) {
        if let Some(running) = self.running.write().take() {
            running.store(false, Ordering::SeqCst);
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("compaction worker panicked");
            }
        }
    }

    /// Runs one full merge if the live table count has reached `threshold`.
    ///
    /// Returns `true` if a compaction ran.
    pub fn compact_if_needed(&self, threshold: usize) -> Result<bool> {
        let _guard = self.merge_lock.lock();

        // Claim the output filename before snapshotting: tables flushed
        // while the merge runs then carry later timestamps than the output,
        // so the filename sort at the next open reproduces this list order.
        let output_path = unique_sstable_path(&self.dir);

        let inputs = self.snapshot();
        if threshold < 2 || inputs.len() < threshold {
            return Ok(false);
        }
        self.merge(inputs, output_path)?;
        Ok(true)
    }

    /// Stops the worker and releases every table's file handle.
    pub fn close(&self) {
        self.stop();
        for table in self.tables.read().iter() {
            table.close();
        }
    }

    /// Full merge of `inputs` (oldest first) into at most one output table.
    ///
    /// Keys whose winning record is a tombstone are dropped. If everything
    /// was tombstoned no output is written; the inputs are removed either
    /// way, and their files unlinked.
    fn merge(&self, inputs: Vec<Arc<SsTable>>, output_path: PathBuf) -> Result<()> {
        let sources: Vec<&SsTable> = inputs.iter().map(Arc::as_ref).collect();
        let mut iter = MergeIterator::new(sources);

        let mut survivors = Vec::new();
        while let Some((key, record)) = iter.next_entry()? {
            if !record.is_tombstone() {
                survivors.push((key, record));
            }
        }

        let output = if survivors.is_empty() {
            None
        } else {
            SsTableWriter::write_records(&output_path, survivors)
                .with_context(|| format!("write compacted sstable {}", output_path.display()))?;
            let table = SsTable::open(&output_path)
                .with_context(|| format!("reopen compacted sstable {}", output_path.display()))?;
            Some(Arc::new(table))
        };

        // Swap the inputs for the output. Tables added while the merge ran
        // are newer than the output, and the inputs were the oldest prefix,
        // so the output goes to the front of the list.
        {
            let mut tables = self.tables.write();
            tables.retain(|t| !inputs.iter().any(|input| Arc::ptr_eq(t, input)));
            if let Some(table) = output {
                tables.insert(0, table);
            }
        }

        // Unlink the superseded files. Open snapshot handles keep the
        // inodes readable until they drop.
        for input in &inputs {
            if let Err(err) = std::fs::remove_file(input.path()) {
                tracing::error!(
                    table = %input.path().display(),
                    error = %err,
                    "failed to unlink compacted sstable"
                );
            }
        }

        tracing::debug!(inputs = inputs.len(), "compaction merged live set");
        Ok(())
    }
}

impl std::fmt::Debug for CompactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionManager")
            .field("dir", &self.dir)
            .field("live_tables", &self.tables.read().len())
            .finish()
    }
}
