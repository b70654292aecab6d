//! # Engine - StrataDB Storage Engine
//!
//! The central orchestrator that ties together the [`wal`], [`memtable`],
//! and [`sstable`] crates into a complete LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                   DATABASE                      │
//! │                                                 │
//! │ write.rs → WAL append → active memtable insert  │
//! │              |                                  │
//! │              |  (byte size ≥ flush threshold?)  │
//! │              v            yes                   │
//! │           rotate: active → immutable queue,     │
//! │                   truncate WAL                  │
//! │              |                                  │
//! │ flush.rs  → background worker drains the queue  │
//! │             into new SSTables (1s tick)         │
//! │              |                                  │
//! │ compaction.rs → merges SSTables when the live   │
//! │                 count crosses a threshold (10s) │
//! │                                                 │
//! │ read.rs → active → immutables (newest first)    │
//! │           → SSTables (newest first)             │
//! │           (first hit wins; tombstones shadow)   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                            |
//! |-----------------|----------------------------------------------------|
//! | `lib.rs`        | `Database` struct, options, open/close, `Drop`     |
//! | `recovery.rs`   | WAL replay, SSTable discovery, tmp file cleanup    |
//! | `write.rs`      | `put()`, `delete()`, `flush()`, rotation           |
//! | `read.rs`       | `get()`, `scan()`                                  |
//! | `flush.rs`      | background flush worker, immutable-queue drain     |
//! | `compaction.rs` | `CompactionManager`: live SSTable set + merging    |
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL **before** the memtable update. The
//! WAL is truncated only at rotation, when its whole contents moved to the
//! immutable queue; the queue in turn is discarded one table at a time, and
//! only after the replacement SSTable is registered with the compaction
//! manager. SSTables are written to a temp file, fsynced, and renamed into
//! place. A torn WAL tail is clipped at the next replay.

mod compaction;
mod read;
mod recovery;
mod write;

pub(crate) mod flush;

use anyhow::{Context, Result};
use memtable::MemTable;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use wal::Wal;

pub use compaction::CompactionManager;
pub use value::{Value, ValueError};
pub use write::MAX_KEY_SIZE;

/// Name of the write-ahead log inside the database directory.
pub const WAL_FILENAME: &str = "wal.log";

/// Tuning knobs for a [`Database`].
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// If `true`, every WAL append is followed by `fsync`, extending the
    /// durability guarantee from process crash to OS crash.
    pub sync_on_write: bool,
    /// Active-memtable byte size that triggers rotation onto the flush
    /// queue.
    pub flush_threshold: i64,
    /// Number of live SSTables that triggers a background compaction.
    pub compaction_threshold: usize,
    /// Wake interval of the background flush worker.
    pub flush_interval: Duration,
    /// Wake interval of the background compaction worker.
    pub compaction_interval: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            sync_on_write: false,
            flush_threshold: 64 * 1024 * 1024,
            compaction_threshold: 4,
            flush_interval: Duration::from_secs(1),
            compaction_interval: Duration::from_secs(10),
        }
    }
}

pub(crate) struct Inner {
    pub(crate) dir: PathBuf,
    pub(crate) options: DbOptions,
    pub(crate) wal: Wal,
    /// The single serialization point for all mutations.
    pub(crate) write_lock: Mutex<()>,
    /// The active memtable. Swapped wholesale at rotation; readers clone
    /// the `Arc` and never block on the write lock.
    pub(crate) active: RwLock<Arc<MemTable>>,
    /// Rotated memtables awaiting flush, oldest first.
    pub(crate) immutables: RwLock<Vec<Arc<MemTable>>>,
    /// Serializes queue drains between the flush worker and explicit
    /// `flush()` calls.
    pub(crate) flush_lock: Mutex<()>,
    pub(crate) compaction: Arc<CompactionManager>,
    /// Observed by both background workers; cleared on close.
    pub(crate) running: Arc<AtomicBool>,
}

/// An embedded LSM-tree key-value store rooted at one directory.
///
/// Keys are non-empty UTF-8 strings ordered by their raw bytes; values are
/// typed scalars ([`Value`]). All mutations serialize on one internal
/// mutex; reads don't take it.
///
/// The handle owns two background workers (flush and compaction) which are
/// stopped by [`close`](Database::close) or on drop.
pub struct Database {
    pub(crate) inner: Arc<Inner>,
    flush_worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Database {
    /// Opens (or creates) a database in `dir` with default options.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with(dir, DbOptions::default())
    }

    /// Opens (or creates) a database in `dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the directory if absent; clean up leftover `.tmp` files
    ///    from interrupted SSTable writes.
    /// 2. Open or create `wal.log` and replay it into a fresh active
    ///    memtable (a torn tail is clipped silently).
    /// 3. Discover `sstable_<ms>.sst` files, sorted by the creation
    ///    timestamp embedded in the filename, and register them with the
    ///    compaction manager oldest-first. A corrupt SSTable aborts the
    ///    open.
    /// 4. Start the background flush and compaction workers.
    pub fn open_with<P: AsRef<Path>>(dir: P, options: DbOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create database directory {}", dir.display()))?;
        recovery::cleanup_tmp_files(&dir);

        let wal = Wal::open(dir.join(WAL_FILENAME), options.sync_on_write)
            .context("open write-ahead log")?;

        let active = Arc::new(MemTable::new());
        let replayed = recovery::replay_wal(&wal, &active).context("replay write-ahead log")?;
        if replayed > 0 {
            tracing::debug!(records = replayed, "recovered memtable from wal");
        }

        let compaction = Arc::new(CompactionManager::new(dir.clone()));
        for table in recovery::discover_sstables(&dir)? {
            compaction.add(table);
        }

        let running = Arc::new(AtomicBool::new(true));
        let inner = Arc::new(Inner {
            dir,
            options: options.clone(),
            wal,
            write_lock: Mutex::new(()),
            active: RwLock::new(active),
            immutables: RwLock::new(Vec::new()),
            flush_lock: Mutex::new(()),
            compaction: compaction.clone(),
            running: running.clone(),
        });

        let flush_worker = flush::spawn_flush_worker(inner.clone())?;
        compaction.start(
            options.compaction_threshold,
            options.compaction_interval,
            running,
        )?;

        Ok(Self {
            inner,
            flush_worker: Mutex::new(Some(flush_worker)),
            closed: AtomicBool::new(false),
        })
    }

    /// Merges every live SSTable into one, after flushing all in-memory
    /// data to disk. Tombstoned keys disappear entirely.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        self.flush()?;
        // Any two tables are worth merging when asked explicitly.
        self.inner.compaction.compact_if_needed(2)?;
        Ok(())
    }

    /// Shuts the database down: stops both background workers, flushes
    /// pending immutable memtables to SSTables, and syncs the WAL.
    ///
    /// The active memtable is *not* flushed -- its records live in the WAL
    /// and are replayed on the next open. Close is idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.flush_worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("flush worker panicked");
            }
        }

        // Drain whatever the worker had not gotten to.
        flush::drain_immutables(&self.inner)?;

        self.inner.compaction.close();
        self.inner.wal.sync()?;
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        anyhow::ensure!(!self.closed.load(Ordering::SeqCst), "database is closed");
        Ok(())
    }

    /// Number of live SSTables (diagnostics and tests).
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.inner.compaction.snapshot().len()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort: Drop cannot propagate errors. Data is still safe in
        // the WAL and immutable queue files are recovered on next open.
        if let Err(err) = self.close() {
            tracing::error!(error = %err, "error while closing database on drop");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.inner.dir)
            .field("active_bytes", &self.inner.active.read().byte_size())
            .field("immutable_count", &self.inner.immutables.read().len())
            .field("sstable_count", &self.inner.compaction.snapshot().len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Milliseconds since the Unix epoch: the engine's version clock.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Timestamps already handed out for SSTable filenames, to keep them unique
/// even when two are claimed within one millisecond.
static LAST_SSTABLE_TS: AtomicI64 = AtomicI64::new(0);

/// Returns a fresh `sstable_<unix_ms>.sst` path in `dir`, guaranteed not to
/// collide with a previously claimed name or an existing file.
pub(crate) fn unique_sstable_path(dir: &Path) -> PathBuf {
    loop {
        let now = now_ms();
        let prev = LAST_SSTABLE_TS.load(Ordering::SeqCst);
        let candidate = now.max(prev + 1);
        if LAST_SSTABLE_TS
            .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            continue;
        }

        let path = dir.join(format!("sstable_{}.sst", candidate));
        // A leftover file from an earlier process with a skewed clock.
        if !path.exists() {
            return path;
        }
    }
}

#[cfg(test)]
mod tests;
