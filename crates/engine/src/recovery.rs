//! Cold-start recovery: WAL replay and SSTable discovery.

use anyhow::{Context, Result};
use memtable::MemTable;
use sstable::SsTable;
use std::path::Path;
use std::sync::Arc;
use wal::{Wal, WalRecord};

/// Replays the WAL into `mem`, preserving each record's timestamp so
/// last-writer-wins ordering survives the restart. Returns the number of
/// records applied.
///
/// A torn tail terminates the replay silently inside [`Wal::replay`]; only
/// genuine I/O failures surface here.
pub(crate) fn replay_wal(wal: &Wal, mem: &MemTable) -> Result<usize> {
    let mut count = 0usize;
    wal.replay(|record| {
        match record {
            WalRecord::Put {
                timestamp,
                key,
                value,
            } => mem.put(&key, value, timestamp),
            WalRecord::Delete { timestamp, key } => mem.delete(&key, timestamp),
        }
        count += 1;
    })?;
    Ok(count)
}

/// Discovers `sstable_<ms>.sst` files in `dir` and opens them in
/// oldest-first order (the filename embeds the creation timestamp, so the
/// lexicographic filename sort is the age sort for equal-width numbers; a
/// numeric sort on the parsed timestamp covers the general case).
///
/// A corrupt table is fatal: the database refuses to open.
pub(crate) fn discover_sstables(dir: &Path) -> Result<Vec<Arc<SsTable>>> {
    let mut found: Vec<(i64, std::path::PathBuf)> = Vec::new();

    for entry in std::fs::read_dir(dir).context("read database directory")? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(ts) = parse_sstable_timestamp(name) else {
            continue;
        };
        found.push((ts, path));
    }

    found.sort();

    let mut tables = Vec::with_capacity(found.len());
    for (_, path) in found {
        let table = SsTable::open(&path)
            .with_context(|| format!("open sstable {}", path.display()))?;
        tables.push(Arc::new(table));
    }
    Ok(tables)
}

/// Extracts the creation timestamp from a `sstable_<ms>.sst` filename.
fn parse_sstable_timestamp(name: &str) -> Option<i64> {
    name.strip_prefix("sstable_")?
        .strip_suffix(".sst")?
        .parse()
        .ok()
}

/// Removes leftover `.tmp` files from SSTable writes interrupted by a
/// crash.
pub(crate) fn cleanup_tmp_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with("sstable_") && name.ends_with(".tmp") {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}
