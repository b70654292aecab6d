//! SSTable construction.
//!
//! The writer takes a batch of `(key, record)` pairs (typically a drained
//! memtable or a compaction merge), sorts and deduplicates them, and
//! produces one immutable table file. The file is fully durable (fsynced
//! and atomically renamed into place) before the writer returns, so the
//! caller may announce it to readers immediately.

use bloom::{BloomFilter, DEFAULT_FALSE_POSITIVE_RATE};
use byteorder::{LittleEndian, WriteBytesExt};
use memtable::Record;
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::format::{encode_record, write_prefix, IndexEntry, PREFIX_BYTES};
use crate::SsTableError;

pub struct SsTableWriter {}

impl SsTableWriter {
    /// Writes an SSTable at `path` from the given records.
    ///
    /// Input does not need to be sorted or deduplicated: records are
    /// re-sorted by key, and when a key appears more than once only the
    /// record with the greatest timestamp is kept. Tombstones are written
    /// like any other record -- dropping them is the compactor's call, not
    /// the writer's.
    ///
    /// # Steps
    ///
    /// 1. Sort and deduplicate; size a bloom filter for the survivor count.
    /// 2. Write the prefix with a placeholder trailer offset to a temp file.
    /// 3. Stream data records, building the index and bloom in memory.
    /// 4. Write the trailer (index, bloom, min/max key), patch the prefix.
    /// 5. Flush, fsync, and atomically rename into place.
    ///
    /// # Errors
    ///
    /// [`SsTableError::Empty`] if `records` is empty; otherwise I/O errors.
    pub fn write_records(
        path: &Path,
        mut records: Vec<(Vec<u8>, Record)>,
    ) -> Result<(), SsTableError> {
        if records.is_empty() {
            return Err(SsTableError::Empty);
        }

        // Sort ascending by key; for duplicate keys the greatest timestamp
        // sorts first and dedup keeps it.
        records.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.timestamp.cmp(&a.1.timestamp)));
        records.dedup_by(|next, kept| next.0 == kept.0);

        let mut filter = BloomFilter::new(records.len(), DEFAULT_FALSE_POSITIVE_RATE);
        let min_key = records[0].0.clone();
        let max_key = records[records.len() - 1].0.clone();

        let tmp_path = path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut w = BufWriter::new(file);

        write_prefix(&mut w, 0)?; // placeholder, patched below

        // Data section, index built as we go.
        let mut index: Vec<IndexEntry> = Vec::with_capacity(records.len());
        let mut offset = PREFIX_BYTES;
        let mut buf = Vec::with_capacity(256);

        for (key, record) in &records {
            buf.clear();
            let size = encode_record(&mut buf, key, record);
            w.write_all(&buf)?;

            filter.insert(key);
            index.push(IndexEntry {
                key: key.clone(),
                offset,
                size,
            });
            offset += u64::from(size);
        }

        let trailer_offset = offset;

        // Trailer: index entries, bloom filter, min/max key.
        w.write_u32::<LittleEndian>(index.len() as u32)?;
        for entry in &index {
            w.write_u32::<LittleEndian>(entry.key.len() as u32)?;
            w.write_all(&entry.key)?;
            w.write_u64::<LittleEndian>(entry.offset)?;
            w.write_u32::<LittleEndian>(entry.size)?;
        }
        filter.write_to(&mut w)?;
        w.write_u32::<LittleEndian>(min_key.len() as u32)?;
        w.write_all(&min_key)?;
        w.write_u32::<LittleEndian>(max_key.len() as u32)?;
        w.write_all(&max_key)?;

        // Patch the real trailer offset into the prefix.
        w.flush()?;
        let mut file = w
            .into_inner()
            .map_err(|e| SsTableError::Io(e.into_error()))?;
        file.seek(SeekFrom::Start(0))?;
        write_prefix(&mut file, trailer_offset)?;

        file.flush()?;
        file.sync_all()?;
        drop(file);

        rename(tmp_path, path)?;
        Ok(())
    }
}
