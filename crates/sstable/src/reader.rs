//! Point reads and range scans over one SSTable file.

use bloom::BloomFilter;
use byteorder::{LittleEndian, ReadBytesExt};
use memtable::Record;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::format::{decode_record, read_prefix, IndexEntry, MAX_KEY_BYTES, PREFIX_BYTES};
use crate::SsTableError;

/// An open SSTable: in-memory index, bloom filter, and key bounds, plus a
/// lazily (re)opened handle to the data on disk.
///
/// On [`open`](SsTable::open) the whole trailer is loaded into memory. Point
/// lookups then cost at most one seek + one bounded read. The file handle is
/// behind a mutex so `get`/`scan` work through `&self`; [`close`](SsTable::close)
/// drops the handle and any later read reopens it on demand.
pub struct SsTable {
    path: PathBuf,
    /// Index entries in ascending key order (the writer's output order).
    index: Vec<IndexEntry>,
    bloom: BloomFilter,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    /// `None` after `close`; reopened on the next read.
    file: Mutex<Option<BufReader<File>>>,
}

impl SsTable {
    /// Opens an SSTable file and loads its trailer into memory.
    ///
    /// # Validation
    ///
    /// Wrong magic, unsupported version, a trailer offset outside
    /// `[prefix, filesize)`, or an index entry pointing outside the data
    /// section are all [`SsTableError::Corrupt`] -- the file is unusable and
    /// the caller must refuse to serve from it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SsTableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let filesize = file.metadata()?.len();
        let mut r = BufReader::new(file);

        let trailer_offset = read_prefix(&mut r)?;
        if trailer_offset < PREFIX_BYTES || trailer_offset >= filesize {
            return Err(SsTableError::Corrupt(format!(
                "trailer offset {} outside file of {} bytes",
                trailer_offset, filesize
            )));
        }

        r.seek(SeekFrom::Start(trailer_offset))?;

        // Index entries, ascending by key.
        let index_count = r.read_u32::<LittleEndian>()? as usize;
        let mut index = Vec::with_capacity(index_count);
        let mut prev_key: Option<Vec<u8>> = None;
        for _ in 0..index_count {
            let key = read_key(&mut r)?;
            let offset = r.read_u64::<LittleEndian>()?;
            let size = r.read_u32::<LittleEndian>()?;

            let end = offset.checked_add(u64::from(size));
            if offset < PREFIX_BYTES || end.map_or(true, |end| end > trailer_offset) {
                return Err(SsTableError::Corrupt(format!(
                    "index entry [{}, +{}) outside data section",
                    offset, size
                )));
            }
            if let Some(prev) = &prev_key {
                if *prev >= key {
                    return Err(SsTableError::Corrupt(
                        "index keys not strictly ascending".to_string(),
                    ));
                }
            }
            prev_key = Some(key.clone());
            index.push(IndexEntry { key, offset, size });
        }

        let bloom = BloomFilter::read_from(&mut r)?;
        let min_key = read_key(&mut r)?;
        let max_key = read_key(&mut r)?;

        Ok(Self {
            path,
            index,
            bloom,
            min_key,
            max_key,
            file: Mutex::new(Some(r)),
        })
    }

    /// Point lookup for a single key.
    ///
    /// Returns the raw record -- a tombstone is `Some(record)` with
    /// `record.is_tombstone()` -- because the caller needs tombstones to
    /// shadow older layers. Returns `Ok(None)` when the key is definitely
    /// not in this table (out of bounds, bloom miss, or index miss).
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>, SsTableError> {
        if key < self.min_key.as_slice() || key > self.max_key.as_slice() {
            return Ok(None);
        }
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }

        let idx = match self.index.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(i) => i,
            Err(_) => return Ok(None),
        };

        let (stored_key, record) = self.read_entry(&self.index[idx])?;
        if stored_key != key {
            return Err(SsTableError::Corrupt(
                "index points at a record for a different key".to_string(),
            ));
        }
        Ok(Some(record))
    }

    /// Visits every record whose key lies in the inclusive range
    /// `[start, end]`, in ascending key order, tombstones included.
    ///
    /// `None` bounds are open on that side.
    pub fn scan<F>(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        mut visit: F,
    ) -> Result<(), SsTableError>
    where
        F: FnMut(&[u8], &Record),
    {
        for entry in &self.index {
            if let Some(s) = start {
                if entry.key.as_slice() < s {
                    continue;
                }
            }
            if let Some(e) = end {
                if entry.key.as_slice() > e {
                    break;
                }
            }
            let (key, record) = self.read_entry(entry)?;
            visit(&key, &record);
        }
        Ok(())
    }

    /// Reads and decodes the data record behind one index entry.
    fn read_entry(&self, entry: &IndexEntry) -> Result<(Vec<u8>, Record), SsTableError> {
        let mut guard = self.file.lock();
        let reader = match &mut *guard {
            Some(r) => r,
            // Reopen on demand after close().
            slot @ None => slot.insert(BufReader::new(File::open(&self.path)?)),
        };

        reader.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = vec![0u8; entry.size as usize];
        reader.read_exact(&mut buf)?;
        decode_record(&buf)
    }

    /// Releases the file handle. Subsequent reads reopen it on demand.
    pub fn close(&self) {
        *self.file.lock() = None;
    }

    /// Path of the backing `.sst` file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Smallest key in the table.
    #[must_use]
    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    /// Largest key in the table.
    #[must_use]
    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    /// Number of records in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.index.iter().map(|e| e.key.as_slice())
    }
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsTable")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .field("min_key", &String::from_utf8_lossy(&self.min_key))
            .field("max_key", &String::from_utf8_lossy(&self.max_key))
            .finish()
    }
}

fn read_key<R: Read>(r: &mut R) -> Result<Vec<u8>, SsTableError> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len == 0 || len > MAX_KEY_BYTES {
        return Err(SsTableError::Corrupt(format!(
            "trailer key length {} out of range",
            len
        )));
    }
    let mut key = vec![0u8; len];
    r.read_exact(&mut key)?;
    Ok(key)
}
