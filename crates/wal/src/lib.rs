//! # WAL - Write-Ahead Log
//!
//! Provides crash-safe durability for the StrataDB storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended to the WAL **before** the corresponding in-memory update. On
//! restart the WAL is replayed to reconstruct the active memtable,
//! guaranteeing that no acknowledged write is lost. When the memtable is
//! rotated onto the immutable flush queue the WAL is truncated: every record
//! it held is now carried in memory awaiting flush.
//!
//! ## Binary record format
//!
//! ```text
//! [op: u8 (0 = put, 1 = delete)]
//! [timestamp: i64 LE]
//! [key_len: u32 LE][key bytes]
//! [has_value: u8][value bytes if has_value == 1]
//! ```
//!
//! Value bytes use the self-describing `value` crate encoding, so replay
//! knows where each record ends without a length frame.
//!
//! ## Torn tails
//!
//! A crash can leave a partially written record at the end of the file.
//! Replay treats any truncated or unparseable tail as end-of-log: all
//! complete records before it are yielded, and the tail is silently dropped.
//! The next truncation reclaims the garbage bytes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use value::Value;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;

/// A single WAL record: a key-value insertion or a tombstone.
///
/// The timestamp is the engine's version clock (milliseconds since epoch);
/// replay must preserve it so last-writer-wins ordering survives a restart.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    Put {
        timestamp: i64,
        key: Vec<u8>,
        value: Value,
    },
    Delete {
        timestamp: i64,
        key: Vec<u8>,
    },
}

impl WalRecord {
    /// The record's version timestamp.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        match self {
            WalRecord::Put { timestamp, .. } | WalRecord::Delete { timestamp, .. } => *timestamp,
        }
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

struct WalFile {
    file: File,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

/// The write-ahead log: one append-only file, serialized behind a mutex.
///
/// `append`, `replay`, and `truncate` are mutually exclusive; callers can
/// share the `Wal` through `&self`.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalFile>,
    sync_on_write: bool,
}

impl Wal {
    /// Opens (or creates) the WAL file in append mode.
    ///
    /// # Arguments
    ///
    /// * `path` - file system path for the log (created if absent).
    /// * `sync_on_write` - if true, every `append` is followed by `fsync`,
    ///   extending the durability guarantee from process crash to OS crash.
    pub fn open<P: AsRef<Path>>(path: P, sync_on_write: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(WalFile {
                file,
                buf: Vec::with_capacity(256),
            }),
            sync_on_write,
        })
    }

    /// Serializes `record` and appends it to the log.
    ///
    /// The whole record is written with a single `write_all`, then user-space
    /// buffers are flushed. An error here means the write was **not**
    /// acknowledged; the caller must not apply it to the memtable.
    pub fn append(&self, record: &WalRecord) -> Result<(), WalError> {
        let mut inner = self.inner.lock();
        let WalFile { file, buf } = &mut *inner;

        buf.clear();
        match record {
            WalRecord::Put {
                timestamp,
                key,
                value,
            } => {
                buf.write_u8(OP_PUT)?;
                buf.write_i64::<LittleEndian>(*timestamp)?;
                buf.write_u32::<LittleEndian>(key.len() as u32)?;
                buf.extend_from_slice(key);
                buf.write_u8(1)?;
                value.write_to(buf).map_err(io::Error::other)?;
            }
            WalRecord::Delete { timestamp, key } => {
                buf.write_u8(OP_DELETE)?;
                buf.write_i64::<LittleEndian>(*timestamp)?;
                buf.write_u32::<LittleEndian>(key.len() as u32)?;
                buf.extend_from_slice(key);
                buf.write_u8(0)?;
            }
        }

        file.write_all(buf)?;
        file.flush()?;

        if self.sync_on_write {
            file.sync_all()?;
        }

        Ok(())
    }

    /// Replays every complete record in the log, calling `apply` for each.
    ///
    /// Reads from a fresh handle at offset 0; appenders and truncators are
    /// locked out for the duration. A truncated or otherwise unparseable
    /// tail terminates replay silently -- all complete records before it
    /// have already been yielded.
    pub fn replay<F>(&self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalRecord),
    {
        let _guard = self.inner.lock();

        let file = File::open(&self.path)?;
        let mut rdr = BufReader::new(file);

        while let Some(record) = read_record(&mut rdr)? {
            apply(record);
        }
        Ok(())
    }

    /// Resets the log to zero length.
    ///
    /// Called when the active memtable is rotated: every record in the log
    /// is then held in memory awaiting flush, so the log can restart empty.
    pub fn truncate(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock();
        inner.file.set_len(0)?;
        inner.file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Forces buffered data to disk via `sync_all()`.
    ///
    /// Useful when `sync_on_write` is off and the caller wants a durability
    /// point (e.g. on close).
    pub fn sync(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.sync_all()?;
        Ok(())
    }
}

/// Reads one record, or `None` at end-of-log.
///
/// Any `UnexpectedEof`, unknown op byte, or malformed value payload is a
/// torn tail and maps to `None`.
fn read_record<R: Read>(r: &mut R) -> Result<Option<WalRecord>, WalError> {
    let op = match r.read_u8() {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(WalError::Io(e)),
    };
    if op != OP_PUT && op != OP_DELETE {
        return Ok(None);
    }

    // Safety cap on allocations while parsing a possibly-garbled tail.
    const MAX_KEY_BYTES: usize = 16 * 1024 * 1024;

    let parse = |r: &mut R| -> io::Result<WalRecord> {
        let timestamp = r.read_i64::<LittleEndian>()?;
        let key_len = r.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "key length exceeds sanity cap",
            ));
        }
        let mut key = vec![0u8; key_len];
        r.read_exact(&mut key)?;
        let has_value = r.read_u8()?;

        if op == OP_PUT {
            if has_value != 1 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "put record without value",
                ));
            }
            // A malformed payload is tail corruption; a genuine I/O error
            // (anything but a short read) must still surface.
            let value = Value::read_from(r).map_err(|e| match e {
                value::ValueError::Io(io_err) => io_err,
                other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
            })?;
            Ok(WalRecord::Put {
                timestamp,
                key,
                value,
            })
        } else {
            Ok(WalRecord::Delete { timestamp, key })
        }
    };

    match parse(r) {
        Ok(record) => Ok(Some(record)),
        // Truncated or garbled tail: end of log.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Ok(None),
        Err(e) => Err(WalError::Io(e)),
    }
}
