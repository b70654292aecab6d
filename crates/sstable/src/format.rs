//! On-disk layout constants and record codec.
//!
//! An SSTable is self-describing: a fixed-size prefix points at a trailer
//! that holds the key index, the bloom filter, and the min/max keys.
//!
//! ```text
//! [magic "STDB"][version: u32 LE][trailer_offset: u64 LE]   <- prefix, 16 bytes
//! [data records ...]
//! [trailer]                                                  <- at trailer_offset
//! ```
//!
//! Data record:
//! `[timestamp: i64][deleted: u8][key_len: u32][key][has_value: u8][value?]`
//!
//! Trailer:
//! `[index_count: u32]` then per entry
//! `[key_len: u32][key][offset: u64][size: u32]`, then the serialized bloom
//! filter, then `[min_key_len: u32][min_key][max_key_len: u32][max_key]`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memtable::Record;
use std::io::{Read, Seek, SeekFrom, Write};
use value::Value;

use crate::SsTableError;

/// File magic, first four bytes of every SSTable.
pub const MAGIC: &[u8; 4] = b"STDB";

/// Current format version.
pub const VERSION: u32 = 1;

/// Bytes occupied by the prefix: magic + version + trailer offset.
pub const PREFIX_BYTES: u64 = 4 + 4 + 8;

/// Upper bound on key lengths accepted while decoding. Prevents OOM on a
/// corrupt file.
pub const MAX_KEY_BYTES: usize = 64 * 1024;

/// One in-memory index entry: where a key's data record lives and how many
/// bytes it spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub offset: u64,
    pub size: u32,
}

/// Writes the file prefix. `trailer_offset` may be a placeholder that the
/// builder patches once the data section's extent is known.
pub fn write_prefix<W: Write>(w: &mut W, trailer_offset: u64) -> Result<(), SsTableError> {
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u64::<LittleEndian>(trailer_offset)?;
    Ok(())
}

/// Reads and validates the file prefix, returning the trailer offset.
pub fn read_prefix<R: Read + Seek>(r: &mut R) -> Result<u64, SsTableError> {
    r.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(SsTableError::Corrupt(format!(
            "bad magic {:02x?} (expected {:02x?})",
            magic, MAGIC
        )));
    }

    let version = r.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(SsTableError::Corrupt(format!(
            "unsupported sstable version {}",
            version
        )));
    }

    Ok(r.read_u64::<LittleEndian>()?)
}

/// Appends one data record to `buf`, returning the encoded length.
pub fn encode_record(buf: &mut Vec<u8>, key: &[u8], record: &Record) -> u32 {
    let start = buf.len();
    buf.extend_from_slice(&record.timestamp.to_le_bytes());
    buf.push(u8::from(record.is_tombstone()));
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    match &record.value {
        Some(v) => {
            buf.push(1);
            v.write_to(buf).expect("encode value into Vec");
        }
        None => buf.push(0),
    }
    (buf.len() - start) as u32
}

/// Decodes one data record from a byte slice that must span it exactly.
///
/// The slice comes from an index entry's `[offset, offset + size)` range, so
/// a record that wants more bytes than the slice holds (or leaves bytes
/// unconsumed) means the index and data disagree -- corruption either way.
pub fn decode_record(bytes: &[u8]) -> Result<(Vec<u8>, Record), SsTableError> {
    let mut r = bytes;

    let parse = (|| -> Result<(Vec<u8>, Record), SsTableError> {
        let timestamp = r.read_i64::<LittleEndian>()?;
        let deleted = r.read_u8()?;
        if deleted > 1 {
            return Err(SsTableError::Corrupt(format!(
                "bad tombstone flag {}",
                deleted
            )));
        }

        let key_len = r.read_u32::<LittleEndian>()? as usize;
        if key_len == 0 || key_len > MAX_KEY_BYTES {
            return Err(SsTableError::Corrupt(format!(
                "record key length {} out of range",
                key_len
            )));
        }
        let mut key = vec![0u8; key_len];
        r.read_exact(&mut key)?;

        let has_value = r.read_u8()?;
        let value = match (deleted, has_value) {
            (1, 0) => None,
            (0, 1) => Some(
                Value::read_from(&mut r)
                    .map_err(|e| SsTableError::Corrupt(format!("bad value payload: {}", e)))?,
            ),
            _ => {
                return Err(SsTableError::Corrupt(format!(
                    "inconsistent deleted/has_value flags ({}, {})",
                    deleted, has_value
                )))
            }
        };

        Ok((key, Record { timestamp, value }))
    })();

    let (key, record) = parse.map_err(|e| match e {
        // A short slice shows up as UnexpectedEof from the slice reader.
        SsTableError::Io(io) => {
            SsTableError::Corrupt(format!("record overruns its index extent: {}", io))
        }
        other => other,
    })?;

    if !r.is_empty() {
        return Err(SsTableError::Corrupt(format!(
            "record leaves {} undecoded bytes in its index extent",
            r.len()
        )));
    }

    Ok((key, record))
}
