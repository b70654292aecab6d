//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). The false positive rate depends on the
//! number of bits and hash functions used.
//!
//! ## Usage in StrataDB
//!
//! Each SSTable embeds a bloom filter built from its keys, serialized inside
//! the table's trailer. During point lookups the engine checks the filter
//! first -- if it says "not present", the SSTable is skipped entirely,
//! avoiding an index probe and disk I/O.
//!
//! ## Hash family
//!
//! The `k` hash functions are derived from BLAKE3: hash `i` (0-based) feeds
//! the digest the index `i` followed by the key, then takes the first four
//! bytes of the output as a little-endian `u32` modulo the bit count.
//! Seeding a full digest per probe is slower than double hashing but keeps
//! the probe positions independent and the scheme trivially portable.

use std::io::{self, Read, Write};

/// Default false-positive target used by SSTable construction.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Upper bound on the hash-function count; beyond this more probes stop
/// paying for themselves.
const MAX_HASHES: i32 = 10;

/// Computes the optimal bit count for `expected_items` at the given target
/// false-positive rate: `m = ceil(-n * ln(p) / ln(2)^2)`, floored at 8.
#[must_use]
pub fn optimal_bit_count(expected_items: usize, false_positive_rate: f64) -> i32 {
    let n = expected_items.max(1) as f64;
    let m = (-n * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2)).ceil();
    (m as i64).clamp(8, i32::MAX as i64) as i32
}

/// Computes the optimal hash count for `bit_count` bits over
/// `expected_items` keys: `k = clamp(ceil((m/n) * ln(2)), 1, 10)`.
#[must_use]
pub fn optimal_hash_count(bit_count: i32, expected_items: usize) -> i32 {
    let n = expected_items.max(1) as f64;
    let k = ((bit_count as f64 / n) * std::f64::consts::LN_2).ceil() as i64;
    k.clamp(1, MAX_HASHES as i64) as i32
}

/// A bloom filter backed by a byte vector with `k` BLAKE3-derived hash
/// functions.
pub struct BloomFilter {
    bits: Vec<u8>,
    bit_count: i32,
    hash_count: i32,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at the given target
    /// `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let bit_count = optimal_bit_count(expected_items, false_positive_rate);
        let hash_count = optimal_hash_count(bit_count, expected_items);
        let byte_len = (bit_count as usize + 7) / 8;

        Self {
            bits: vec![0u8; byte_len],
            bit_count,
            hash_count,
        }
    }

    fn from_raw(bits: Vec<u8>, bit_count: i32, hash_count: i32) -> Self {
        Self {
            bits,
            bit_count,
            hash_count,
        }
    }

    /// Inserts a key into the filter.
    pub fn insert(&mut self, key: &[u8]) {
        for i in 0..self.hash_count {
            let idx = self.bit_index(i, key);
            self.bits[idx / 8] |= 1 << (idx % 8);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        for i in 0..self.hash_count {
            let idx = self.bit_index(i, key);
            if self.bits[idx / 8] >> (idx % 8) & 1 == 0 {
                return false;
            }
        }
        true
    }

    /// Hash `i`: BLAKE3 over the index then the key, 32-bit LE prefix of the
    /// digest, modulo the bit count.
    fn bit_index(&self, i: i32, key: &[u8]) -> usize {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(i as u32).to_le_bytes());
        hasher.update(key);
        let digest = hasher.finalize();
        let d = digest.as_bytes();
        let prefix = u32::from_le_bytes([d[0], d[1], d[2], d[3]]);
        (prefix % self.bit_count as u32) as usize
    }

    /// Number of bits in the filter.
    #[must_use]
    pub fn bit_count(&self) -> i32 {
        self.bit_count
    }

    /// Number of hash functions.
    #[must_use]
    pub fn hash_count(&self) -> i32 {
        self.hash_count
    }

    /// Size of the serialized filter in bytes:
    /// `bit_count(i32) + hash_count(i32) + bits`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        4 + 4 + self.bits.len()
    }

    /// Serializes the filter to a writer.
    ///
    /// Wire format (little-endian):
    /// ```text
    /// [bit_count: i32][hash_count: i32][bits: ceil(bit_count / 8) bytes]
    /// ```
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.bit_count.to_le_bytes())?;
        w.write_all(&self.hash_count.to_le_bytes())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Deserializes a filter from a reader.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf4 = [0u8; 4];

        r.read_exact(&mut buf4)?;
        let bit_count = i32::from_le_bytes(buf4);

        r.read_exact(&mut buf4)?;
        let hash_count = i32::from_le_bytes(buf4);

        if bit_count <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom bit_count must be positive, got {}", bit_count),
            ));
        }
        if hash_count <= 0 || hash_count > MAX_HASHES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom hash_count out of range: {}", hash_count),
            ));
        }

        let byte_len = (bit_count as usize + 7) / 8;
        let mut bits = vec![0u8; byte_len];
        r.read_exact(&mut bits)?;

        Ok(Self::from_raw(bits, bit_count, hash_count))
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("bit_count", &self.bit_count)
            .field("hash_count", &self.hash_count)
            .field("bytes", &self.bits.len())
            .finish()
    }
}
