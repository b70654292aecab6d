//! # Value - Typed Scalar Codec
//!
//! The value type stored by StrataDB and its on-disk encoding.
//!
//! A [`Value`] is a tagged scalar: booleans, signed/unsigned integers of
//! widths 8/16/32/64, 32/64-bit floats, UTF-8 strings, and opaque byte
//! sequences. The same encoding is used in the WAL and in SSTable data
//! records, so a value written once is byte-identical in every layer.
//!
//! ## Wire format
//!
//! ```text
//! [tag: u8][payload_len: u32 LE][payload: payload_len bytes]
//! ```
//!
//! Numeric payloads are little-endian two's complement / IEEE-754. Strings
//! are UTF-8 without a terminator. `Nil` has an empty payload.
//!
//! ## Typed access
//!
//! Construction goes through `From` impls (`Value::from(42i64)`,
//! `Value::from("text")`), so callers never name tags directly. Reading back
//! uses an accessor per tag (`as_i64`, `as_str`, ...); asking for a type
//! other than the stored one is a programmer error and fails with
//! [`ValueError::TypeMismatch`].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Errors produced by the value codec.
#[derive(Debug, Error)]
pub enum ValueError {
    /// An accessor asked for a different type than the stored one.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The encoded bytes do not form a well-formed value.
    #[error("corrupt value encoding: {0}")]
    Corrupt(String),

    /// An underlying I/O error while reading or writing an encoded value.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Tag bytes of the wire format. Stable on disk — never renumber.
mod tag {
    pub const NIL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const I8: u8 = 2;
    pub const I16: u8 = 3;
    pub const I32: u8 = 4;
    pub const I64: u8 = 5;
    pub const U8: u8 = 6;
    pub const U16: u8 = 7;
    pub const U32: u8 = 8;
    pub const U64: u8 = 9;
    pub const F32: u8 = 10;
    pub const F64: u8 = 11;
    pub const STRING: u8 = 12;
    pub const BYTES: u8 = 13;
}

/// A typed scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Human-readable name of the stored type (used in error messages).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Nil => tag::NIL,
            Value::Bool(_) => tag::BOOL,
            Value::I8(_) => tag::I8,
            Value::I16(_) => tag::I16,
            Value::I32(_) => tag::I32,
            Value::I64(_) => tag::I64,
            Value::U8(_) => tag::U8,
            Value::U16(_) => tag::U16,
            Value::U32(_) => tag::U32,
            Value::U64(_) => tag::U64,
            Value::F32(_) => tag::F32,
            Value::F64(_) => tag::F64,
            Value::String(_) => tag::STRING,
            Value::Bytes(_) => tag::BYTES,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Value::Nil => 0,
            Value::Bool(_) | Value::I8(_) | Value::U8(_) => 1,
            Value::I16(_) | Value::U16(_) => 2,
            Value::I32(_) | Value::U32(_) | Value::F32(_) => 4,
            Value::I64(_) | Value::U64(_) | Value::F64(_) => 8,
            Value::String(s) => s.len(),
            Value::Bytes(b) => b.len(),
        }
    }

    /// Size of the encoded value in bytes: tag + length prefix + payload.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        1 + 4 + self.payload_len()
    }

    /// Serializes the value to a writer in wire format.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ValueError> {
        w.write_u8(self.tag())?;
        w.write_u32::<LittleEndian>(self.payload_len() as u32)?;
        match self {
            Value::Nil => {}
            Value::Bool(v) => w.write_u8(u8::from(*v))?,
            Value::I8(v) => w.write_i8(*v)?,
            Value::I16(v) => w.write_i16::<LittleEndian>(*v)?,
            Value::I32(v) => w.write_i32::<LittleEndian>(*v)?,
            Value::I64(v) => w.write_i64::<LittleEndian>(*v)?,
            Value::U8(v) => w.write_u8(*v)?,
            Value::U16(v) => w.write_u16::<LittleEndian>(*v)?,
            Value::U32(v) => w.write_u32::<LittleEndian>(*v)?,
            Value::U64(v) => w.write_u64::<LittleEndian>(*v)?,
            Value::F32(v) => w.write_f32::<LittleEndian>(*v)?,
            Value::F64(v) => w.write_f64::<LittleEndian>(*v)?,
            Value::String(s) => w.write_all(s.as_bytes())?,
            Value::Bytes(b) => w.write_all(b)?,
        }
        Ok(())
    }

    /// Serializes the value into a fresh byte buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        // Writing into a Vec cannot fail.
        self.write_to(&mut buf).expect("encode into Vec");
        buf
    }

    /// Deserializes one value from a reader.
    ///
    /// Rejects unknown tags, payload lengths that disagree with the tag's
    /// fixed width, and string payloads that are not valid UTF-8.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ValueError> {
        let t = r.read_u8()?;
        let len = r.read_u32::<LittleEndian>()? as usize;

        let fixed = |expected: usize| -> Result<(), ValueError> {
            if len != expected {
                return Err(ValueError::Corrupt(format!(
                    "tag {} expects payload of {} bytes, got {}",
                    t, expected, len
                )));
            }
            Ok(())
        };

        let v = match t {
            tag::NIL => {
                fixed(0)?;
                Value::Nil
            }
            tag::BOOL => {
                fixed(1)?;
                match r.read_u8()? {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    other => {
                        return Err(ValueError::Corrupt(format!("bad bool byte {}", other)))
                    }
                }
            }
            tag::I8 => {
                fixed(1)?;
                Value::I8(r.read_i8()?)
            }
            tag::I16 => {
                fixed(2)?;
                Value::I16(r.read_i16::<LittleEndian>()?)
            }
            tag::I32 => {
                fixed(4)?;
                Value::I32(r.read_i32::<LittleEndian>()?)
            }
            tag::I64 => {
                fixed(8)?;
                Value::I64(r.read_i64::<LittleEndian>()?)
            }
            tag::U8 => {
                fixed(1)?;
                Value::U8(r.read_u8()?)
            }
            tag::U16 => {
                fixed(2)?;
                Value::U16(r.read_u16::<LittleEndian>()?)
            }
            tag::U32 => {
                fixed(4)?;
                Value::U32(r.read_u32::<LittleEndian>()?)
            }
            tag::U64 => {
                fixed(8)?;
                Value::U64(r.read_u64::<LittleEndian>()?)
            }
            tag::F32 => {
                fixed(4)?;
                Value::F32(r.read_f32::<LittleEndian>()?)
            }
            tag::F64 => {
                fixed(8)?;
                Value::F64(r.read_f64::<LittleEndian>()?)
            }
            tag::STRING => {
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf)?;
                let s = String::from_utf8(buf)
                    .map_err(|e| ValueError::Corrupt(format!("invalid utf-8: {}", e)))?;
                Value::String(s)
            }
            tag::BYTES => {
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf)?;
                Value::Bytes(buf)
            }
            other => return Err(ValueError::Corrupt(format!("unknown value tag {}", other))),
        };

        Ok(v)
    }

    /// Deserializes one value from a byte slice.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, ValueError> {
        Self::read_from(&mut bytes)
    }
}

macro_rules! accessor {
    ($name:ident, $variant:ident, $ty:ty, $type_name:expr) => {
        /// Returns the inner value, or `TypeMismatch` if a different type is stored.
        pub fn $name(&self) -> Result<$ty, ValueError> {
            match self {
                Value::$variant(v) => Ok(*v),
                other => Err(ValueError::TypeMismatch {
                    expected: $type_name,
                    found: other.type_name(),
                }),
            }
        }
    };
}

impl Value {
    accessor!(as_bool, Bool, bool, "bool");
    accessor!(as_i8, I8, i8, "i8");
    accessor!(as_i16, I16, i16, "i16");
    accessor!(as_i32, I32, i32, "i32");
    accessor!(as_i64, I64, i64, "i64");
    accessor!(as_u8, U8, u8, "u8");
    accessor!(as_u16, U16, u16, "u16");
    accessor!(as_u32, U32, u32, "u32");
    accessor!(as_u64, U64, u64, "u64");
    accessor!(as_f32, F32, f32, "f32");
    accessor!(as_f64, F64, f64, "f64");

    /// Returns the string contents, or `TypeMismatch` if a different type is stored.
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(ValueError::TypeMismatch {
                expected: "string",
                found: other.type_name(),
            }),
        }
    }

    /// Returns the byte contents, or `TypeMismatch` if a different type is stored.
    pub fn as_bytes(&self) -> Result<&[u8], ValueError> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(ValueError::TypeMismatch {
                expected: "bytes",
                found: other.type_name(),
            }),
        }
    }

    /// Returns `true` if the value is `Nil`.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::I8(v)
    }
}
impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}
impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}
impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}
impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}
