//! Event records - the uniform encoding shared by every pulled metric.
//!
//! A record is a tag, two timestamps and an ordered list of typed fields.
//! Field order is fixed per tag by the collector that builds it; nothing here
//! validates a record against a schema. The consumer decodes positionally.
//!
//! Binary layout (little endian):
//!
//! ```text
//! tag: i32 | elapsed_nanos: i64 | wall_nanos: i64 | field_count: u32 | field*
//! field = type: u8 | payload
//!   0x01 int32  -> i32
//!   0x02 int64  -> i64
//!   0x03 string -> u32 length + UTF-8 bytes
//!   0x04 bool   -> u8 (0 or 1)
//!   0x05 bytes  -> u32 length + raw bytes
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

const TYPE_INT32: u8 = 0x01;
const TYPE_INT64: u8 = 0x02;
const TYPE_STRING: u8 = 0x03;
const TYPE_BOOL: u8 = 0x04;
const TYPE_BYTES: u8 = 0x05;

/// One field value inside a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Int32(i32),
    Int64(i64),
    Str(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl TypedValue {
    fn type_byte(&self) -> u8 {
        match self {
            TypedValue::Int32(_) => TYPE_INT32,
            TypedValue::Int64(_) => TYPE_INT64,
            TypedValue::Str(_) => TYPE_STRING,
            TypedValue::Bool(_) => TYPE_BOOL,
            TypedValue::Bytes(_) => TYPE_BYTES,
        }
    }
}

/// One reported measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub tag: i32,
    pub elapsed_nanos: i64,
    pub wall_nanos: i64,
    pub fields: Vec<TypedValue>,
}

/// Errors decoding a binary record
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record truncated at byte {0}")]
    Truncated(usize),

    #[error("unknown field type 0x{0:02x}")]
    UnknownType(u8),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

impl EventRecord {
    pub fn new(tag: i32, elapsed_nanos: i64, wall_nanos: i64) -> Self {
        Self {
            tag,
            elapsed_nanos,
            wall_nanos,
            fields: Vec::new(),
        }
    }

    pub fn write_int(&mut self, value: i32) -> &mut Self {
        self.fields.push(TypedValue::Int32(value));
        self
    }

    pub fn write_long(&mut self, value: i64) -> &mut Self {
        self.fields.push(TypedValue::Int64(value));
        self
    }

    pub fn write_string(&mut self, value: impl Into<String>) -> &mut Self {
        self.fields.push(TypedValue::Str(value.into()));
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.fields.push(TypedValue::Bool(value));
        self
    }

    /// Append an opaque byte blob
    pub fn write_storage(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.fields.push(TypedValue::Bytes(value.into()));
        self
    }

    /// Serialize to the binary layout described in the module docs
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.fields.len() * 9);
        out.extend_from_slice(&self.tag.to_le_bytes());
        out.extend_from_slice(&self.elapsed_nanos.to_le_bytes());
        out.extend_from_slice(&self.wall_nanos.to_le_bytes());
        out.extend_from_slice(&(self.fields.len() as u32).to_le_bytes());

        for field in &self.fields {
            out.push(field.type_byte());
            match field {
                TypedValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
                TypedValue::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
                TypedValue::Str(s) => {
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                TypedValue::Bool(b) => out.push(u8::from(*b)),
                TypedValue::Bytes(bytes) => {
                    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(bytes);
                }
            }
        }
        out
    }

    /// Parse a single record; the buffer must contain exactly one record
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor { buf, pos: 0 };
        let tag = i32::from_le_bytes(cursor.take_array()?);
        let elapsed_nanos = i64::from_le_bytes(cursor.take_array()?);
        let wall_nanos = i64::from_le_bytes(cursor.take_array()?);
        let count = u32::from_le_bytes(cursor.take_array()?) as usize;

        // A field is at least two bytes, so cap the allocation by what is left.
        let mut fields = Vec::with_capacity(count.min(cursor.remaining() / 2));
        for _ in 0..count {
            let [kind] = cursor.take_array::<1>()?;
            let value = match kind {
                TYPE_INT32 => TypedValue::Int32(i32::from_le_bytes(cursor.take_array()?)),
                TYPE_INT64 => TypedValue::Int64(i64::from_le_bytes(cursor.take_array()?)),
                TYPE_STRING => {
                    let raw = cursor.take_prefixed()?;
                    let s = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?;
                    TypedValue::Str(s.to_string())
                }
                TYPE_BOOL => {
                    let [b] = cursor.take_array::<1>()?;
                    TypedValue::Bool(b != 0)
                }
                TYPE_BYTES => TypedValue::Bytes(cursor.take_prefixed()?.to_vec()),
                other => return Err(DecodeError::UnknownType(other)),
            };
            fields.push(value);
        }

        if cursor.remaining() > 0 {
            return Err(DecodeError::TrailingBytes(cursor.remaining()));
        }

        Ok(Self {
            tag,
            elapsed_nanos,
            wall_nanos,
            fields,
        })
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_prefixed(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = u32::from_le_bytes(self.take_array()?) as usize;
        self.take(len)
    }
}
