//! Binary serialization of a [`Batch`] (C2).
//!
//! Wire format (all integers little-endian):
//!
//! ```text
//! MAGIC       u32 = 0x5741_4C31   // "WAL1"
//! VERSION     u16
//! txn_id      u16 length, UTF-8 bytes
//! wall_time_ms i64
//! batch_size  u32 (= N)
//! repeat N times:
//!   tenant       u16 length, UTF-8
//!   table        u16 length, UTF-8
//!   op           u8  (0=INSERT 1=UPDATE 2=DELETE 3=UPSERT)
//!   field_count  u32
//!   repeat field_count times:
//!     field_name u16 length, UTF-8
//!     tag        u8 (0=NULL 1=STRING 2=INT64 3=INT32 4=FLOAT64 5=BOOL)
//!     value      tag-dependent encoding (NULL carries 0 bytes)
//! ```
//!
//! Decoding is strict: an unrecognized `op` or `tag` is
//! [`CodecError::UnknownTag`]/[`CodecError::UnknownOp`]; a truncated
//! payload is [`CodecError::Truncated`].

use thiserror::Error;

/// Magic number identifying a batch record: ASCII `"WAL1"`.
pub const MAGIC: u32 = 0x5741_4C31;
/// Current wire-format version.
pub const VERSION: u16 = 1;

/// One record-level mutation within a [`Batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Logical database namespace.
    pub tenant: String,
    /// Entity-type identifier (table name).
    pub table: String,
    /// Mutation kind.
    pub op: Op,
    /// Field-name → tagged-scalar mapping, in encounter order.
    pub data: Vec<(String, Value)>,
}

impl Entry {
    /// Look up a field's value by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// Mutation kind carried by an [`Entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Insert a new record.
    Insert = 0,
    /// Update an existing record.
    Update = 1,
    /// Delete an existing record.
    Delete = 2,
    /// Insert-or-replace.
    Upsert = 3,
}

impl Op {
    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Op::Insert),
            1 => Ok(Op::Update),
            2 => Ok(Op::Delete),
            3 => Ok(Op::Upsert),
            other => Err(CodecError::UnknownOp(other)),
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// A tagged scalar value, the common currency of entry field maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / SQL `NULL`.
    Null,
    /// UTF-8 text.
    Str(String),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
}

impl Value {
    fn tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Str(_) => 1,
            Value::Int64(_) => 2,
            Value::Int32(_) => 3,
            Value::Float64(_) => 4,
            Value::Bool(_) => 5,
        }
    }

    /// Returns the value as an `i64` primary-key candidate, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Int32(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the value as a `&str`, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// An ordered sequence of 1..N [`Entry`] values committed atomically under
/// one `txn_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Unique transaction identifier, server-generated if the caller omits one.
    pub txn_id: String,
    /// Producer wall-clock time at append, milliseconds since UNIX epoch.
    pub wall_time_ms: i64,
    /// The entries carried by this batch.
    pub entries: Vec<Entry>,
}

/// Errors raised by [`encode`] and [`decode`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before a complete batch could be read.
    #[error("truncated batch payload")]
    Truncated,
    /// An unrecognized field-value tag was encountered.
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
    /// An unrecognized `op` discriminant was encountered.
    #[error("unknown op discriminant {0}")]
    UnknownOp(u8),
    /// The magic number did not match [`MAGIC`].
    #[error("bad magic number: 0x{0:08X}")]
    BadMagic(u32),
    /// The wire-format version is not supported by this build.
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u16),
    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Encode `batch` into a freshly-allocated byte buffer.
pub fn encode(batch: &Batch) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&VERSION.to_le_bytes());
    write_str(&mut buf, &batch.txn_id);
    buf.extend_from_slice(&batch.wall_time_ms.to_le_bytes());
    buf.extend_from_slice(&(batch.entries.len() as u32).to_le_bytes());

    for entry in &batch.entries {
        write_str(&mut buf, &entry.tenant);
        write_str(&mut buf, &entry.table);
        buf.push(entry.op.tag());
        buf.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
        for (name, value) in &entry.data {
            write_str(&mut buf, name);
            buf.push(value.tag());
            match value {
                Value::Null => {}
                Value::Str(s) => write_str(&mut buf, s),
                Value::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
                Value::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
                Value::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
                Value::Bool(v) => buf.push(if *v { 1 } else { 0 }),
            }
        }
    }

    Ok(buf)
}

/// Decode a [`Batch`] from `bytes`, requiring the entire slice to be
/// consumed by exactly one batch record.
pub fn decode(bytes: &[u8]) -> Result<Batch, CodecError> {
    let mut r = Reader::new(bytes);

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let txn_id = r.str16()?;
    let wall_time_ms = r.i64()?;
    let batch_size = r.u32()?;

    let mut entries = Vec::with_capacity(batch_size as usize);
    for _ in 0..batch_size {
        let tenant = r.str16()?;
        let table = r.str16()?;
        let op = Op::from_tag(r.u8()?)?;
        let field_count = r.u32()?;

        let mut data = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field_name = r.str16()?;
            let tag = r.u8()?;
            let value = match tag {
                0 => Value::Null,
                1 => Value::Str(r.str16()?),
                2 => Value::Int64(r.i64()?),
                3 => Value::Int32(r.i32()?),
                4 => Value::Float64(r.f64()?),
                5 => Value::Bool(r.u8()? != 0),
                other => return Err(CodecError::UnknownTag(other)),
            };
            data.push((field_name, value));
        }

        entries.push(Entry {
            tenant,
            table,
            op,
            data,
        });
    }

    Ok(Batch {
        txn_id,
        wall_time_ms,
        entries,
    })
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Cursor over an in-memory byte slice, used to decode the fixed little-
/// endian primitives and length-prefixed strings that make up the wire
/// format.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.u32()? as i32)
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn str16(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}
