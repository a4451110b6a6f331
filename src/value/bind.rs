use std::any::Any;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc,
};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::protocol::column::Field;
use crate::value::SqlType;

pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

const STREAM_CHUNK: usize = 8192;

/// Shared handle to a seekable source of parameter data.
///
/// Every read remembers the position it started from and seeks back to it
/// afterwards, so a value can be rendered more than once.
#[derive(Clone)]
pub struct StreamSource {
    inner: Arc<Mutex<Box<dyn SeekRead>>>,
    declared_length: Option<u64>,
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("declared_length", &self.declared_length)
            .finish_non_exhaustive()
    }
}

impl StreamSource {
    pub fn new(reader: impl SeekRead + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(reader))),
            declared_length: None,
        }
    }

    /// Length in bytes (byte streams) or characters (character streams)
    pub fn with_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    pub fn declared_length(&self) -> Option<u64> {
        self.declared_length
    }

    /// Run `f` on the stream and restore its position afterwards
    fn with_mark<T>(&self, f: impl FnOnce(&mut dyn SeekRead) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let reader: &mut dyn SeekRead = &mut **guard;
        let mark = reader.stream_position()?;
        let result = f(&mut *reader);
        if let Err(e) = reader.seek(SeekFrom::Start(mark)) {
            tracing::warn!(error = %e, "failed to rewind parameter stream");
        }
        result
    }

    /// Read up to `limit` bytes, or everything when `limit` is `None`
    pub fn read_bytes(&self, limit: Option<u64>) -> Result<Vec<u8>> {
        self.with_mark(|reader| {
            let mut out = Vec::new();
            match limit {
                None => {
                    reader.read_to_end(&mut out)?;
                }
                Some(limit) => {
                    let mut remaining = limit;
                    let mut chunk = [0u8; STREAM_CHUNK];
                    while remaining > 0 {
                        let want = chunk.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                        let n = reader.read(&mut chunk[..want])?;
                        if n == 0 {
                            break;
                        }
                        out.extend_from_slice(&chunk[..n]);
                        remaining -= n as u64;
                    }
                }
            }
            Ok(out)
        })
    }

    /// Read up to `limit` UTF-8 characters, or everything when `limit` is `None`
    pub fn read_chars(&self, limit: Option<u64>) -> Result<String> {
        self.with_mark(|reader| {
            let mut out = String::new();
            let mut pending: Vec<u8> = Vec::new();
            let mut remaining = limit;
            let mut chunk = [0u8; STREAM_CHUNK];
            while remaining != Some(0) {
                let n = reader.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&chunk[..n]);
                let valid = match simdutf8::compat::from_utf8(&pending) {
                    Ok(_) => pending.len(),
                    // an incomplete sequence at the end waits for the next chunk
                    Err(e) if e.error_len().is_none() => e.valid_up_to(),
                    Err(_) => return Err(Error::data_format("invalid utf-8 in character stream")),
                };
                let text = std::str::from_utf8(&pending[..valid])
                    .map_err(|_| Error::data_format("invalid utf-8 in character stream"))?;
                for c in text.chars() {
                    if remaining == Some(0) {
                        break;
                    }
                    out.push(c);
                    if let Some(r) = remaining.as_mut() {
                        *r -= 1;
                    }
                }
                pending.drain(..valid);
            }
            if !pending.is_empty() && remaining != Some(0) {
                return Err(Error::data_format("character stream ends inside a utf-8 sequence"));
            }
            Ok(out)
        })
    }

    /// Visit the stream in chunks of at most `chunk_size` bytes
    pub fn for_each_chunk(
        &self,
        limit: Option<u64>,
        chunk_size: usize,
        mut f: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        self.with_mark(|reader| {
            let mut remaining = limit.unwrap_or(u64::MAX);
            let mut chunk = vec![0u8; chunk_size.max(1)];
            while remaining > 0 {
                let want = chunk.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                let n = reader.read(&mut chunk[..want])?;
                if n == 0 {
                    break;
                }
                f(&chunk[..n])?;
                remaining -= n as u64;
            }
            Ok(())
        })
    }
}

/// Time of day with a fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetTime {
    pub time: NaiveTime,
    pub offset: FixedOffset,
}

/// Application value bound to a parameter.
///
/// A closed set of shapes; each shape has one built-in encoder.
#[derive(Debug, Clone)]
pub enum BindSource {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    BigInteger(i128),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    ByteStream(StreamSource),
    CharStream(StreamSource),
    Date(NaiveDate),
    Time(NaiveTime),
    Duration(TimeDelta),
    DateTime(NaiveDateTime),
    Instant(DateTime<Utc>),
    Zoned(DateTime<FixedOffset>),
    OffsetTime(OffsetTime),
    SystemTime(SystemTime),
    /// Values only a user-registered encoder understands
    Other(Arc<dyn Any + Send + Sync>),
}

impl BindSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::BigInteger(_) => "big integer",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::ByteStream(_) => "byte stream",
            Self::CharStream(_) => "character stream",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Duration(_) => "duration",
            Self::DateTime(_) => "datetime",
            Self::Instant(_) => "instant",
            Self::Zoned(_) => "zoned datetime",
            Self::OffsetTime(_) => "offset time",
            Self::SystemTime(_) => "system time",
            Self::Other(_) => "custom value",
        }
    }

    /// Column type assumed when the caller does not name one
    pub fn default_sql_type(&self) -> SqlType {
        match self {
            Self::Null => SqlType::Null,
            Self::Bool(_) => SqlType::Boolean,
            Self::I8(_) => SqlType::TinyInt,
            Self::I16(_) => SqlType::SmallInt,
            Self::I32(_) => SqlType::Int,
            Self::I64(_) => SqlType::BigInt,
            Self::U8(_) => SqlType::TinyIntUnsigned,
            Self::U16(_) => SqlType::SmallIntUnsigned,
            Self::U32(_) => SqlType::IntUnsigned,
            Self::U64(_) => SqlType::BigIntUnsigned,
            Self::BigInteger(_) | Self::Decimal(_) => SqlType::Decimal,
            Self::F32(_) => SqlType::Float,
            Self::F64(_) => SqlType::Double,
            Self::String(_) | Self::CharStream(_) => SqlType::VarChar,
            Self::Bytes(_) | Self::ByteStream(_) => SqlType::Blob,
            Self::Date(_) => SqlType::Date,
            Self::Time(_) | Self::Duration(_) | Self::OffsetTime(_) => SqlType::Time,
            Self::DateTime(_) => SqlType::DateTime,
            Self::Instant(_) | Self::Zoned(_) | Self::SystemTime(_) => SqlType::Timestamp,
            Self::Other(_) => SqlType::Unknown,
        }
    }
}

macro_rules! impl_from_source {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for BindSource {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_source! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i128 => BigInteger,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    String => String,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    TimeDelta => Duration,
    NaiveDateTime => DateTime,
    DateTime<Utc> => Instant,
    DateTime<FixedOffset> => Zoned,
    OffsetTime => OffsetTime,
    SystemTime => SystemTime,
}

impl From<&str> for BindSource {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<&[u8]> for BindSource {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl<T: Into<BindSource>> From<Option<T>> for BindSource {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One parameter of a statement or query attribute
#[derive(Debug, Clone)]
pub struct BindValue {
    pub source: BindSource,
    /// Column type the value is rendered for
    pub target: SqlType,
    /// Decimal scale, or a length hint for streams
    pub scale_or_length: Option<u32>,
    /// Zone used for instants in place of the session zone
    pub zone: Option<FixedOffset>,
    /// Column the value is bound to; its decimals bound fractional seconds
    pub field: Option<Arc<Field>>,
    /// Query attribute name
    pub name: Option<String>,
}

impl BindValue {
    pub fn new(source: impl Into<BindSource>) -> Self {
        let source = source.into();
        Self {
            target: source.default_sql_type(),
            source,
            scale_or_length: None,
            zone: None,
            field: None,
            name: None,
        }
    }

    pub fn null() -> Self {
        Self::new(BindSource::Null)
    }

    pub fn byte_stream(stream: StreamSource) -> Self {
        Self::new(BindSource::ByteStream(stream))
    }

    pub fn char_stream(stream: StreamSource) -> Self {
        Self::new(BindSource::CharStream(stream))
    }

    pub fn with_target(mut self, target: SqlType) -> Self {
        self.target = target;
        self
    }

    pub fn with_scale(mut self, scale_or_length: u32) -> Self {
        self.scale_or_length = Some(scale_or_length);
        self
    }

    pub fn with_zone(mut self, zone: FixedOffset) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn with_field(mut self, field: Arc<Field>) -> Self {
        self.field = Some(field);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_null(&self) -> bool {
        matches!(self.source, BindSource::Null)
    }

    pub fn is_stream(&self) -> bool {
        matches!(
            self.source,
            BindSource::ByteStream(_) | BindSource::CharStream(_)
        )
    }

    pub(crate) fn type_mismatch(&self) -> Error {
        Error::TypeMismatch {
            value_kind: self.source.kind(),
            target: self.target,
        }
    }
}
