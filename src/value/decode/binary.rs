//! Binary protocol values, as found in COM_STMT_EXECUTE result rows.
//!
//! Temporal values arrive without their length prefix; the slice length
//! selects the layout.

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::charset::Charset;
use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::value::decode::text::parse_decimal;
use crate::value::decode::{ValueDecoder, ValueFactory};
use crate::value::temporal::{InternalDate, InternalTime, InternalTimestamp};

/// DATE/DATETIME/TIMESTAMP - 4 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp4 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
}

/// DATETIME/TIMESTAMP - 7 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp7 {
    pub date: Timestamp4,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// DATETIME/TIMESTAMP - 11 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp11 {
    pub datetime: Timestamp7,
    pub microsecond: U32LE,
}

/// Timestamp with UTC offset - 13 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp13 {
    pub timestamp: Timestamp11,
    pub offset_minutes: zerocopy::byteorder::little_endian::I16,
}

/// TIME - 8 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time8 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// TIME - 12 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time12 {
    pub time: Time8,
    pub microsecond: U32LE,
}

impl From<&Timestamp4> for InternalDate {
    fn from(ts: &Timestamp4) -> Self {
        Self {
            year: ts.year.get(),
            month: ts.month,
            day: ts.day,
        }
    }
}

impl From<&Timestamp7> for InternalTimestamp {
    fn from(ts: &Timestamp7) -> Self {
        Self {
            hour: ts.hour,
            minute: ts.minute,
            second: ts.second,
            ..InternalTimestamp::from(InternalDate::from(&ts.date))
        }
    }
}

impl From<&Time8> for InternalTime {
    fn from(t: &Time8) -> Self {
        Self {
            negative: t.is_negative != 0,
            hours: t.days.get().saturating_mul(24).saturating_add(u32::from(t.hour)),
            minutes: t.minute,
            seconds: t.second,
            nanos: 0,
        }
    }
}

fn wrong_length(what: &str, len: usize) -> Error {
    Error::data_format(format!("invalid {what} length: {len} bytes"))
}

fn layout<'a, T: FromBytes + KnownLayout + Immutable>(bytes: &'a [u8], what: &str) -> Result<&'a T> {
    T::ref_from_bytes(bytes).map_err(|_| wrong_length(what, bytes.len()))
}

/// Strict length check for fixed-width values
fn exact<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    <[u8; N]>::try_from(bytes).map_err(|_| wrong_length(what, bytes.len()))
}

fn micros_to_nanos(micros: u32) -> Result<u32> {
    if micros > 999_999 {
        return Err(Error::data_format(format!("invalid microseconds: {micros}")));
    }
    Ok(micros * 1000)
}

pub(crate) fn parse_binary_timestamp(bytes: &[u8]) -> Result<InternalTimestamp> {
    match bytes.len() {
        0 => Ok(InternalTimestamp::default()),
        4 => Ok(InternalDate::from(layout::<Timestamp4>(bytes, "timestamp")?).into()),
        7 => Ok(InternalTimestamp::from(layout::<Timestamp7>(bytes, "timestamp")?)),
        11 => {
            let ts = layout::<Timestamp11>(bytes, "timestamp")?;
            Ok(InternalTimestamp {
                nanos: micros_to_nanos(ts.microsecond.get())?,
                ..InternalTimestamp::from(&ts.datetime)
            })
        }
        13 => {
            let ts = layout::<Timestamp13>(bytes, "timestamp")?;
            Ok(InternalTimestamp {
                nanos: micros_to_nanos(ts.timestamp.microsecond.get())?,
                offset_minutes: Some(ts.offset_minutes.get()),
                ..InternalTimestamp::from(&ts.timestamp.datetime)
            })
        }
        len => Err(wrong_length("timestamp", len)),
    }
}

pub(crate) fn parse_binary_time(bytes: &[u8]) -> Result<InternalTime> {
    match bytes.len() {
        0 => Ok(InternalTime::default()),
        8 => Ok(InternalTime::from(layout::<Time8>(bytes, "time")?)),
        12 => {
            let t = layout::<Time12>(bytes, "time")?;
            Ok(InternalTime {
                nanos: micros_to_nanos(t.microsecond.get())?,
                ..InternalTime::from(&t.time)
            })
        }
        len => Err(wrong_length("time", len)),
    }
}

/// Decodes binary protocol column values
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryDecoder;

impl ValueDecoder for BinaryDecoder {
    fn decode_integer<F: ValueFactory>(
        &self,
        bytes: &[u8],
        column_type: ColumnType,
        unsigned: bool,
        factory: &F,
    ) -> Result<F::Output> {
        let value = match column_type.binary_width() {
            Some(1) => {
                let [b] = exact::<1>(bytes, "TINYINT")?;
                if unsigned { i64::from(b) } else { i64::from(b as i8) }
            }
            Some(2) => {
                let raw = u16::from_le_bytes(exact::<2>(bytes, "SMALLINT")?);
                if unsigned { i64::from(raw) } else { i64::from(raw as i16) }
            }
            Some(4) => {
                let raw = u32::from_le_bytes(exact::<4>(bytes, "INT")?);
                if unsigned { i64::from(raw) } else { i64::from(raw as i32) }
            }
            Some(8) => {
                let raw = u64::from_le_bytes(exact::<8>(bytes, "BIGINT")?);
                if unsigned && raw > i64::MAX as u64 {
                    return factory.create_from_big_integer(i128::from(raw));
                }
                raw as i64
            }
            _ => {
                return Err(Error::data_format(format!(
                    "{column_type:?} is not an integer type"
                )));
            }
        };
        factory.create_from_long(value)
    }

    fn decode_float<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        let value = f32::from_le_bytes(exact::<4>(bytes, "FLOAT")?);
        factory.create_from_double(f64::from(value))
    }

    fn decode_double<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        factory.create_from_double(f64::from_le_bytes(exact::<8>(bytes, "DOUBLE")?))
    }

    // DECIMAL travels as text in both protocols
    fn decode_decimal<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        factory.create_from_big_decimal(parse_decimal(bytes)?)
    }

    fn decode_date<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        let date = match bytes.len() {
            0 => InternalDate::default(),
            4 => InternalDate::from(layout::<Timestamp4>(bytes, "date")?),
            len => return Err(wrong_length("date", len)),
        };
        factory.create_from_date(date)
    }

    fn decode_time<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        factory.create_from_time(parse_binary_time(bytes)?)
    }

    fn decode_timestamp<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        factory.create_from_timestamp(parse_binary_timestamp(bytes)?)
    }

    fn decode_datetime<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        factory.create_from_datetime(parse_binary_timestamp(bytes)?)
    }

    fn decode_year<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        factory.create_from_year(u16::from_le_bytes(exact::<2>(bytes, "YEAR")?))
    }

    fn decode_bit<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        factory.create_from_bit(bytes)
    }

    fn decode_bytes<F: ValueFactory>(
        &self,
        bytes: &[u8],
        charset: Charset,
        factory: &F,
    ) -> Result<F::Output> {
        factory.create_from_bytes(bytes, charset)
    }
}
