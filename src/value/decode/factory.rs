use auto_impl::auto_impl;
use chrono::{NaiveDateTime, NaiveTime};
use bigdecimal::{BigDecimal, ToPrimitive};

use crate::charset::Charset;
use crate::error::{Error, Result};
use crate::value::Value;
use crate::value::decode::text::parse_i64;
use crate::value::temporal::{InternalDate, InternalTime, InternalTimestamp};

fn unsupported(from: impl Into<String>, to: &'static str) -> Error {
    Error::DataConversion {
        from: from.into(),
        to,
    }
}

/// Builds the application representation of a decoded column value.
///
/// Decoders parse wire bytes into primitives and hand them to the factory;
/// every conversion a factory does not override is a `DataConversion` error.
#[auto_impl(&, Box)]
pub trait ValueFactory {
    type Output;

    fn target_type_name(&self) -> &'static str;

    fn create_from_long(&self, value: i64) -> Result<Self::Output> {
        Err(unsupported(format!("integer {value}"), self.target_type_name()))
    }

    fn create_from_big_integer(&self, value: i128) -> Result<Self::Output> {
        Err(unsupported(format!("integer {value}"), self.target_type_name()))
    }

    fn create_from_double(&self, value: f64) -> Result<Self::Output> {
        Err(unsupported(format!("double {value}"), self.target_type_name()))
    }

    fn create_from_big_decimal(&self, value: BigDecimal) -> Result<Self::Output> {
        Err(unsupported(format!("decimal {value}"), self.target_type_name()))
    }

    fn create_from_bytes(&self, bytes: &[u8], charset: Charset) -> Result<Self::Output> {
        let _ = (bytes, charset);
        Err(unsupported("bytes", self.target_type_name()))
    }

    fn create_from_date(&self, date: InternalDate) -> Result<Self::Output> {
        Err(unsupported(date.to_literal(), self.target_type_name()))
    }

    fn create_from_time(&self, time: InternalTime) -> Result<Self::Output> {
        Err(unsupported(time.to_literal(9), self.target_type_name()))
    }

    fn create_from_timestamp(&self, ts: InternalTimestamp) -> Result<Self::Output> {
        Err(unsupported(ts.to_literal(9), self.target_type_name()))
    }

    fn create_from_datetime(&self, ts: InternalTimestamp) -> Result<Self::Output> {
        self.create_from_timestamp(ts)
    }

    fn create_from_year(&self, year: u16) -> Result<Self::Output> {
        self.create_from_long(i64::from(year))
    }

    /// BIT bytes arrive big-endian; up to 8 of them fit a long
    fn create_from_bit(&self, bytes: &[u8]) -> Result<Self::Output> {
        if bytes.len() > 8 {
            return Err(Error::data_format(format!(
                "BIT value of {} bytes does not fit 64 bits",
                bytes.len()
            )));
        }
        let packed = bytes
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        self.create_from_long(packed as i64)
    }

    fn create_from_null(&self) -> Result<Self::Output> {
        Err(unsupported("NULL", self.target_type_name()))
    }
}

/// Produces [`Value`], keeping every column kind distinguishable
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericValueFactory;

impl ValueFactory for GenericValueFactory {
    type Output = Value;

    fn target_type_name(&self) -> &'static str {
        "Value"
    }

    fn create_from_long(&self, value: i64) -> Result<Value> {
        Ok(Value::Int(value))
    }

    fn create_from_big_integer(&self, value: i128) -> Result<Value> {
        Ok(i64::try_from(value).map_or(Value::BigInteger(value), Value::Int))
    }

    fn create_from_double(&self, value: f64) -> Result<Value> {
        Ok(Value::Double(value))
    }

    fn create_from_big_decimal(&self, value: BigDecimal) -> Result<Value> {
        Ok(Value::Decimal(value))
    }

    fn create_from_bytes(&self, bytes: &[u8], charset: Charset) -> Result<Value> {
        if charset == Charset::Binary {
            return Ok(Value::Bytes(bytes.to_vec()));
        }
        Ok(Value::String(charset.decode(bytes)?.into_owned()))
    }

    fn create_from_date(&self, date: InternalDate) -> Result<Value> {
        Ok(Value::Date(date))
    }

    fn create_from_time(&self, time: InternalTime) -> Result<Value> {
        Ok(Value::Time(time))
    }

    fn create_from_timestamp(&self, ts: InternalTimestamp) -> Result<Value> {
        Ok(Value::Timestamp(ts))
    }

    fn create_from_year(&self, year: u16) -> Result<Value> {
        Ok(Value::Year(year))
    }

    fn create_from_bit(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.len() > 8 {
            return Ok(Value::Bytes(bytes.to_vec()));
        }
        Ok(Value::Bit(
            bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        ))
    }

    fn create_from_null(&self) -> Result<Value> {
        Ok(Value::Null)
    }
}

/// Produces `i64`, range-checking wider values
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Factory;

impl I64Factory {
    fn out_of_range(value: impl ToString) -> Error {
        Error::NumberOutOfRange {
            value: value.to_string(),
            target: "i64",
        }
    }
}

impl ValueFactory for I64Factory {
    type Output = i64;

    fn target_type_name(&self) -> &'static str {
        "i64"
    }

    fn create_from_long(&self, value: i64) -> Result<i64> {
        Ok(value)
    }

    fn create_from_big_integer(&self, value: i128) -> Result<i64> {
        i64::try_from(value).map_err(|_| Self::out_of_range(value))
    }

    fn create_from_double(&self, value: f64) -> Result<i64> {
        if !value.is_finite() || value < i64::MIN as f64 || value >= i64::MAX as f64 {
            return Err(Self::out_of_range(value));
        }
        Ok(value.trunc() as i64)
    }

    fn create_from_big_decimal(&self, value: BigDecimal) -> Result<i64> {
        value
            .with_scale(0)
            .to_i64()
            .ok_or_else(|| Self::out_of_range(value))
    }

    fn create_from_bytes(&self, bytes: &[u8], _charset: Charset) -> Result<i64> {
        parse_i64(bytes)
    }

    fn create_from_bit(&self, bytes: &[u8]) -> Result<i64> {
        if bytes.len() > 8 {
            return Err(Self::out_of_range(format!("BIT({})", bytes.len() * 8)));
        }
        let packed = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        i64::try_from(packed).map_err(|_| Self::out_of_range(packed))
    }
}

/// Produces the value's text form
#[derive(Debug, Clone, Copy, Default)]
pub struct StringFactory;

impl ValueFactory for StringFactory {
    type Output = String;

    fn target_type_name(&self) -> &'static str {
        "String"
    }

    fn create_from_long(&self, value: i64) -> Result<String> {
        Ok(value.to_string())
    }

    fn create_from_big_integer(&self, value: i128) -> Result<String> {
        Ok(value.to_string())
    }

    fn create_from_double(&self, value: f64) -> Result<String> {
        Ok(value.to_string())
    }

    fn create_from_big_decimal(&self, value: BigDecimal) -> Result<String> {
        Ok(value.to_plain_string())
    }

    fn create_from_bytes(&self, bytes: &[u8], charset: Charset) -> Result<String> {
        Ok(charset.decode(bytes)?.into_owned())
    }

    fn create_from_date(&self, date: InternalDate) -> Result<String> {
        Ok(date.to_literal())
    }

    fn create_from_time(&self, time: InternalTime) -> Result<String> {
        Ok(time.to_literal(6))
    }

    fn create_from_timestamp(&self, ts: InternalTimestamp) -> Result<String> {
        Ok(ts.to_literal(6))
    }
}

/// Produces `NaiveDateTime`; zero dates cannot be represented and fail
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveDateTimeFactory;

impl NaiveDateTimeFactory {
    fn zero(literal: String) -> Error {
        unsupported(literal, "NaiveDateTime")
    }
}

impl ValueFactory for NaiveDateTimeFactory {
    type Output = NaiveDateTime;

    fn target_type_name(&self) -> &'static str {
        "NaiveDateTime"
    }

    fn create_from_date(&self, date: InternalDate) -> Result<NaiveDateTime> {
        date.to_naive()
            .map(|d| d.and_time(NaiveTime::MIN))
            .ok_or_else(|| Self::zero(date.to_literal()))
    }

    fn create_from_timestamp(&self, ts: InternalTimestamp) -> Result<NaiveDateTime> {
        ts.to_naive().ok_or_else(|| Self::zero(ts.to_literal(6)))
    }

    fn create_from_bytes(&self, bytes: &[u8], _charset: Charset) -> Result<NaiveDateTime> {
        let ts = crate::value::decode::text::parse_timestamp(bytes)?;
        self.create_from_timestamp(ts)
    }
}
