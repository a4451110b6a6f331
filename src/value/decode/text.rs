//! Text protocol values: every column arrives as its ASCII rendering.

use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::charset::Charset;
use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::value::decode::{ValueDecoder, ValueFactory};
use crate::value::temporal::{InternalDate, InternalTime, InternalTimestamp};

fn ascii(bytes: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(bytes).map_err(|_| Error::data_format("non-ascii numeric text"))
}

fn invalid(what: &str, bytes: &[u8]) -> Error {
    Error::data_format(format!(
        "invalid {what} text '{}'",
        String::from_utf8_lossy(bytes)
    ))
}

/// Sign and magnitude of a decimal integer.
///
/// Accumulates with overflow checks; any non-digit after the optional sign
/// is rejected.
fn parse_magnitude(bytes: &[u8]) -> Result<(bool, u64)> {
    let (negative, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return Err(invalid("integer", bytes));
    }
    let mut value: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid("integer", bytes));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or_else(|| Error::NumberOutOfRange {
                value: String::from_utf8_lossy(bytes).into_owned(),
                target: "BIGINT UNSIGNED",
            })?;
    }
    Ok((negative, value))
}

pub(crate) fn parse_i64(bytes: &[u8]) -> Result<i64> {
    let (negative, magnitude) = parse_magnitude(bytes)?;
    let signed = if negative {
        0i128 - i128::from(magnitude)
    } else {
        i128::from(magnitude)
    };
    i64::try_from(signed).map_err(|_| Error::NumberOutOfRange {
        value: String::from_utf8_lossy(bytes).into_owned(),
        target: "BIGINT",
    })
}

fn parse_i128(bytes: &[u8]) -> Result<i128> {
    let (negative, magnitude) = parse_magnitude(bytes)?;
    let magnitude = i128::from(magnitude);
    Ok(if negative { -magnitude } else { magnitude })
}

/// `[-+]D*[.D*]` with at least one digit, as MySQL renders DECIMAL.
///
/// Exponents are refused; DECIMAL(65,30) fits without one.
pub(crate) fn parse_decimal(bytes: &[u8]) -> Result<BigDecimal> {
    let unsigned = match bytes.first() {
        Some(b'-' | b'+') => &bytes[1..],
        _ => bytes,
    };
    let (whole, fraction) = match unsigned.iter().position(|&b| b == b'.') {
        Some(dot) => (&unsigned[..dot], &unsigned[dot + 1..]),
        None => (unsigned, &[][..]),
    };
    let well_formed = whole.len() + fraction.len() > 0
        && whole.iter().chain(fraction).all(u8::is_ascii_digit);
    if !well_formed {
        return Err(invalid("decimal", bytes));
    }
    BigDecimal::from_str(ascii(bytes)?).map_err(|_| invalid("decimal", bytes))
}

/// Non-empty run of ASCII digits
fn fixed_digits(bytes: &[u8], what: &str, all: &[u8]) -> Result<u32> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(invalid(what, all));
    }
    Ok(bytes
        .iter()
        .fold(0u32, |acc, &b| acc * 10 + u32::from(b - b'0')))
}

fn expect_delimiter(bytes: &[u8], pos: usize, delimiter: u8, what: &str) -> Result<()> {
    if bytes.get(pos) != Some(&delimiter) {
        return Err(invalid(what, bytes));
    }
    Ok(())
}

/// 1 to 9 fractional digits scaled to nanoseconds
fn parse_nanos(digits: &[u8], what: &str, all: &[u8]) -> Result<u32> {
    if digits.is_empty() || digits.len() > 9 {
        return Err(invalid(what, all));
    }
    let value = fixed_digits(digits, what, all)?;
    Ok(value * 10u32.pow(9 - digits.len() as u32))
}

/// `YYYY-MM-DD`
pub(crate) fn parse_date(bytes: &[u8]) -> Result<InternalDate> {
    if bytes.len() != 10 {
        return Err(invalid("date", bytes));
    }
    expect_delimiter(bytes, 4, b'-', "date")?;
    expect_delimiter(bytes, 7, b'-', "date")?;
    let year = fixed_digits(&bytes[0..4], "date", bytes)?;
    let month = fixed_digits(&bytes[5..7], "date", bytes)?;
    let day = fixed_digits(&bytes[8..10], "date", bytes)?;
    if month > 12 || day > 31 {
        return Err(invalid("date", bytes));
    }
    Ok(InternalDate {
        year: year as u16,
        month: month as u8,
        day: day as u8,
    })
}

/// `[-]H+:MM:SS[.f{1,9}]`
pub(crate) fn parse_time(bytes: &[u8]) -> Result<InternalTime> {
    let (negative, rest) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        _ => (false, bytes),
    };
    let colon = rest
        .iter()
        .position(|&b| b == b':')
        .filter(|&c| (1..=7).contains(&c))
        .ok_or_else(|| invalid("time", bytes))?;
    let hours = fixed_digits(&rest[..colon], "time", bytes)?;
    let rest = &rest[colon..];
    // ":MM:SS" then an optional fraction
    if rest.len() < 6 {
        return Err(invalid("time", bytes));
    }
    expect_delimiter(rest, 0, b':', "time")?;
    expect_delimiter(rest, 3, b':', "time")?;
    let minutes = fixed_digits(&rest[1..3], "time", bytes)?;
    let seconds = fixed_digits(&rest[4..6], "time", bytes)?;
    let nanos = match &rest[6..] {
        [] => 0,
        [b'.', digits @ ..] => parse_nanos(digits, "time", bytes)?,
        _ => return Err(invalid("time", bytes)),
    };
    if minutes > 59 || seconds > 59 {
        return Err(invalid("time", bytes));
    }
    Ok(InternalTime {
        negative,
        hours,
        minutes: minutes as u8,
        seconds: seconds as u8,
        nanos,
    })
}

/// `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or with 1 to 9 fractional digits;
/// `T` is accepted in place of the space
pub(crate) fn parse_timestamp(bytes: &[u8]) -> Result<InternalTimestamp> {
    let date = match bytes.len() {
        10 => return parse_date(bytes).map(InternalTimestamp::from),
        19 | 21..=29 => parse_date(&bytes[..10])?,
        _ => return Err(invalid("timestamp", bytes)),
    };
    if !matches!(bytes[10], b' ' | b'T') {
        return Err(invalid("timestamp", bytes));
    }
    expect_delimiter(bytes, 13, b':', "timestamp")?;
    expect_delimiter(bytes, 16, b':', "timestamp")?;
    let hour = fixed_digits(&bytes[11..13], "timestamp", bytes)?;
    let minute = fixed_digits(&bytes[14..16], "timestamp", bytes)?;
    let second = fixed_digits(&bytes[17..19], "timestamp", bytes)?;
    let nanos = if bytes.len() > 19 {
        expect_delimiter(bytes, 19, b'.', "timestamp")?;
        parse_nanos(&bytes[20..], "timestamp", bytes)?
    } else {
        0
    };
    if hour > 23 || minute > 59 || second > 59 {
        return Err(invalid("timestamp", bytes));
    }
    Ok(InternalTimestamp {
        year: date.year,
        month: date.month,
        day: date.day,
        hour: hour as u8,
        minute: minute as u8,
        second: second as u8,
        nanos,
        offset_minutes: None,
    })
}

/// Decodes text protocol column values
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl ValueDecoder for TextDecoder {
    fn decode_integer<F: ValueFactory>(
        &self,
        bytes: &[u8],
        _column_type: ColumnType,
        unsigned: bool,
        factory: &F,
    ) -> Result<F::Output> {
        if unsigned {
            let value = parse_i128(bytes)?;
            if value < 0 {
                return Err(invalid("unsigned integer", bytes));
            }
            return match i64::try_from(value) {
                Ok(v) => factory.create_from_long(v),
                Err(_) => factory.create_from_big_integer(value),
            };
        }
        factory.create_from_long(parse_i64(bytes)?)
    }

    fn decode_float<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        let value: f32 = ascii(bytes)?
            .parse()
            .map_err(|_| invalid("float", bytes))?;
        factory.create_from_double(f64::from(value))
    }

    fn decode_double<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        let value: f64 = ascii(bytes)?
            .parse()
            .map_err(|_| invalid("double", bytes))?;
        factory.create_from_double(value)
    }

    fn decode_decimal<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        factory.create_from_big_decimal(parse_decimal(bytes)?)
    }

    // an empty temporal value is the all-zero value, not NULL

    fn decode_date<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        if bytes.is_empty() {
            return factory.create_from_date(InternalDate::default());
        }
        factory.create_from_date(parse_date(bytes)?)
    }

    fn decode_time<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        if bytes.is_empty() {
            return factory.create_from_time(InternalTime::default());
        }
        factory.create_from_time(parse_time(bytes)?)
    }

    fn decode_timestamp<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        if bytes.is_empty() {
            return factory.create_from_timestamp(InternalTimestamp::default());
        }
        factory.create_from_timestamp(parse_timestamp(bytes)?)
    }

    fn decode_datetime<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        if bytes.is_empty() {
            return factory.create_from_datetime(InternalTimestamp::default());
        }
        factory.create_from_datetime(parse_timestamp(bytes)?)
    }

    fn decode_year<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output> {
        let year = parse_i64(bytes)?;
        let year = u16::try_from(year).map_err(|_| invalid("year", bytes))?;
        factory.create_from_year(year)
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
