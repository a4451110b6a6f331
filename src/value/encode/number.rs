use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Error, Result};
use crate::protocol::primitive::{write_bytes_lenenc, write_int_1, write_int_2, write_int_4, write_int_8};
use crate::value::SqlType;
use crate::value::bind::{BindSource, BindValue};
use crate::value::encode::escape::quote_plain;
use crate::value::encode::{EncodeContext, ValueEncoder};

/// Numeric value in the widest form of its family
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Integer(i128),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
}

impl Number {
    pub(crate) fn from_source(source: &BindSource) -> Option<Self> {
        let number = match *source {
            BindSource::Bool(b) => Self::Integer(i128::from(b)),
            BindSource::I8(v) => Self::Integer(v.into()),
            BindSource::I16(v) => Self::Integer(v.into()),
            BindSource::I32(v) => Self::Integer(v.into()),
            BindSource::I64(v) => Self::Integer(v.into()),
            BindSource::U8(v) => Self::Integer(v.into()),
            BindSource::U16(v) => Self::Integer(v.into()),
            BindSource::U32(v) => Self::Integer(v.into()),
            BindSource::U64(v) => Self::Integer(v.into()),
            BindSource::BigInteger(v) => Self::Integer(v),
            BindSource::F32(v) => Self::F32(v),
            BindSource::F64(v) => Self::F64(v),
            BindSource::Decimal(v) => Self::Decimal(v),
            _ => return None,
        };
        Some(number)
    }

    /// Parse a string bound to a numeric column
    pub(crate) fn parse(text: &str, target: SqlType) -> Result<Self> {
        let text = text.trim();
        if matches!(target, SqlType::Boolean | SqlType::Bit) {
            if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("y") {
                return Ok(Self::Integer(1));
            }
            if text.eq_ignore_ascii_case("false") || text.eq_ignore_ascii_case("n") {
                return Ok(Self::Integer(0));
            }
        }
        if let Ok(v) = text.parse::<i128>() {
            return Ok(Self::Integer(v));
        }
        if let Ok(v) = Decimal::from_str(text) {
            return Ok(Self::Decimal(v));
        }
        if let Ok(v) = text.parse::<f64>()
            && v.is_finite()
        {
            return Ok(Self::F64(v));
        }
        Err(Error::DataConversion {
            from: format!("'{text}'"),
            to: target.name(),
        })
    }

    fn is_zero(self) -> bool {
        match self {
            Self::Integer(v) => v == 0,
            Self::F32(v) => v == 0.0,
            Self::F64(v) => v == 0.0,
            Self::Decimal(v) => v.is_zero(),
        }
    }

    /// Integer value, truncating any fraction toward zero
    fn to_integer(self, target: SqlType) -> Result<i128> {
        let not_finite = |v: String| Error::DataConversion {
            from: v,
            to: target.name(),
        };
        match self {
            Self::Integer(v) => Ok(v),
            Self::F32(v) if v.is_finite() => Ok(v.trunc() as i128),
            Self::F64(v) if v.is_finite() => Ok(v.trunc() as i128),
            Self::F32(v) => Err(not_finite(v.to_string())),
            Self::F64(v) => Err(not_finite(v.to_string())),
            Self::Decimal(v) => {
                let whole = v.trunc();
                i128::from_str(&whole.to_string()).map_err(|_| not_finite(v.to_string()))
            }
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Self::Integer(v) => v as f64,
            Self::F32(v) => f64::from(v),
            Self::F64(v) => v,
            Self::Decimal(v) => rust_decimal::prelude::ToPrimitive::to_f64(&v).unwrap_or(f64::NAN),
        }
    }

    fn to_decimal(self, target: SqlType) -> Result<Decimal> {
        let unrepresentable = |v: String| Error::NumberOutOfRange {
            value: v,
            target: target.name(),
        };
        match self {
            Self::Integer(v) => Decimal::try_from_i128_with_scale(v, 0)
                .map_err(|_| unrepresentable(v.to_string())),
            Self::F32(v) => Decimal::try_from(v).map_err(|_| unrepresentable(v.to_string())),
            Self::F64(v) => Decimal::try_from(v).map_err(|_| unrepresentable(v.to_string())),
            Self::Decimal(v) => Ok(v),
        }
    }

    fn natural_text(self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::F32(v) => v.to_string(),
            Self::F64(v) => v.to_string(),
            Self::Decimal(v) => v.to_string(),
        }
    }
}

fn checked_integer(number: Number, target: SqlType) -> Result<i128> {
    let value = number.to_integer(target)?;
    let (min, max) = match target {
        // BIT(64) takes any 64-bit pattern
        SqlType::Bit => (i128::from(i64::MIN), i128::from(u64::MAX)),
        SqlType::Year => (0, i128::from(u16::MAX)),
        _ => target.integer_range().unwrap_or((i128::MIN, i128::MAX)),
    };
    if value < min || value > max {
        return Err(Error::NumberOutOfRange {
            value: value.to_string(),
            target: target.name(),
        });
    }
    Ok(value)
}

fn finite_f64(number: Number, target: SqlType) -> Result<f64> {
    let v = number.to_f64();
    if !v.is_finite() {
        return Err(Error::DataConversion {
            from: number.natural_text(),
            to: target.name(),
        });
    }
    Ok(v)
}

/// Decimal rescaled to the requested scale, rounding half away from zero
fn scaled_decimal(number: Number, bind: &BindValue) -> Result<Decimal> {
    let mut value = number.to_decimal(bind.target)?;
    if let Some(scale) = bind.scale_or_length {
        value = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(scale);
    }
    Ok(value)
}

pub(crate) fn number_text(number: Number, bind: &BindValue) -> Result<Vec<u8>> {
    let target = bind.target;
    let text = match target {
        SqlType::Boolean => if number.is_zero() { "0" } else { "1" }.to_string(),
        SqlType::Bit | SqlType::Year => checked_integer(number, target)?.to_string(),
        t if t.is_integer() => checked_integer(number, target)?.to_string(),
        SqlType::Float => (finite_f64(number, target)? as f32).to_string(),
        SqlType::Double => finite_f64(number, target)?.to_string(),
        SqlType::Decimal => scaled_decimal(number, bind)?.to_string(),
        t if t.is_text() => return Ok(quote_plain(&number.natural_text())),
        _ => return Err(bind.type_mismatch()),
    };
    Ok(text.into_bytes())
}

pub(crate) fn number_binary(number: Number, bind: &BindValue, out: &mut Vec<u8>) -> Result<()> {
    let target = bind.target;
    match target {
        SqlType::Boolean => write_int_1(out, u8::from(!number.is_zero())),
        SqlType::Bit => write_int_8(out, checked_integer(number, target)? as u64),
        SqlType::Year => write_int_2(out, checked_integer(number, target)? as u16),
        SqlType::TinyInt | SqlType::TinyIntUnsigned => {
            write_int_1(out, checked_integer(number, target)? as u8);
        }
        SqlType::SmallInt | SqlType::SmallIntUnsigned => {
            write_int_2(out, checked_integer(number, target)? as u16);
        }
        SqlType::MediumInt | SqlType::MediumIntUnsigned | SqlType::Int | SqlType::IntUnsigned => {
            write_int_4(out, checked_integer(number, target)? as u32);
        }
        SqlType::BigInt | SqlType::BigIntUnsigned => {
            write_int_8(out, checked_integer(number, target)? as u64);
        }
        SqlType::Float => {
            let v = finite_f64(number, target)? as f32;
            out.extend_from_slice(&v.to_le_bytes());
        }
        SqlType::Double => out.extend_from_slice(&finite_f64(number, target)?.to_le_bytes()),
        SqlType::Decimal => {
            write_bytes_lenenc(out, scaled_decimal(number, bind)?.to_string().as_bytes());
        }
        t if t.is_text() => write_bytes_lenenc(out, number.natural_text().as_bytes()),
        _ => return Err(bind.type_mismatch()),
    }
    Ok(())
}

fn source_number(bind: &BindValue) -> Result<Number> {
    Number::from_source(&bind.source).ok_or_else(|| bind.type_mismatch())
}

/// Integral, floating point and decimal values
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberEncoder;

impl ValueEncoder for NumberEncoder {
    fn encode_as_text(&self, bind: &BindValue, _ctx: &EncodeContext) -> Result<Vec<u8>> {
        number_text(source_number(bind)?, bind)
    }

    fn encode_as_binary(
        &self,
        bind: &BindValue,
        _ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        number_binary(source_number(bind)?, bind, out)
    }
}
