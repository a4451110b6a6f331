//! Typed values crossing the protocol boundary: bound parameters on the way
//! out, decoded column values on the way in.

pub mod bind;
pub mod decode;
pub mod encode;
mod sql_type;
pub mod temporal;

use bigdecimal::BigDecimal;

pub use bind::{BindSource, BindValue, OffsetTime, SeekRead, StreamSource};
pub use decode::{
    BinaryDecoder, GenericValueFactory, I64Factory, NaiveDateTimeFactory, StringFactory,
    TextDecoder, ValueDecoder, ValueFactory, decode_field,
};
pub use encode::{EncodeContext, EncoderRegistry, ValueEncoder};
pub use sql_type::SqlType;
pub use temporal::{InternalDate, InternalTime, InternalTimestamp};

/// A decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    /// Unsigned BIGINT values above `i64::MAX`
    BigInteger(i128),
    Double(f64),
    /// DECIMAL at full precision, up to 65 digits
    Decimal(BigDecimal),
    Bytes(Vec<u8>),
    String(String),
    Date(InternalDate),
    Time(InternalTime),
    Timestamp(InternalTimestamp),
    Year(u16),
    Bit(u64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            Self::Year(v) => Some(i64::from(v)),
            Self::BigInteger(v) => i64::try_from(v).ok(),
            Self::Bit(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}
