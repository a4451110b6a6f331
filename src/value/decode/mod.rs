//! Decoding of column values.
//!
//! A [`ValueDecoder`] parses the wire form of one column value (binary or
//! text protocol) and hands the primitive to a [`ValueFactory`], which builds
//! the caller's representation. The same decoders serve every factory.

mod binary;
mod factory;
pub(crate) mod text;

pub use binary::{BinaryDecoder, Time8, Time12, Timestamp4, Timestamp7, Timestamp11, Timestamp13};
pub use factory::{
    GenericValueFactory, I64Factory, NaiveDateTimeFactory, StringFactory, ValueFactory,
};
pub use text::TextDecoder;

use crate::charset::Charset;
use crate::constant::{ColumnFlags, ColumnType};
use crate::error::Result;
use crate::protocol::column::Field;

pub trait ValueDecoder {
    /// TINYINT to BIGINT; `column_type` fixes the expected binary width
    fn decode_integer<F: ValueFactory>(
        &self,
        bytes: &[u8],
        column_type: ColumnType,
        unsigned: bool,
        factory: &F,
    ) -> Result<F::Output>;

    fn decode_float<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_double<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_decimal<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_date<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_time<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_timestamp<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_datetime<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_year<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_bit<F: ValueFactory>(&self, bytes: &[u8], factory: &F) -> Result<F::Output>;

    fn decode_bytes<F: ValueFactory>(
        &self,
        bytes: &[u8],
        charset: Charset,
        factory: &F,
    ) -> Result<F::Output>;
}

/// Decode one non-NULL column value according to its column definition
pub fn decode_field<D: ValueDecoder, F: ValueFactory>(
    decoder: &D,
    field: &Field,
    bytes: &[u8],
    factory: &F,
) -> Result<F::Output> {
    let unsigned = field.flags.contains(ColumnFlags::UNSIGNED_FLAG);
    match field.column_type {
        ColumnType::MYSQL_TYPE_NULL => factory.create_from_null(),
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG => {
            decoder.decode_integer(bytes, field.column_type, unsigned, factory)
        }
        ColumnType::MYSQL_TYPE_YEAR => decoder.decode_year(bytes, factory),
        ColumnType::MYSQL_TYPE_FLOAT => decoder.decode_float(bytes, factory),
        ColumnType::MYSQL_TYPE_DOUBLE => decoder.decode_double(bytes, factory),
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            decoder.decode_decimal(bytes, factory)
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            decoder.decode_date(bytes, factory)
        }
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            decoder.decode_time(bytes, factory)
        }
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            decoder.decode_timestamp(bytes, factory)
        }
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => {
            decoder.decode_datetime(bytes, factory)
        }
        ColumnType::MYSQL_TYPE_BIT => decoder.decode_bit(bytes, factory),
        ColumnType::MYSQL_TYPE_VARCHAR
        | ColumnType::MYSQL_TYPE_VAR_STRING
        | ColumnType::MYSQL_TYPE_STRING
        | ColumnType::MYSQL_TYPE_ENUM
        | ColumnType::MYSQL_TYPE_SET
        | ColumnType::MYSQL_TYPE_JSON
        | ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_GEOMETRY
        | ColumnType::MYSQL_TYPE_VECTOR
        | ColumnType::MYSQL_TYPE_TYPED_ARRAY => {
            decoder.decode_bytes(bytes, field.charset(), factory)
        }
    }
}
