//! Result rows in both protocols.
//!
//! A [`RowFactory`] turns a row packet into a [`Row`], either copying every
//! column into its own array or keeping the packet and the column offsets.

use std::ops::Range;

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::opts::ResultSetConcurrency;
use crate::protocol::column::{ColumnDefinition, Field};
use crate::protocol::primitive::*;
use crate::value::decode::{BinaryDecoder, TextDecoder, ValueFactory, decode_field};

/// NULL bitmap of a binary row or of COM_STMT_EXECUTE parameters
#[derive(Debug, Clone, Copy)]
pub struct NullBitmap<'a> {
    bitmap: &'a [u8],
    offset: usize,
}

impl<'a> NullBitmap<'a> {
    /// Bitmap of a binary result row; the first two bits are reserved
    pub fn for_result_set(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 2 }
    }

    /// Bitmap of statement parameters
    pub fn for_parameters(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 0 }
    }

    /// Bytes needed for `count` columns with `offset` reserved bits
    pub fn byte_len(count: usize, offset: usize) -> usize {
        (count + offset).div_ceil(8)
    }

    pub fn is_null(&self, idx: usize) -> bool {
        let bit_pos = idx + self.offset;
        let byte_pos = bit_pos >> 3;
        let bit_offset = bit_pos & 7;

        match self.bitmap.get(byte_pos) {
            Some(byte) => byte & (1 << bit_offset) != 0,
            None => false,
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bitmap
    }
}

/// Append a parameter NULL bitmap
pub fn write_null_bitmap(out: &mut Vec<u8>, nulls: impl ExactSizeIterator<Item = bool>) {
    let start = out.len();
    out.resize(start + NullBitmap::byte_len(nulls.len(), 0), 0);
    for (idx, is_null) in nulls.enumerate() {
        if is_null {
            out[start + (idx >> 3)] |= 1 << (idx & 7);
        }
    }
}

/// Text rows carry every value as a string; binary rows use the type's wire form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    Text,
    Binary,
}

#[derive(Debug, Clone)]
enum RowStorage {
    /// One array per column
    ByteArray(Vec<Option<Vec<u8>>>),
    /// The row packet and where each value sits in it
    Buffer {
        packet: Vec<u8>,
        offsets: Vec<Option<Range<usize>>>,
    },
}

/// One result row
#[derive(Debug, Clone)]
pub struct Row {
    format: RowFormat,
    columns: ColumnDefinition,
    storage: RowStorage,
}

impl Row {
    pub fn format(&self) -> RowFormat {
        self.format
    }

    pub fn columns(&self) -> &ColumnDefinition {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether the row keeps its packet instead of per-column copies
    pub fn is_buffered(&self) -> bool {
        matches!(self.storage, RowStorage::Buffer { .. })
    }

    /// Raw value bytes without length prefix, `None` for NULL
    pub fn raw(&self, idx: usize) -> Result<Option<&[u8]>> {
        match &self.storage {
            RowStorage::ByteArray(values) => values
                .get(idx)
                .map(Option::as_deref)
                .ok_or_else(|| out_of_bounds(idx, values.len())),
            RowStorage::Buffer { packet, offsets } => offsets
                .get(idx)
                .map(|range| range.clone().map(|r| &packet[r]))
                .ok_or_else(|| out_of_bounds(idx, offsets.len())),
        }
    }

    pub fn is_null(&self, idx: usize) -> Result<bool> {
        Ok(self.raw(idx)?.is_none())
    }

    /// Decode column `idx` with `factory`; NULL goes to `create_from_null`
    pub fn get<F: ValueFactory>(&self, idx: usize, factory: &F) -> Result<F::Output> {
        let Some(bytes) = self.raw(idx)? else {
            return factory.create_from_null();
        };
        let field: &Field = &self.columns.fields()[idx];
        match self.format {
            RowFormat::Text => decode_field(&TextDecoder, field, bytes, factory),
            RowFormat::Binary => decode_field(&BinaryDecoder, field, bytes, factory),
        }
    }

    pub fn get_by_name<F: ValueFactory>(&self, name: &str, factory: &F) -> Result<F::Output> {
        let idx = self
            .columns
            .index_of(name)
            .ok_or_else(|| Error::BadUsageError(format!("no column named '{name}'")))?;
        self.get(idx, factory)
    }

    /// Replace the bytes of one column, in the form the row's protocol uses.
    ///
    /// Only rows created for updatable result sets accept this.
    pub fn set_raw(&mut self, idx: usize, value: Option<Vec<u8>>) -> Result<()> {
        match &mut self.storage {
            RowStorage::ByteArray(values) => {
                let len = values.len();
                let slot = values.get_mut(idx).ok_or_else(|| out_of_bounds(idx, len))?;
                *slot = value;
                Ok(())
            }
            RowStorage::Buffer { .. } => Err(Error::BadUsageError(
                "buffered rows are read-only".to_string(),
            )),
        }
    }
}

fn out_of_bounds(idx: usize, len: usize) -> Error {
    Error::BadUsageError(format!("column index {idx} out of bounds for {len} columns"))
}

/// Chooses the row representation and unpacks row packets
#[derive(Debug, Clone)]
pub struct RowFactory {
    format: RowFormat,
    columns: ColumnDefinition,
    concurrency: ResultSetConcurrency,
    large_row_size_threshold: usize,
    has_large_fields: bool,
}

impl RowFactory {
    pub fn new(
        format: RowFormat,
        columns: ColumnDefinition,
        concurrency: ResultSetConcurrency,
        large_row_size_threshold: usize,
    ) -> Self {
        let has_large_fields = columns
            .fields()
            .iter()
            .any(|f| f.column_type.is_large());
        Self {
            format,
            columns,
            concurrency,
            large_row_size_threshold,
            has_large_fields,
        }
    }

    pub fn columns(&self) -> &ColumnDefinition {
        &self.columns
    }

    pub fn format(&self) -> RowFormat {
        self.format
    }

    /// Updatable results need per-column arrays; large rows keep the packet
    pub fn should_buffer(&self, payload_len: usize) -> bool {
        if self.concurrency == ResultSetConcurrency::Updatable {
            return false;
        }
        self.has_large_fields || payload_len >= self.large_row_size_threshold
    }

    pub fn create(&self, payload: &[u8]) -> Result<Row> {
        let offsets = match self.format {
            RowFormat::Text => self.text_offsets(payload)?,
            RowFormat::Binary => self.binary_offsets(payload)?,
        };
        let storage = if self.should_buffer(payload.len()) {
            RowStorage::Buffer {
                packet: payload.to_vec(),
                offsets,
            }
        } else {
            RowStorage::ByteArray(
                offsets
                    .into_iter()
                    .map(|range| range.map(|r| payload[r].to_vec()))
                    .collect(),
            )
        };
        Ok(Row {
            format: self.format,
            columns: self.columns.clone(),
            storage,
        })
    }

    fn text_offsets(&self, payload: &[u8]) -> Result<Vec<Option<Range<usize>>>> {
        let mut offsets = Vec::with_capacity(self.columns.len());
        let mut rest = payload;
        for _ in 0..self.columns.len() {
            let (value, tail) = read_string_lenenc_nullable(rest)?;
            offsets.push(value.map(|v| value_range(payload, v)));
            rest = tail;
        }
        Ok(offsets)
    }

    fn binary_offsets(&self, payload: &[u8]) -> Result<Vec<Option<Range<usize>>>> {
        let (header, data) = read_int_1(payload)?;
        if header != 0x00 {
            return Err(Error::InvalidPacket);
        }
        let count = self.columns.len();
        let (bitmap, mut rest) = read_string_fix(data, NullBitmap::byte_len(count, 2))?;
        let bitmap = NullBitmap::for_result_set(bitmap);

        let mut offsets = Vec::with_capacity(count);
        for (idx, field) in self.columns.fields().iter().enumerate() {
            if bitmap.is_null(idx) {
                offsets.push(None);
                continue;
            }
            let (value, tail) = match field.column_type.binary_width() {
                // NULL columns have no bytes even when the bit is clear
                Some(0) if field.column_type == ColumnType::MYSQL_TYPE_NULL => {
                    offsets.push(None);
                    continue;
                }
                Some(width) => read_string_fix(rest, width)?,
                // temporal values carry a one-byte length, which matches lenenc below 251
                None => read_string_lenenc(rest)?,
            };
            offsets.push(Some(value_range(payload, value)));
            rest = tail;
        }
        Ok(offsets)
    }
}

/// Position of `value`, a subslice of `payload`
fn value_range(payload: &[u8], value: &[u8]) -> Range<usize> {
    let start = value.as_ptr() as usize - payload.as_ptr() as usize;
    start..start + value.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnFlags;
    use crate::protocol::column::test_field;
    use crate::value::decode::{I64Factory, StringFactory};
    use crate::value::Value;
    use crate::value::decode::GenericValueFactory;

    fn long_columns(count: usize) -> ColumnDefinition {
        ColumnDefinition::from_fields(
            (0..count)
                .map(|_| test_field(ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty(), 45))
                .collect(),
        )
    }

    #[test]
    fn null_bitmap_sizes() {
        assert_eq!(NullBitmap::byte_len(6, 2), 1);
        assert_eq!(NullBitmap::byte_len(7, 2), 2);
        assert_eq!(NullBitmap::byte_len(8, 0), 1);
        assert_eq!(NullBitmap::byte_len(0, 0), 0);

        let mut out = Vec::new();
        write_null_bitmap(&mut out, [true, false, false, false, false, false, false, false, true].into_iter());
        assert_eq!(out, vec![0x01, 0x01]);
        let bitmap = NullBitmap::for_parameters(&out);
        assert!(bitmap.is_null(8));
        assert!(!bitmap.is_null(7));
        assert!(!bitmap.is_null(100));
    }

    #[test]
    fn binary_row_with_nulls_at_0_3_9() {
        let columns = long_columns(10);
        // bits 2, 5 and 11 of a 2-byte bitmap
        let mut payload = vec![0x00, 0b0010_0100, 0b0000_1000];
        let present = [1, 2, 4, 5, 6, 7, 8];
        for value in present {
            payload.extend_from_slice(&(value as i32 * 10).to_le_bytes());
        }
        let factory = RowFactory::new(RowFormat::Binary, columns, ResultSetConcurrency::ReadOnly, 2048);
        let row = factory.create(&payload).unwrap();

        for idx in 0..10 {
            let expected_null = matches!(idx, 0 | 3 | 9);
            assert_eq!(row.is_null(idx).unwrap(), expected_null, "column {idx}");
        }
        for value in present {
            assert_eq!(row.get(value, &I64Factory).unwrap(), value as i64 * 10);
        }
        assert_eq!(row.get(0, &GenericValueFactory).unwrap(), Value::Null);
    }

    #[test]
    fn binary_row_rejects_short_values() {
        let factory = RowFactory::new(RowFormat::Binary, long_columns(1), ResultSetConcurrency::ReadOnly, 2048);
        assert!(factory.create(&[0x00, 0x00, 0x01, 0x02]).is_err());
        assert!(factory.create(&[0x01, 0x00, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn binary_row_mixes_fixed_and_lenenc() {
        let columns = ColumnDefinition::from_fields(vec![
            test_field(ColumnType::MYSQL_TYPE_TINY, ColumnFlags::empty(), 45),
            test_field(ColumnType::MYSQL_TYPE_VAR_STRING, ColumnFlags::empty(), 45),
            test_field(ColumnType::MYSQL_TYPE_DATE, ColumnFlags::empty(), 63),
        ]);
        let payload = [
            0x00, 0x00, // header, bitmap
            0x07, // TINY
            0x02, b'h', b'i', // lenenc string
            0x04, 0xE8, 0x07, 0x02, 0x1D, // DATE 2024-02-29
        ];
        let factory = RowFactory::new(RowFormat::Binary, columns, ResultSetConcurrency::ReadOnly, 2048);
        let row = factory.create(&payload).unwrap();
        assert_eq!(row.get(0, &I64Factory).unwrap(), 7);
        assert_eq!(row.get(1, &StringFactory).unwrap(), "hi");
        assert_eq!(row.get(2, &StringFactory).unwrap(), "2024-02-29");
    }

    #[test]
    fn text_row_and_lookup_by_name() {
        let columns = ColumnDefinition::from_fields(vec![
            test_field(ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty(), 45),
            test_field(ColumnType::MYSQL_TYPE_VAR_STRING, ColumnFlags::empty(), 45),
        ]);
        let payload = [0x02, b'4', b'2', 0xFB];
        let factory = RowFactory::new(RowFormat::Text, columns, ResultSetConcurrency::ReadOnly, 2048);
        let row = factory.create(&payload).unwrap();
        assert_eq!(row.get_by_name("C", &I64Factory).unwrap(), 42);
        assert!(row.is_null(1).unwrap());
        assert!(row.raw(2).is_err());
    }

    #[test]
    fn buffering_policy() {
        let read_only = RowFactory::new(RowFormat::Text, long_columns(1), ResultSetConcurrency::ReadOnly, 4);
        assert!(!read_only.should_buffer(3));
        assert!(read_only.should_buffer(4));
        let row = read_only.create(&[0x03, b'1', b'2', b'3']).unwrap();
        assert!(row.is_buffered());

        let updatable = RowFactory::new(RowFormat::Text, long_columns(1), ResultSetConcurrency::Updatable, 4);
        assert!(!updatable.should_buffer(1 << 20));
        let mut row = updatable.create(&[0x03, b'1', b'2', b'3']).unwrap();
        row.set_raw(0, Some(b"9".to_vec())).unwrap();
        assert_eq!(row.get(0, &I64Factory).unwrap(), 9);

        let blob = ColumnDefinition::from_fields(vec![test_field(
            ColumnType::MYSQL_TYPE_BLOB,
            ColumnFlags::BLOB_FLAG,
            63,
        )]);
        let large = RowFactory::new(RowFormat::Text, blob, ResultSetConcurrency::ReadOnly, 2048);
        assert!(large.should_buffer(1));
        let mut row = large.create(&[0x01, 0xAA]).unwrap();
        assert!(row.set_raw(0, None).is_err());
    }
}
