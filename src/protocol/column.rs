//! Column definition packets.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::charset::Charset;
use crate::constant::{ColumnFlags, ColumnType};
use crate::error::{Error, Result, eyre};
use crate::protocol::primitive::*;
use crate::value::SqlType;

/// Fixed-size tail of Column Definition packet (12 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct ColumnDefinitionTail {
    collation: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

impl ColumnDefinitionTail {
    pub fn collation(&self) -> u16 {
        self.collation.get()
    }

    pub fn column_length(&self) -> u32 {
        self.column_length.get()
    }

    pub fn column_type(&self) -> Result<ColumnType> {
        ColumnType::from_u8(self.column_type).ok_or_else(|| {
            Error::LibraryBug(eyre!("unknown column type: 0x{:02X}", self.column_type))
        })
    }

    /// Unknown bits from newer servers are dropped
    pub fn flags(&self) -> ColumnFlags {
        ColumnFlags::from_bits_truncate(self.flags.get())
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }
}

/// Metadata text kept as raw bytes until first read.
///
/// The bytes are a range of the shared column definition buffer, so all
/// fields of one result set keep that buffer alive, not any row.
pub struct LazyString {
    buf: Arc<[u8]>,
    range: Range<usize>,
    charset: Charset,
    decoded: OnceLock<String>,
}

impl LazyString {
    pub fn new(buf: Arc<[u8]>, range: Range<usize>, charset: Charset) -> Self {
        Self {
            buf,
            range,
            charset,
            decoded: OnceLock::new(),
        }
    }

    pub fn from_string(s: &str) -> Self {
        let buf: Arc<[u8]> = Arc::from(s.as_bytes());
        let range = 0..buf.len();
        Self::new(buf, range, Charset::Utf8mb4)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.range.clone()]
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }

    /// Decoded once and cached; undecodable bytes are replaced
    pub fn as_str(&self) -> &str {
        self.decoded.get_or_init(|| {
            let bytes = self.as_bytes();
            match self.charset.decode(bytes) {
                Ok(s) => s.into_owned(),
                Err(_) => String::from_utf8_lossy(bytes).into_owned(),
            }
        })
    }
}

impl Clone for LazyString {
    fn clone(&self) -> Self {
        Self {
            buf: Arc::clone(&self.buf),
            range: self.range.clone(),
            charset: self.charset,
            decoded: self.decoded.clone(),
        }
    }
}

impl fmt::Debug for LazyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl PartialEq<str> for LazyString {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for LazyString {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// One column of a result set or a statement parameter
#[derive(Debug, Clone)]
pub struct Field {
    pub schema: LazyString,
    pub table: LazyString,
    pub org_table: LazyString,
    pub name: LazyString,
    pub org_name: LazyString,
    pub collation: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
    pub sql_type: SqlType,
}

impl Field {
    /// Parse the column definition at `range` of `buf`
    pub fn parse(buf: &Arc<[u8]>, range: Range<usize>, charset: Charset) -> Result<Self> {
        let packet = &buf[range.clone()];
        let mut pos = 0usize;
        let mut next = || -> Result<LazyString> {
            let (bytes, rest) = read_string_lenenc(&packet[pos..])?;
            let end = packet.len() - rest.len();
            let start = end - bytes.len();
            pos = end;
            Ok(LazyString::new(
                Arc::clone(buf),
                range.start + start..range.start + end,
                charset,
            ))
        };
        let _catalog = next()?;
        let schema = next()?;
        let table = next()?;
        let org_table = next()?;
        let name = next()?;
        let org_name = next()?;

        // length of the fixed fields, always 0x0c
        let (_length, rest) = read_int_lenenc(&packet[pos..])?;
        let (tail_bytes, _) = read_string_fix(rest, 12)?;
        let tail = ColumnDefinitionTail::ref_from_bytes(tail_bytes)
            .map_err(|_| Error::LibraryBug(eyre!("column definition tail is not 12 bytes")))?;

        let column_type = tail.column_type()?;
        let flags = tail.flags();
        let collation = tail.collation();
        let column_length = tail.column_length();
        Ok(Self {
            schema,
            table,
            org_table,
            name,
            org_name,
            collation,
            column_length,
            column_type,
            flags,
            decimals: tail.decimals(),
            sql_type: SqlType::from_column(column_type, flags, column_length, collation),
        })
    }

    pub fn charset(&self) -> Charset {
        Charset::from_collation(self.collation).unwrap_or_default()
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED_FLAG)
    }

    pub fn is_binary(&self) -> bool {
        self.charset() == Charset::Binary
    }

    pub fn is_nullable(&self) -> bool {
        !self.flags.contains(ColumnFlags::NOT_NULL_FLAG)
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

/// Column definitions of one result set, sharing a single buffer
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    fields: Arc<[Arc<Field>]>,
}

impl ColumnDefinition {
    /// Build from the column definition packets in order
    pub fn parse<P: AsRef<[u8]>>(packets: &[P], charset: Charset) -> Result<Self> {
        let total = packets.iter().map(|p| p.as_ref().len()).sum();
        let mut concatenated = Vec::with_capacity(total);
        let mut ranges = Vec::with_capacity(packets.len());
        for packet in packets {
            let start = concatenated.len();
            concatenated.extend_from_slice(packet.as_ref());
            ranges.push(start..concatenated.len());
        }
        let buf: Arc<[u8]> = Arc::from(concatenated);
        let fields = ranges
            .into_iter()
            .map(|range| Field::parse(&buf, range, charset).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            fields: fields.into(),
        })
    }

    pub fn from_fields(fields: Vec<Field>) -> Self {
        Self {
            fields: fields.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Index of the first column named `name`, ignoring ASCII case
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Copy flags from the prepare-time definition into this execute-time one.
    ///
    /// The column counts must agree; a mismatch means the statement and its
    /// cached metadata describe different result shapes.
    pub fn merge_flags_from(&mut self, cached: &ColumnDefinition) -> Result<()> {
        if cached.len() != self.len() {
            return Err(Error::MetadataMismatch {
                expected: cached.len(),
                actual: self.len(),
            });
        }
        let merged: Vec<Arc<Field>> = self
            .fields
            .iter()
            .zip(cached.fields.iter())
            .map(|(fresh, old)| {
                let mut field = Field::clone(fresh);
                field.flags |= old.flags;
                field.sql_type = SqlType::from_column(
                    field.column_type,
                    field.flags,
                    field.column_length,
                    field.collation,
                );
                Arc::new(field)
            })
            .collect();
        self.fields = merged.into();
        Ok(())
    }
}

/// Column definition packet for tests
#[cfg(test)]
pub(crate) fn column_packet(
    name: &str,
    column_type: ColumnType,
    flags: ColumnFlags,
    collation: u16,
) -> Vec<u8> {
    let mut out = Vec::new();
    for part in ["def", "shop", "items", "items", name, name] {
        write_bytes_lenenc(&mut out, part.as_bytes());
    }
    write_int_lenenc(&mut out, 0x0c);
    write_int_2(&mut out, collation);
    write_int_4(&mut out, 255);
    write_int_1(&mut out, column_type as u8);
    write_int_2(&mut out, flags.bits());
    write_int_1(&mut out, 0);
    write_int_2(&mut out, 0);
    out
}

/// Single field for tests
#[cfg(test)]
pub(crate) fn test_field(column_type: ColumnType, flags: ColumnFlags, collation: u16) -> Field {
    let packet = column_packet("c", column_type, flags, collation);
    let buf: Arc<[u8]> = Arc::from(packet);
    let range = 0..buf.len();
    Field::parse(&buf, range, Charset::Utf8mb4).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_is_twelve_bytes() {
        assert_eq!(std::mem::size_of::<ColumnDefinitionTail>(), 12);
    }

    #[test]
    fn parses_and_decodes_lazily() {
        let packets = vec![
            column_packet("id", ColumnType::MYSQL_TYPE_LONGLONG, ColumnFlags::UNSIGNED_FLAG, 45),
            column_packet("näme", ColumnType::MYSQL_TYPE_VAR_STRING, ColumnFlags::empty(), 45),
        ];
        let columns = ColumnDefinition::parse(&packets, Charset::Utf8mb4).unwrap();
        assert_eq!(columns.len(), 2);
        let name = &columns.fields()[1].name;
        assert!(!name.is_decoded());
        assert_eq!(name.as_str(), "näme");
        assert!(name.is_decoded());
        assert_eq!(columns.fields()[0].sql_type, SqlType::BigIntUnsigned);
        assert_eq!(columns.fields()[0].table, "items");
        assert_eq!(columns.index_of("ID"), Some(0));
    }

    #[test]
    fn merge_copies_flags_by_position() {
        let prepared = ColumnDefinition::parse(
            &[column_packet("n", ColumnType::MYSQL_TYPE_LONG, ColumnFlags::UNSIGNED_FLAG, 45)],
            Charset::Utf8mb4,
        )
        .unwrap();
        let mut executed = ColumnDefinition::parse(
            &[column_packet("n", ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty(), 45)],
            Charset::Utf8mb4,
        )
        .unwrap();
        executed.merge_flags_from(&prepared).unwrap();
        assert!(executed.fields()[0].is_unsigned());
        assert_eq!(executed.fields()[0].sql_type, SqlType::IntUnsigned);
    }

    #[test]
    fn merge_rejects_count_mismatch() {
        let one = ColumnDefinition::parse(
            &[column_packet("a", ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty(), 45)],
            Charset::Utf8mb4,
        )
        .unwrap();
        let mut two = ColumnDefinition::parse(
            &[
                column_packet("a", ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty(), 45),
                column_packet("b", ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty(), 45),
            ],
            Charset::Utf8mb4,
        )
        .unwrap();
        let err = two.merge_flags_from(&one).unwrap_err();
        assert!(matches!(err, Error::MetadataMismatch { expected: 1, actual: 2 }));
        assert!(err.is_fatal());
    }
}
