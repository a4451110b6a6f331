use std::fmt;

use crate::constant::{ColumnFlags, ColumnType};

const BINARY_COLLATION: u16 = 63;

/// Logical SQL type of a column or parameter.
///
/// Encoders dispatch on this, not on the Rust type of the bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bit,
    Boolean,
    TinyInt,
    TinyIntUnsigned,
    SmallInt,
    SmallIntUnsigned,
    MediumInt,
    MediumIntUnsigned,
    Int,
    IntUnsigned,
    BigInt,
    BigIntUnsigned,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    DateTime,
    Timestamp,
    Year,
    Char,
    VarChar,
    TinyText,
    Text,
    MediumText,
    LongText,
    Enum,
    Set,
    Json,
    Binary,
    VarBinary,
    TinyBlob,
    Blob,
    MediumBlob,
    LongBlob,
    Geometry,
    Vector,
    Null,
    Unknown,
}

impl SqlType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Bit => "BIT",
            Self::Boolean => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::TinyIntUnsigned => "TINYINT UNSIGNED",
            Self::SmallInt => "SMALLINT",
            Self::SmallIntUnsigned => "SMALLINT UNSIGNED",
            Self::MediumInt => "MEDIUMINT",
            Self::MediumIntUnsigned => "MEDIUMINT UNSIGNED",
            Self::Int => "INT",
            Self::IntUnsigned => "INT UNSIGNED",
            Self::BigInt => "BIGINT",
            Self::BigIntUnsigned => "BIGINT UNSIGNED",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::DateTime => "DATETIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Year => "YEAR",
            Self::Char => "CHAR",
            Self::VarChar => "VARCHAR",
            Self::TinyText => "TINYTEXT",
            Self::Text => "TEXT",
            Self::MediumText => "MEDIUMTEXT",
            Self::LongText => "LONGTEXT",
            Self::Enum => "ENUM",
            Self::Set => "SET",
            Self::Json => "JSON",
            Self::Binary => "BINARY",
            Self::VarBinary => "VARBINARY",
            Self::TinyBlob => "TINYBLOB",
            Self::Blob => "BLOB",
            Self::MediumBlob => "MEDIUMBLOB",
            Self::LongBlob => "LONGBLOB",
            Self::Geometry => "GEOMETRY",
            Self::Vector => "VECTOR",
            Self::Null => "NULL",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Self::TinyIntUnsigned
                | Self::SmallIntUnsigned
                | Self::MediumIntUnsigned
                | Self::IntUnsigned
                | Self::BigIntUnsigned
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::TinyInt
                | Self::TinyIntUnsigned
                | Self::SmallInt
                | Self::SmallIntUnsigned
                | Self::MediumInt
                | Self::MediumIntUnsigned
                | Self::Int
                | Self::IntUnsigned
                | Self::BigInt
                | Self::BigIntUnsigned
        )
    }

    /// Character columns that take a quoted string literal
    pub fn is_text(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::VarChar
                | Self::TinyText
                | Self::Text
                | Self::MediumText
                | Self::LongText
                | Self::Enum
                | Self::Set
                | Self::Json
        )
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Self::Binary
                | Self::VarBinary
                | Self::TinyBlob
                | Self::Blob
                | Self::MediumBlob
                | Self::LongBlob
                | Self::Geometry
                | Self::Vector
        )
    }

    /// Inclusive integer range of the type, `None` for non-integers
    pub fn integer_range(self) -> Option<(i128, i128)> {
        let range: (i128, i128) = match self {
            Self::TinyInt => (i8::MIN.into(), i8::MAX.into()),
            Self::TinyIntUnsigned => (0, u8::MAX.into()),
            Self::SmallInt => (i16::MIN.into(), i16::MAX.into()),
            Self::SmallIntUnsigned => (0, u16::MAX.into()),
            Self::MediumInt => (-(1 << 23), (1 << 23) - 1),
            Self::MediumIntUnsigned => (0, (1 << 24) - 1),
            Self::Int => (i32::MIN.into(), i32::MAX.into()),
            Self::IntUnsigned => (0, u32::MAX.into()),
            Self::BigInt => (i64::MIN.into(), i64::MAX.into()),
            Self::BigIntUnsigned => (0, u64::MAX.into()),
            _ => return None,
        };
        Some(range)
    }

    /// Type announced for a parameter of this type in COM_STMT_EXECUTE
    pub fn binary_param_type(self) -> ColumnType {
        match self {
            Self::Boolean | Self::TinyInt | Self::TinyIntUnsigned => ColumnType::MYSQL_TYPE_TINY,
            Self::SmallInt | Self::SmallIntUnsigned | Self::Year => ColumnType::MYSQL_TYPE_SHORT,
            Self::MediumInt | Self::MediumIntUnsigned | Self::Int | Self::IntUnsigned => {
                ColumnType::MYSQL_TYPE_LONG
            }
            // BIT(64) patterns are sent as a full 8-byte integer
            Self::Bit | Self::BigInt | Self::BigIntUnsigned => ColumnType::MYSQL_TYPE_LONGLONG,
            Self::Float => ColumnType::MYSQL_TYPE_FLOAT,
            Self::Double => ColumnType::MYSQL_TYPE_DOUBLE,
            Self::Decimal => ColumnType::MYSQL_TYPE_NEWDECIMAL,
            Self::Date => ColumnType::MYSQL_TYPE_DATE,
            Self::Time => ColumnType::MYSQL_TYPE_TIME,
            Self::DateTime => ColumnType::MYSQL_TYPE_DATETIME,
            Self::Timestamp => ColumnType::MYSQL_TYPE_TIMESTAMP,
            Self::Char
            | Self::VarChar
            | Self::TinyText
            | Self::Text
            | Self::MediumText
            | Self::LongText
            | Self::Enum
            | Self::Set
            | Self::Json
            | Self::Unknown => ColumnType::MYSQL_TYPE_STRING,
            Self::Binary
            | Self::VarBinary
            | Self::TinyBlob
            | Self::Blob
            | Self::MediumBlob
            | Self::LongBlob
            | Self::Geometry
            | Self::Vector => ColumnType::MYSQL_TYPE_BLOB,
            Self::Null => ColumnType::MYSQL_TYPE_NULL,
        }
    }

    /// Resolve the logical type of a result column from its metadata
    pub fn from_column(
        column_type: ColumnType,
        flags: ColumnFlags,
        column_length: u32,
        collation: u16,
    ) -> Self {
        let unsigned = flags.contains(ColumnFlags::UNSIGNED_FLAG);
        let binary = collation == BINARY_COLLATION;
        let pick = |signed: Self, unsigned_type: Self| if unsigned { unsigned_type } else { signed };
        match column_type {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => Self::Decimal,
            ColumnType::MYSQL_TYPE_TINY => pick(Self::TinyInt, Self::TinyIntUnsigned),
            ColumnType::MYSQL_TYPE_SHORT => pick(Self::SmallInt, Self::SmallIntUnsigned),
            ColumnType::MYSQL_TYPE_INT24 => pick(Self::MediumInt, Self::MediumIntUnsigned),
            ColumnType::MYSQL_TYPE_LONG => pick(Self::Int, Self::IntUnsigned),
            ColumnType::MYSQL_TYPE_LONGLONG => pick(Self::BigInt, Self::BigIntUnsigned),
            ColumnType::MYSQL_TYPE_FLOAT => Self::Float,
            ColumnType::MYSQL_TYPE_DOUBLE => Self::Double,
            ColumnType::MYSQL_TYPE_NULL => Self::Null,
            ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
                Self::Timestamp
            }
            ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => Self::Date,
            ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => Self::Time,
            ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => Self::DateTime,
            ColumnType::MYSQL_TYPE_YEAR => Self::Year,
            ColumnType::MYSQL_TYPE_BIT => Self::Bit,
            ColumnType::MYSQL_TYPE_JSON => Self::Json,
            ColumnType::MYSQL_TYPE_ENUM => Self::Enum,
            ColumnType::MYSQL_TYPE_SET => Self::Set,
            ColumnType::MYSQL_TYPE_GEOMETRY => Self::Geometry,
            ColumnType::MYSQL_TYPE_VECTOR => Self::Vector,
            ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => {
                if flags.contains(ColumnFlags::ENUM_FLAG) {
                    Self::Enum
                } else if flags.contains(ColumnFlags::SET_FLAG) {
                    Self::Set
                } else if binary {
                    Self::VarBinary
                } else {
                    Self::VarChar
                }
            }
            ColumnType::MYSQL_TYPE_STRING => {
                if flags.contains(ColumnFlags::ENUM_FLAG) {
                    Self::Enum
                } else if flags.contains(ColumnFlags::SET_FLAG) {
                    Self::Set
                } else if binary {
                    Self::Binary
                } else {
                    Self::Char
                }
            }
            ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB => blob_by_length(column_length, binary),
            ColumnType::MYSQL_TYPE_TYPED_ARRAY => Self::Unknown,
        }
    }
}

// the server reports every blob flavour as MYSQL_TYPE_BLOB with a byte length
fn blob_by_length(length: u32, binary: bool) -> SqlType {
    match (length, binary) {
        (0..=255, true) => SqlType::TinyBlob,
        (0..=255, false) => SqlType::TinyText,
        (256..=65_535, true) => SqlType::Blob,
        (256..=65_535, false) => SqlType::Text,
        (65_536..=16_777_215, true) => SqlType::MediumBlob,
        (65_536..=16_777_215, false) => SqlType::MediumText,
        (_, true) => SqlType::LongBlob,
        (_, false) => SqlType::LongText,
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
