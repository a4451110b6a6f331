use crate::constant::ColumnType;
use crate::error::Result;
use crate::protocol::primitive::write_bytes_lenenc;
use crate::value::SqlType;
use crate::value::bind::{BindSource, BindValue};
use crate::value::encode::escape::{quote_bytes, quote_string, write_hex_literal};
use crate::value::encode::number::{Number, number_binary, number_text};
use crate::value::encode::{EncodeContext, ValueEncoder};

/// Targets a string is parsed into a number for
fn is_numeric(target: SqlType) -> bool {
    target.is_integer()
        || matches!(
            target,
            SqlType::Boolean
                | SqlType::Bit
                | SqlType::Year
                | SqlType::Float
                | SqlType::Double
                | SqlType::Decimal
        )
}

/// `String` and `&str`
#[derive(Debug, Clone, Copy, Default)]
pub struct StringEncoder;

fn source_str(bind: &BindValue) -> Result<&str> {
    match &bind.source {
        BindSource::String(s) => Ok(s),
        _ => Err(bind.type_mismatch()),
    }
}

impl ValueEncoder for StringEncoder {
    fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
        let s = source_str(bind)?;
        if is_numeric(bind.target) {
            return number_text(Number::parse(s, bind.target)?, bind);
        }
        Ok(quote_string(&ctx.charset.encode(s), ctx))
    }

    fn encode_as_binary(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let s = source_str(bind)?;
        if is_numeric(bind.target) {
            return number_binary(Number::parse(s, bind.target)?, bind, out);
        }
        write_bytes_lenenc(out, &ctx.charset.encode(s));
        Ok(())
    }

    // the server converts string parameters to temporal and character columns itself
    fn binary_type(&self, bind: &BindValue) -> (ColumnType, bool) {
        if is_numeric(bind.target) {
            (bind.target.binary_param_type(), bind.target.is_unsigned())
        } else {
            (ColumnType::MYSQL_TYPE_STRING, false)
        }
    }
}

/// `Vec<u8>` and `&[u8]`
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesEncoder;

fn source_bytes(bind: &BindValue) -> Result<&[u8]> {
    match &bind.source {
        BindSource::Bytes(b) => Ok(b),
        _ => Err(bind.type_mismatch()),
    }
}

fn accepts_bytes(target: SqlType) -> bool {
    target.is_text() || target.is_binary() || matches!(target, SqlType::Bit | SqlType::Unknown)
}

impl ValueEncoder for BytesEncoder {
    fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
        let bytes = source_bytes(bind)?;
        if !accepts_bytes(bind.target) {
            return Err(bind.type_mismatch());
        }
        if bind.target == SqlType::Bit {
            let mut out = Vec::with_capacity(bytes.len() * 2 + 3);
            write_hex_literal(&mut out, bytes);
            return Ok(out);
        }
        Ok(quote_bytes(bytes, ctx))
    }

    fn encode_as_binary(
        &self,
        bind: &BindValue,
        _ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let bytes = source_bytes(bind)?;
        if !accepts_bytes(bind.target) {
            return Err(bind.type_mismatch());
        }
        write_bytes_lenenc(out, bytes);
        Ok(())
    }

    fn binary_type(&self, _bind: &BindValue) -> (ColumnType, bool) {
        (ColumnType::MYSQL_TYPE_BLOB, false)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;

    #[test]
    fn strings_are_escaped() {
        let ctx = EncodeContext::default();
        let bind = BindValue::new("O'Brien");
        assert_eq!(StringEncoder.encode_as_text(&bind, &ctx).unwrap(), b"'O\\'Brien'".to_vec());
    }

    #[test]
    fn strings_parse_into_numeric_targets() {
        let ctx = EncodeContext::default();
        let bind = BindValue::new(" 42 ").with_target(SqlType::Int);
        assert_eq!(StringEncoder.encode_as_text(&bind, &ctx).unwrap(), b"42".to_vec());
        assert_eq!(
            StringEncoder.binary_type(&bind),
            (ColumnType::MYSQL_TYPE_LONG, false)
        );
        let mut out = Vec::new();
        StringEncoder.encode_as_binary(&bind, &ctx, &mut out).unwrap();
        assert_eq!(out, 42u32.to_le_bytes().to_vec());

        let bind = BindValue::new("true").with_target(SqlType::Boolean);
        assert_eq!(StringEncoder.encode_as_text(&bind, &ctx).unwrap(), b"1".to_vec());

        let bind = BindValue::new("abc").with_target(SqlType::Int);
        assert!(matches!(
            StringEncoder.encode_as_text(&bind, &ctx).unwrap_err(),
            Error::DataConversion { .. }
        ));
    }

    #[test]
    fn strings_for_temporal_columns_are_sent_as_strings() {
        let bind = BindValue::new("2024-01-02").with_target(SqlType::Date);
        assert_eq!(
            StringEncoder.binary_type(&bind),
            (ColumnType::MYSQL_TYPE_STRING, false)
        );
        let mut out = Vec::new();
        StringEncoder
            .encode_as_binary(&bind, &EncodeContext::default(), &mut out)
            .unwrap();
        assert_eq!(out[0], 10);
        assert_eq!(&out[1..], b"2024-01-02");
    }

    #[test]
    fn bytes_into_bit_use_hex() {
        let bind = BindValue::new(vec![0x01u8, 0xFF]).with_target(SqlType::Bit);
        assert_eq!(
            BytesEncoder.encode_as_text(&bind, &EncodeContext::default()).unwrap(),
            b"x'01FF'".to_vec()
        );
        let bind = BindValue::new(vec![1u8]).with_target(SqlType::Date);
        assert!(matches!(
            BytesEncoder.encode_as_text(&bind, &EncodeContext::default()).unwrap_err(),
            Error::TypeMismatch { .. }
        ));
    }
}
