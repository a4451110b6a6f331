use crate::constant::ColumnType;
use crate::error::Result;
use crate::protocol::primitive::write_bytes_lenenc;
use crate::value::SqlType;
use crate::value::bind::{BindSource, BindValue, StreamSource};
use crate::value::encode::escape::{quote_bytes, quote_string};
use crate::value::encode::{EncodeContext, ValueEncoder};

/// Refuse a stream bound to a column it cannot fill.
///
/// Byte streams go to binary, blob or character columns, character streams
/// only to character columns. Other bind sources pass.
pub(crate) fn check_stream_target(bind: &BindValue) -> Result<()> {
    let accepted = match bind.source {
        BindSource::ByteStream(_) => bind.target.is_text() || bind.target.is_binary(),
        BindSource::CharStream(_) => bind.target.is_text(),
        _ => return Ok(()),
    };
    if accepted || bind.target == SqlType::Unknown {
        Ok(())
    } else {
        Err(bind.type_mismatch())
    }
}

fn stream_of<'a>(bind: &'a BindValue, want_chars: bool) -> Result<&'a StreamSource> {
    let stream = match (&bind.source, want_chars) {
        (BindSource::ByteStream(s), false) | (BindSource::CharStream(s), true) => s,
        _ => return Err(bind.type_mismatch()),
    };
    check_stream_target(bind)?;
    Ok(stream)
}

/// Seekable byte source for BLOB columns.
///
/// Prepared statements normally ship it with COM_STMT_SEND_LONG_DATA; the
/// binary form here is used for query attributes and inline execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteStreamEncoder;

impl ValueEncoder for ByteStreamEncoder {
    fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
        let stream = stream_of(bind, false)?;
        let bytes = stream.read_bytes(ctx.stream_limit(bind, stream.declared_length()))?;
        Ok(quote_bytes(&bytes, ctx))
    }

    fn encode_as_binary(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let stream = stream_of(bind, false)?;
        let bytes = stream.read_bytes(ctx.stream_limit(bind, stream.declared_length()))?;
        write_bytes_lenenc(out, &bytes);
        Ok(())
    }

    fn binary_type(&self, _bind: &BindValue) -> (ColumnType, bool) {
        (ColumnType::MYSQL_TYPE_BLOB, false)
    }
}

/// Seekable UTF-8 source for TEXT columns; the length limit counts characters
#[derive(Debug, Clone, Copy, Default)]
pub struct CharStreamEncoder;

impl ValueEncoder for CharStreamEncoder {
    fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
        let stream = stream_of(bind, true)?;
        let text = stream.read_chars(ctx.stream_limit(bind, stream.declared_length()))?;
        Ok(quote_string(&ctx.charset.encode(&text), ctx))
    }

    fn encode_as_binary(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let stream = stream_of(bind, true)?;
        let text = stream.read_chars(ctx.stream_limit(bind, stream.declared_length()))?;
        write_bytes_lenenc(out, &ctx.charset.encode(&text));
        Ok(())
    }

    fn binary_type(&self, _bind: &BindValue) -> (ColumnType, bool) {
        (ColumnType::MYSQL_TYPE_STRING, false)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;

    #[test]
    fn renders_twice_with_the_same_result() {
        let stream = StreamSource::new(Cursor::new(b"it's".to_vec()));
        let bind = BindValue::char_stream(stream);
        let ctx = EncodeContext::default();
        let first = CharStreamEncoder.encode_as_text(&bind, &ctx).unwrap();
        let second = CharStreamEncoder.encode_as_text(&bind, &ctx).unwrap();
        assert_eq!(first, b"'it\\'s'".to_vec());
        assert_eq!(first, second);
    }

    #[test]
    fn streams_refuse_non_character_targets() {
        let ctx = EncodeContext::default();
        let bytes = BindValue::byte_stream(StreamSource::new(Cursor::new(b"abc".to_vec())))
            .with_target(SqlType::Int);
        assert!(matches!(
            ByteStreamEncoder.encode_as_text(&bytes, &ctx),
            Err(Error::TypeMismatch { target: SqlType::Int, .. })
        ));

        let chars = BindValue::char_stream(StreamSource::new(Cursor::new(b"abc".to_vec())))
            .with_target(SqlType::Date);
        let mut out = Vec::new();
        assert!(matches!(
            CharStreamEncoder.encode_as_binary(&chars, &ctx, &mut out),
            Err(Error::TypeMismatch { target: SqlType::Date, .. })
        ));
        assert!(out.is_empty());

        let chars = BindValue::char_stream(StreamSource::new(Cursor::new(b"abc".to_vec())))
            .with_target(SqlType::LongBlob);
        assert!(CharStreamEncoder.encode_as_text(&chars, &ctx).is_err());

        let bytes = BindValue::byte_stream(StreamSource::new(Cursor::new(b"abc".to_vec())))
            .with_target(SqlType::LongText);
        ByteStreamEncoder.encode_as_binary(&bytes, &ctx, &mut out).unwrap();
        assert_eq!(out, vec![3, b'a', b'b', b'c']);
    }

    #[test]
    fn declared_length_limits_the_read() {
        let stream = StreamSource::new(Cursor::new(vec![7u8; 10])).with_length(3);
        let bind = BindValue::byte_stream(stream);
        let mut out = Vec::new();
        ByteStreamEncoder
            .encode_as_binary(&bind, &EncodeContext::default(), &mut out)
            .unwrap();
        assert_eq!(out, vec![3, 7, 7, 7]);

        let ctx = EncodeContext {
            use_stream_lengths: false,
            ..EncodeContext::default()
        };
        out.clear();
        ByteStreamEncoder.encode_as_binary(&bind, &ctx, &mut out).unwrap();
        assert_eq!(out.len(), 11);
    }
}
