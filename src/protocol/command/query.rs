use crate::charset::Charset;
use crate::constant::{CapabilityFlags, CommandByte};
use crate::error::Result;
use crate::protocol::primitive::*;
use crate::protocol::row::write_null_bitmap;
use crate::value::{BindValue, EncodeContext, EncoderRegistry};

/// Write COM_QUERY without query attributes
pub fn write_query(out: &mut Vec<u8>, sql: &str, charset: Charset, capabilities: CapabilityFlags) {
    write_int_1(out, CommandByte::Query as u8);
    if capabilities.contains(CapabilityFlags::CLIENT_QUERY_ATTRIBUTES) {
        // parameter_count = 0, parameter_set_count = 1
        write_int_lenenc(out, 0);
        write_int_lenenc(out, 1);
    }
    out.extend_from_slice(&charset.encode(sql));
}

/// Write COM_QUERY carrying `attributes`.
///
/// Attributes are dropped with a warning when the server did not negotiate
/// `CLIENT_QUERY_ATTRIBUTES`.
pub fn write_query_with_attributes(
    out: &mut Vec<u8>,
    sql: &str,
    attributes: &[BindValue],
    capabilities: CapabilityFlags,
    registry: &EncoderRegistry,
    ctx: &EncodeContext,
) -> Result<()> {
    if !capabilities.contains(CapabilityFlags::CLIENT_QUERY_ATTRIBUTES) {
        if !attributes.is_empty() {
            tracing::warn!(
                count = attributes.len(),
                "server does not support query attributes, dropping them"
            );
        }
        write_query(out, sql, ctx.charset, capabilities);
        return Ok(());
    }

    write_int_1(out, CommandByte::Query as u8);
    write_int_lenenc(out, attributes.len() as u64);
    write_int_lenenc(out, 1);
    if !attributes.is_empty() {
        write_null_bitmap(out, attributes.iter().map(BindValue::is_null));
        // new_params_bind_flag
        write_int_1(out, 0x01);
        for attribute in attributes {
            let (column_type, unsigned) = registry.query_attribute_type(attribute)?;
            write_int_1(out, column_type as u8);
            write_int_1(out, if unsigned { 0x80 } else { 0x00 });
            let name = attribute.name.as_deref().unwrap_or_default();
            write_bytes_lenenc(out, &ctx.charset.encode(name));
        }
        for attribute in attributes {
            registry.encode_as_query_attribute(attribute, ctx, out)?;
        }
    }
    out.extend_from_slice(&ctx.charset.encode(sql));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_query_without_attribute_support() {
        let mut out = Vec::new();
        write_query(&mut out, "SELECT 1", Charset::Utf8mb4, CapabilityFlags::empty());
        assert_eq!(out, b"\x03SELECT 1");
    }

    #[test]
    fn query_announces_empty_attribute_set() {
        let mut out = Vec::new();
        write_query_with_attributes(
            &mut out,
            "SELECT 1",
            &[],
            CapabilityFlags::CLIENT_QUERY_ATTRIBUTES,
            &EncoderRegistry::new(),
            &EncodeContext::default(),
        )
        .unwrap();
        assert_eq!(out, b"\x03\x00\x01SELECT 1");
    }

    #[test]
    fn query_with_attributes() {
        let attributes = [
            BindValue::new(7i32).named("trace"),
            BindValue::null().named("n"),
            BindValue::new("x").named("s"),
        ];
        let mut out = Vec::new();
        write_query_with_attributes(
            &mut out,
            "DO 1",
            &attributes,
            CapabilityFlags::CLIENT_QUERY_ATTRIBUTES,
            &EncoderRegistry::new(),
            &EncodeContext::default(),
        )
        .unwrap();

        let mut expected = vec![0x03, 0x03, 0x01, 0b0000_0010, 0x01];
        expected.extend_from_slice(&[0x03, 0x00, 0x05]);
        expected.extend_from_slice(b"trace");
        expected.extend_from_slice(&[0x06, 0x00, 0x01, b'n']);
        expected.extend_from_slice(&[0xFE, 0x00, 0x01, b's']);
        expected.extend_from_slice(&7i32.to_le_bytes());
        expected.extend_from_slice(&[0x01, b'x']);
        expected.extend_from_slice(b"DO 1");
        assert_eq!(out, expected);
    }

    #[test]
    fn attributes_dropped_without_capability() {
        let mut out = Vec::new();
        write_query_with_attributes(
            &mut out,
            "DO 1",
            &[BindValue::new(1i64).named("a")],
            CapabilityFlags::empty(),
            &EncoderRegistry::new(),
            &EncodeContext::default(),
        )
        .unwrap();
        assert_eq!(out, b"\x03DO 1");
    }
}
