use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::charset::Charset;
use crate::constant::{CapabilityFlags, CommandByte, CursorType};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::response::ErrPayloadBytes;
use crate::protocol::row::write_null_bitmap;
use crate::value::{BindValue, EncodeContext, EncoderRegistry};

/// Prepared statement OK response (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Write COM_STMT_PREPARE command
pub fn write_prepare(out: &mut Vec<u8>, sql: &str, charset: Charset) {
    write_int_1(out, CommandByte::StmtPrepare as u8);
    out.extend_from_slice(&charset.encode(sql));
}

/// Read COM_STMT_PREPARE response.
///
/// Parameter definitions, then column definitions follow, each group closed
/// by an EOF packet unless `CLIENT_DEPRECATE_EOF` was negotiated.
pub fn read_prepare_ok(payload: &[u8]) -> Result<&PrepareOk> {
    let (status, data) = read_int_1(payload)?;
    match status {
        0x00 => {}
        0xFF => return Err(ErrPayloadBytes(payload).into()),
        _ => return Err(Error::InvalidPacket),
    }
    let (fixed, _metadata_follows) = read_string_fix(data, 11)?;
    PrepareOk::ref_from_bytes(fixed).map_err(|_| Error::InvalidPacket)
}

/// Write COM_STMT_EXECUTE.
///
/// Types are always bound. Stream parameters are announced with their type
/// but their bytes travel in COM_STMT_SEND_LONG_DATA beforehand.
pub fn write_execute(
    out: &mut Vec<u8>,
    statement_id: u32,
    cursor: CursorType,
    params: &[BindValue],
    capabilities: CapabilityFlags,
    registry: &EncoderRegistry,
    ctx: &EncodeContext,
) -> Result<()> {
    let query_attributes = capabilities.contains(CapabilityFlags::CLIENT_QUERY_ATTRIBUTES);

    write_int_1(out, CommandByte::StmtExecute as u8);
    write_int_4(out, statement_id);
    write_int_1(out, cursor as u8);
    // iteration count
    write_int_4(out, 1);

    if params.is_empty() {
        return Ok(());
    }
    if query_attributes {
        write_int_lenenc(out, params.len() as u64);
    }
    write_null_bitmap(out, params.iter().map(BindValue::is_null));
    // new_params_bind_flag
    write_int_1(out, 0x01);
    for param in params {
        let (column_type, unsigned) = registry.binary_type(param)?;
        write_int_1(out, column_type as u8);
        write_int_1(out, if unsigned { 0x80 } else { 0x00 });
        if query_attributes {
            let name = param.name.as_deref().unwrap_or_default();
            write_bytes_lenenc(out, &ctx.charset.encode(name));
        }
    }
    for param in params.iter().filter(|p| !p.is_null() && !p.is_stream()) {
        registry.encode_as_binary(param, ctx, out)?;
    }
    Ok(())
}

/// Header of COM_STMT_SEND_LONG_DATA; the chunk follows as the rest of the payload
pub fn write_send_long_data(out: &mut Vec<u8>, statement_id: u32, param_index: u16, chunk: &[u8]) {
    write_int_1(out, CommandByte::StmtSendLongData as u8);
    write_int_4(out, statement_id);
    write_int_2(out, param_index);
    out.extend_from_slice(chunk);
}

/// Write COM_STMT_FETCH command
pub fn write_fetch(out: &mut Vec<u8>, statement_id: u32, num_rows: u32) {
    write_int_1(out, CommandByte::StmtFetch as u8);
    write_int_4(out, statement_id);
    write_int_4(out, num_rows);
}

/// Write COM_STMT_CLOSE command; the server sends no response
pub fn write_close_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtClose as u8);
    write_int_4(out, statement_id);
}

/// Write COM_STMT_RESET command
pub fn write_reset_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtReset as u8);
    write_int_4(out, statement_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{SqlType, StreamSource};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn prepare_ok() {
        let payload = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x05, 0x00];
        let ok = read_prepare_ok(&payload).unwrap();
        assert_eq!(ok.statement_id(), 1);
        assert_eq!(ok.num_columns(), 2);
        assert_eq!(ok.num_params(), 3);
        assert_eq!(ok.warning_count(), 5);
        assert!(read_prepare_ok(&payload[..6]).is_err());
        assert!(matches!(
            read_prepare_ok(b"\xff\x28\x04#42000syntax"),
            Err(Error::ServerError(_))
        ));
    }

    #[test]
    fn execute_without_params() {
        let mut out = Vec::new();
        write_execute(
            &mut out,
            9,
            CursorType::ReadOnly,
            &[],
            CapabilityFlags::empty(),
            &EncoderRegistry::new(),
            &EncodeContext::default(),
        )
        .unwrap();
        assert_eq!(out, [0x17, 9, 0, 0, 0, 0x01, 1, 0, 0, 0]);
    }

    #[test]
    fn execute_binds_types_and_skips_null_and_stream_values() {
        let stream = StreamSource::new(Cursor::new(b"long".to_vec()));
        let params = [
            BindValue::new(300u16),
            BindValue::null(),
            BindValue::byte_stream(stream),
            BindValue::new(-1i8).with_target(SqlType::BigInt),
        ];
        let mut out = Vec::new();
        write_execute(
            &mut out,
            1,
            CursorType::NoCursor,
            &params,
            CapabilityFlags::empty(),
            &EncoderRegistry::new(),
            &EncodeContext::default(),
        )
        .unwrap();
        let mut expected = vec![0x17, 1, 0, 0, 0, 0x00, 1, 0, 0, 0];
        expected.push(0b0000_0010);
        expected.push(0x01);
        expected.extend_from_slice(&[0x02, 0x80, 0x06, 0x00, 0xFC, 0x00, 0x08, 0x00]);
        expected.extend_from_slice(&300u16.to_le_bytes());
        expected.extend_from_slice(&(-1i64).to_le_bytes());
        assert_eq!(out, expected);
    }

    #[test]
    fn execute_with_query_attributes_names_params() {
        let params = [BindValue::new(true).named("flag")];
        let mut out = Vec::new();
        write_execute(
            &mut out,
            2,
            CursorType::NoCursor,
            &params,
            CapabilityFlags::CLIENT_QUERY_ATTRIBUTES,
            &EncoderRegistry::new(),
            &EncodeContext::default(),
        )
        .unwrap();
        let mut expected = vec![0x17, 2, 0, 0, 0, 0x00, 1, 0, 0, 0, 0x01, 0x00, 0x01, 0x01, 0x00, 0x04];
        expected.extend_from_slice(b"flag");
        expected.push(0x01);
        assert_eq!(out, expected);
    }

    #[test]
    fn small_commands() {
        let mut out = Vec::new();
        write_send_long_data(&mut out, 3, 1, b"abc");
        assert_eq!(out, [0x18, 3, 0, 0, 0, 1, 0, b'a', b'b', b'c']);

        out.clear();
        write_fetch(&mut out, 3, 100);
        assert_eq!(out, [0x1C, 3, 0, 0, 0, 100, 0, 0, 0]);

        out.clear();
        write_close_statement(&mut out, 3);
        assert_eq!(out, [0x19, 3, 0, 0, 0]);

        out.clear();
        write_reset_statement(&mut out, 3);
        assert_eq!(out, [0x1A, 3, 0, 0, 0]);
    }
}
