//! Slice-level readers and `Vec<u8>` writers for the protocol's basic data types.
//!
//! Readers return the decoded value and the remaining input.

use crate::error::{Error, Result};
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE, U64 as U64LE};

/// Length-encoded integer prefix that marks a NULL value
pub const LENENC_NULL: u8 = 0xFB;
/// Length-encoded integer prefix that is reserved for ERR packets
pub const LENENC_ERROR: u8 = 0xFF;

pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&first, rest)) => Ok((first, rest)),
        None => Err(Error::UnexpectedEof),
    }
}

pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    let (value, rest) = U16LE::read_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok((value.get(), rest))
}

pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    let (bytes, rest) = read_string_fix(data, 3)?;
    Ok((u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]), rest))
}

pub fn read_int_4(data: &[u8]) -> Result<(u32, &[u8])> {
    let (value, rest) = U32LE::read_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok((value.get(), rest))
}

pub fn read_int_6(data: &[u8]) -> Result<(u64, &[u8])> {
    let (bytes, rest) = read_string_fix(data, 6)?;
    let mut buf = [0u8; 8];
    buf[..6].copy_from_slice(bytes);
    Ok((u64::from_le_bytes(buf), rest))
}

pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    let (value, rest) = U64LE::read_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok((value.get(), rest))
}

/// Read a length-encoded integer, where 0xFB yields `None`
///
/// 0xFF is the ERR packet marker and never a valid prefix.
pub fn read_int_lenenc_nullable(data: &[u8]) -> Result<(Option<u64>, &[u8])> {
    let (prefix, rest) = read_int_1(data)?;
    match prefix {
        LENENC_NULL => Ok((None, rest)),
        0xFC => {
            let (val, rest) = read_int_2(rest)?;
            Ok((Some(u64::from(val)), rest))
        }
        0xFD => {
            let (val, rest) = read_int_3(rest)?;
            Ok((Some(u64::from(val)), rest))
        }
        0xFE => {
            let (val, rest) = read_int_8(rest)?;
            Ok((Some(val), rest))
        }
        LENENC_ERROR => Err(Error::InvalidPacket),
        val => Ok((Some(u64::from(val)), rest)),
    }
}

/// Read a length-encoded integer that must not be NULL
pub fn read_int_lenenc(data: &[u8]) -> Result<(u64, &[u8])> {
    match read_int_lenenc_nullable(data)? {
        (Some(value), rest) => Ok((value, rest)),
        (None, _) => Err(Error::InvalidPacket),
    }
}

pub fn read_string_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::UnexpectedEof);
    }
    Ok(data.split_at(len))
}

pub fn read_string_null(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match data.iter().position(|&b| b == 0) {
        Some(i) => Ok((&data[..i], &data[i + 1..])),
        None => Err(Error::UnexpectedEof),
    }
}

pub fn read_string_lenenc(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_int_lenenc(data)?;
    read_string_fix(rest, usize::try_from(len).map_err(|_| Error::InvalidPacket)?)
}

/// Length-encoded string where a 0xFB prefix is SQL NULL
pub fn read_string_lenenc_nullable(data: &[u8]) -> Result<(Option<&[u8]>, &[u8])> {
    match read_int_lenenc_nullable(data)? {
        (None, rest) => Ok((None, rest)),
        (Some(len), rest) => {
            let (value, rest) =
                read_string_fix(rest, usize::try_from(len).map_err(|_| Error::InvalidPacket)?)?;
            Ok((Some(value), rest))
        }
    }
}

pub fn read_string_eof(data: &[u8]) -> &[u8] {
    data
}

pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn write_int_2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_3(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_6(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes()[..6]);
}

pub fn write_int_8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_int_lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xFC);
        write_int_2(out, value as u16);
    } else if value < (1 << 24) {
        out.push(0xFD);
        write_int_3(out, value as u32);
    } else {
        out.push(0xFE);
        write_int_8(out, value);
    }
}

/// Number of bytes `write_int_lenenc` produces for `value`
pub fn lenenc_int_len(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < (1 << 16) {
        3
    } else if value < (1 << 24) {
        4
    } else {
        9
    }
}

pub fn write_bytes_fix(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

pub fn write_string_null(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s);
    out.push(0);
}

pub fn write_bytes_lenenc(out: &mut Vec<u8>, data: &[u8]) {
    write_int_lenenc(out, data.len() as u64);
    out.extend_from_slice(data);
}
