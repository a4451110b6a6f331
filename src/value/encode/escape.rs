//! SQL literal quoting.

use crate::value::encode::EncodeContext;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[inline]
fn is_special(b: u8) -> bool {
    matches!(b, 0 | b'\n' | b'\r' | b'\\' | b'\'' | b'"' | 0x1A)
}

pub fn needs_escaping(bytes: &[u8]) -> bool {
    bytes.iter().copied().any(is_special)
}

/// Append `bytes` with backslash escapes for the characters MySQL treats specially
pub fn write_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    if !needs_escaping(bytes) {
        out.extend_from_slice(bytes);
        return;
    }
    out.reserve(bytes.len() + bytes.len() / 8 + 2);
    for &b in bytes {
        match b {
            0 => out.extend_from_slice(b"\\0"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\'' => out.extend_from_slice(b"\\'"),
            b'"' => out.extend_from_slice(b"\\\""),
            0x1A => out.extend_from_slice(b"\\Z"),
            _ => out.push(b),
        }
    }
}

/// `x'…'`
pub fn write_hex_literal(out: &mut Vec<u8>, bytes: &[u8]) {
    out.reserve(bytes.len() * 2 + 3);
    out.extend_from_slice(b"x'");
    for &b in bytes {
        out.push(HEX[usize::from(b >> 4)]);
        out.push(HEX[usize::from(b & 0x0F)]);
    }
    out.push(b'\'');
}

/// Quote already charset-encoded string bytes
pub fn quote_string(bytes: &[u8], ctx: &EncodeContext) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    if ctx.no_backslash_escapes {
        write_hex_literal(&mut out, bytes);
    } else {
        out.push(b'\'');
        write_escaped(&mut out, bytes);
        out.push(b'\'');
    }
    out
}

/// Quote raw bytes as a binary string literal
pub fn quote_bytes(bytes: &[u8], ctx: &EncodeContext) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 10);
    if ctx.no_backslash_escapes || ctx.charset.is_multibyte() {
        write_hex_literal(&mut out, bytes);
    } else {
        out.extend_from_slice(b"_binary'");
        write_escaped(&mut out, bytes);
        out.push(b'\'');
    }
    out
}

/// Quote a literal that contains no special characters, such as a date
pub fn quote_plain(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 2);
    out.push(b'\'');
    out.extend_from_slice(text.as_bytes());
    out.push(b'\'');
    out
}
