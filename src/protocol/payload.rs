use std::borrow::Cow;

use crate::charset::Charset;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// Owned message payload with a read/write cursor.
///
/// The logical length is tracked separately from the backing storage so a
/// buffer that is shrunk and reused never exposes stale trailing bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    buf: Vec<u8>,
    len: usize,
    pos: usize,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            len: 0,
            pos: 0,
        }
    }

    pub fn from_vec(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self { buf, len, pos: 0 }
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf
    }

    /// Bytes between the start and the logical end
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Bytes between the cursor and the logical end
    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.len {
            return Err(Error::UnexpectedEof);
        }
        self.pos = pos;
        Ok(())
    }

    /// Shrink or extend the logical length; extension exposes zeroed bytes
    pub fn set_len(&mut self, len: usize) {
        self.ensure_capacity(len);
        if len > self.len {
            self.buf[self.len..len].fill(0);
        }
        self.len = len;
        self.pos = self.pos.min(len);
    }

    pub fn ensure_capacity(&mut self, additional_end: usize) {
        if self.buf.len() < additional_end {
            self.buf.resize(additional_end, 0);
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.pos = 0;
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining().len() < n {
            return Err(Error::UnexpectedEof);
        }
        self.pos += n;
        Ok(())
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.remaining().first().copied()
    }

    fn read_with<T>(&mut self, read: impl FnOnce(&[u8]) -> Result<(T, &[u8])>) -> Result<T> {
        let remaining = self.remaining();
        let total = remaining.len();
        let (value, rest) = read(remaining)?;
        self.pos += total - rest.len();
        Ok(value)
    }

    // ─── Readers ─────────────────────────────────────────────────────

    pub fn read_int_1(&mut self) -> Result<u8> {
        self.read_with(read_int_1)
    }

    pub fn read_int_2(&mut self) -> Result<u16> {
        self.read_with(read_int_2)
    }

    pub fn read_int_3(&mut self) -> Result<u32> {
        self.read_with(read_int_3)
    }

    pub fn read_int_4(&mut self) -> Result<u32> {
        self.read_with(read_int_4)
    }

    pub fn read_int_6(&mut self) -> Result<u64> {
        self.read_with(read_int_6)
    }

    pub fn read_int_8(&mut self) -> Result<u64> {
        self.read_with(read_int_8)
    }

    /// `None` when the prefix is the NULL marker
    pub fn read_int_lenenc(&mut self) -> Result<Option<u64>> {
        self.read_with(read_int_lenenc_nullable)
    }

    pub fn read_bytes_fix(&mut self, len: usize) -> Result<&[u8]> {
        let start = self.pos;
        let (value, _) = read_string_fix(self.remaining(), len)?;
        let n = value.len();
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }

    pub fn read_bytes_null(&mut self) -> Result<&[u8]> {
        let start = self.pos;
        let (value, _) = read_string_null(self.remaining())?;
        let n = value.len();
        self.pos += n + 1;
        Ok(&self.buf[start..start + n])
    }

    /// `None` when the length prefix is the NULL marker
    pub fn read_bytes_lenenc(&mut self) -> Result<Option<&[u8]>> {
        let Some(len) = self.read_int_lenenc()? else {
            return Ok(None);
        };
        let len = usize::try_from(len).map_err(|_| Error::InvalidPacket)?;
        self.read_bytes_fix(len).map(Some)
    }

    pub fn read_bytes_eof(&mut self) -> &[u8] {
        let start = self.pos;
        self.pos = self.len;
        &self.buf[start..self.len]
    }

    pub fn read_string_null(&mut self, charset: Charset) -> Result<Cow<'_, str>> {
        charset.decode(self.read_bytes_null()?)
    }

    pub fn read_string_lenenc(&mut self, charset: Charset) -> Result<Option<Cow<'_, str>>> {
        match self.read_bytes_lenenc()? {
            Some(bytes) => charset.decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_string_eof(&mut self, charset: Charset) -> Result<Cow<'_, str>> {
        charset.decode(self.read_bytes_eof())
    }

    // ─── Writers ─────────────────────────────────────────────────────

    fn reserve_write(&mut self, n: usize) -> &mut [u8] {
        let end = self.pos + n;
        self.ensure_capacity(end);
        let start = self.pos;
        self.pos = end;
        self.len = self.len.max(end);
        &mut self.buf[start..end]
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.reserve_write(data.len()).copy_from_slice(data);
    }

    pub fn write_int_1(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn write_int_2(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_int_3(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes()[..3]);
    }

    pub fn write_int_4(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_int_6(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes()[..6]);
    }

    pub fn write_int_8(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_int_lenenc(&mut self, value: u64) {
        let mut tmp = Vec::with_capacity(9);
        write_int_lenenc(&mut tmp, value);
        self.write_bytes(&tmp);
    }

    pub fn write_bytes_null(&mut self, data: &[u8]) {
        self.write_bytes(data);
        self.write_int_1(0);
    }

    pub fn write_bytes_lenenc(&mut self, data: &[u8]) {
        self.write_int_lenenc(data.len() as u64);
        self.write_bytes(data);
    }

    pub fn write_string_null(&mut self, s: &str, charset: Charset) {
        self.write_bytes_null(&charset.encode(s));
    }

    pub fn write_string_lenenc(&mut self, s: &str, charset: Charset) {
        self.write_bytes_lenenc(&charset.encode(s));
    }

    pub fn write_string_eof(&mut self, s: &str, charset: Charset) {
        self.write_bytes(&charset.encode(s));
    }
}

impl From<Vec<u8>> for Payload {
    fn from(buf: Vec<u8>) -> Self {
        Self::from_vec(buf)
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
