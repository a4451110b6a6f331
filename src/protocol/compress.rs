//! Compressed protocol frames.
//!
//! Every frame starts with a 7-byte header: compressed length (3 bytes),
//! sequence id (1 byte) and uncompressed length (3 bytes). An uncompressed
//! length of 0 means the frame body is stored raw.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::{COMP_HEADER_LENGTH, MAX_PACKET_SIZE, MIN_COMPRESS_LEN};
use crate::error::{Error, Result};
use crate::protocol::packet::SequenceTracker;

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct CompressedHeader {
    compressed_length: [u8; 3],
    pub sequence_id: u8,
    uncompressed_length: [u8; 3],
}

impl CompressedHeader {
    pub fn encode(compressed_length: usize, sequence_id: u8, uncompressed_length: usize) -> Self {
        let c = (compressed_length as u32).to_le_bytes();
        let u = (uncompressed_length as u32).to_le_bytes();
        Self {
            compressed_length: [c[0], c[1], c[2]],
            sequence_id,
            uncompressed_length: [u[0], u[1], u[2]],
        }
    }

    pub fn compressed_length(&self) -> usize {
        let l = self.compressed_length;
        u32::from_le_bytes([l[0], l[1], l[2], 0]) as usize
    }

    pub fn uncompressed_length(&self) -> usize {
        let l = self.uncompressed_length;
        u32::from_le_bytes([l[0], l[1], l[2], 0]) as usize
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::CompressionError(e.to_string()))
}

/// Write one compressed frame holding `data`.
///
/// Data below `MIN_COMPRESS_LEN`, or data that deflate cannot shrink, is
/// stored raw with an uncompressed length of 0.
pub fn write_frame(out: &mut Vec<u8>, data: &[u8], sequence_id: u8) -> Result<()> {
    if data.len() >= MIN_COMPRESS_LEN {
        let compressed = deflate(data)?;
        if compressed.len() < data.len() {
            out.extend_from_slice(
                CompressedHeader::encode(compressed.len(), sequence_id, data.len()).as_bytes(),
            );
            out.extend_from_slice(&compressed);
            return Ok(());
        }
    }
    out.extend_from_slice(CompressedHeader::encode(data.len(), sequence_id, 0).as_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// Packs framed packets into compressed frames of at most `MAX_PACKET_SIZE`
/// uncompressed bytes.
///
/// Bytes that do not fill a whole frame stay in `unsent` and are prepended to
/// the next frame, so one frame may carry the tail of one packet and the head
/// of the next.
///
/// Frame sequence ids come from a tracker shared with the reading side,
/// since both directions of one command count frames together.
#[derive(Debug, Default)]
pub struct CompressedWriter {
    unsent: Vec<u8>,
}

impl CompressedWriter {
    /// Queue framed packet bytes, emitting every frame that is full
    pub fn push(
        &mut self,
        mut wire: &[u8],
        sequence: &mut SequenceTracker,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if !self.unsent.is_empty() {
            let take = (MAX_PACKET_SIZE - self.unsent.len()).min(wire.len());
            self.unsent.extend_from_slice(&wire[..take]);
            wire = &wire[take..];
            if self.unsent.len() < MAX_PACKET_SIZE {
                return Ok(());
            }
            write_frame(out, &self.unsent, sequence.next_outgoing())?;
            self.unsent.clear();
        }
        while wire.len() >= MAX_PACKET_SIZE {
            let (frame, rest) = wire.split_at(MAX_PACKET_SIZE);
            write_frame(out, frame, sequence.next_outgoing())?;
            wire = rest;
        }
        self.unsent.extend_from_slice(wire);
        Ok(())
    }

    pub fn flush(&mut self, sequence: &mut SequenceTracker, out: &mut Vec<u8>) -> Result<()> {
        if !self.unsent.is_empty() {
            write_frame(out, &self.unsent, sequence.next_outgoing())?;
            self.unsent.clear();
        }
        Ok(())
    }

    pub fn unsent_len(&self) -> usize {
        self.unsent.len()
    }
}

/// Inflated bytes not yet consumed by the packet reader
#[derive(Debug, Default)]
pub struct CompressedReader {
    buf: Vec<u8>,
    pos: usize,
}

impl CompressedReader {
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Byte source that yields the inflated stream of `inner`
    pub fn reader<'a, R: Read>(
        &'a mut self,
        inner: &'a mut R,
        sequence: &'a mut SequenceTracker,
    ) -> InflateRead<'a, R> {
        InflateRead {
            state: self,
            inner,
            sequence,
        }
    }

    fn read_frame<R: Read>(&mut self, inner: &mut R, sequence: &mut SequenceTracker) -> io::Result<()> {
        let mut header_bytes = [0u8; COMP_HEADER_LENGTH];
        inner.read_exact(&mut header_bytes)?;
        let header = CompressedHeader::read_from_bytes(&header_bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad compressed header"))?;
        sequence
            .accept(header.sequence_id)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let mut body = vec![0u8; header.compressed_length()];
        inner.read_exact(&mut body)?;

        // splice the unread remainder with the new frame
        self.buf.drain(..self.pos);
        self.pos = 0;

        let expected = header.uncompressed_length();
        if expected == 0 {
            self.buf.extend_from_slice(&body);
            return Ok(());
        }
        let before = self.buf.len();
        ZlibDecoder::new(body.as_slice()).read_to_end(&mut self.buf)?;
        let inflated = self.buf.len() - before;
        if inflated != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("compressed frame inflated to {inflated} bytes, header says {expected}"),
            ));
        }
        Ok(())
    }
}

pub struct InflateRead<'a, R> {
    state: &'a mut CompressedReader,
    inner: &'a mut R,
    sequence: &'a mut SequenceTracker,
}

impl<R: Read> Read for InflateRead<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.state.buffered() == 0 {
            self.state.read_frame(self.inner, self.sequence)?;
        }
        let n = out.len().min(self.state.buffered());
        out[..n].copy_from_slice(&self.state.buf[self.state.pos..self.state.pos + n]);
        self.state.pos += n;
        Ok(n)
    }
}
