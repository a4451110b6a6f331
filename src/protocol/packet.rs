use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::MAX_PACKET_SIZE;
use crate::error::{Error, Result};

/// MySQL packet header (zero-copy)
///
/// Layout matches MySQL wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        let (header, _) = Self::ref_from_prefix(data).map_err(|_| Error::InvalidPacket)?;
        Ok(header)
    }

    /// A full-size packet is always followed by another packet of the same message
    pub fn is_continued(&self) -> bool {
        self.length() == MAX_PACKET_SIZE
    }
}

/// Helper function to write packet header
#[inline]
pub fn write_packet_header(out: &mut Vec<u8>, sequence_id: u8, payload_length: usize) {
    out.extend_from_slice(PacketHeader::encode(payload_length, sequence_id).as_bytes());
}

/// Sequence id bookkeeping shared by both directions of one exchange.
///
/// After `reset` the next packet must carry 0; afterwards every packet must
/// carry the previous id plus one, wrapping from 255 to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceTracker {
    last: Option<u8>,
}

impl SequenceTracker {
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn expected(&self) -> u8 {
        match self.last {
            Some(last) => last.wrapping_add(1),
            None => 0,
        }
    }

    /// Validate an incoming id without committing it
    pub fn check(&self, actual: u8) -> Result<()> {
        let expected = self.expected();
        if actual != expected {
            return Err(Error::PacketSequence {
                expected,
                actual,
                history: String::new(),
            });
        }
        Ok(())
    }

    pub fn accept(&mut self, actual: u8) -> Result<()> {
        self.check(actual)?;
        self.last = Some(actual);
        Ok(())
    }

    /// Claim the id for the next outgoing packet
    pub fn next_outgoing(&mut self) -> u8 {
        let id = self.expected();
        self.last = Some(id);
        id
    }
}

/// Split a logical payload into wire chunks.
///
/// Every chunk but the last has exactly `MAX_PACKET_SIZE` bytes. A payload
/// whose length is a multiple of the maximum (including an empty payload)
/// ends with an empty chunk.
pub fn split_payload(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    let full = payload.len() / MAX_PACKET_SIZE;
    (0..=full).map(move |i| {
        let start = i * MAX_PACKET_SIZE;
        let end = (start + MAX_PACKET_SIZE).min(payload.len());
        &payload[start..end]
    })
}

/// Frame a logical payload into header+chunk packets appended to `out`
pub fn write_framed(out: &mut Vec<u8>, payload: &[u8], sequence: &mut SequenceTracker) {
    for chunk in split_payload(payload) {
        write_packet_header(out, sequence.next_outgoing(), chunk.len());
        out.extend_from_slice(chunk);
    }
}

/// Undo `write_framed` on a complete in-memory byte stream
pub fn reassemble(mut wire: &[u8], sequence: &mut SequenceTracker) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    loop {
        let header = *PacketHeader::from_bytes(wire)?;
        sequence.accept(header.sequence_id)?;
        let body = wire
            .get(4..4 + header.length())
            .ok_or(Error::UnexpectedEof)?;
        payload.extend_from_slice(body);
        wire = &wire[4 + header.length()..];
        if !header.is_continued() {
            return Ok(payload);
        }
    }
}
