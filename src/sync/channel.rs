use std::io::{BufReader, Read, Write};

use crate::error::{Error, Result, eyre};
use crate::protocol::compress::{CompressedReader, CompressedWriter};
use crate::protocol::packet::{PacketHeader, SequenceTracker, split_payload};
use crate::protocol::payload::Payload;
use crate::protocol::pipeline::{Direction, PipelineHandle};

#[derive(Debug, Default)]
struct Compression {
    writer: CompressedWriter,
    reader: CompressedReader,
}

/// Blocking packet I/O over one byte stream.
///
/// Splits and reassembles multi-packet messages, checks sequence ids, and
/// routes bytes through the compressed framing once it is enabled.
pub struct PacketChannel<S> {
    stream: BufReader<S>,
    sequence: SequenceTracker,
    compressed_sequence: SequenceTracker,
    compression: Option<Compression>,
    pipeline: PipelineHandle,
    max_allowed_packet: usize,
    peeked: Option<(Payload, SequenceTracker)>,
    write_buffer: Vec<u8>,
    frame_buffer: Vec<u8>,
}

impl<S: Read + Write> PacketChannel<S> {
    pub fn new(stream: S, pipeline: PipelineHandle, max_allowed_packet: usize) -> Self {
        Self {
            stream: BufReader::new(stream),
            sequence: SequenceTracker::default(),
            compressed_sequence: SequenceTracker::default(),
            compression: None,
            pipeline,
            max_allowed_packet,
            peeked: None,
            write_buffer: Vec::new(),
            frame_buffer: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut S {
        self.stream.get_mut()
    }

    pub fn pipeline(&self) -> &PipelineHandle {
        &self.pipeline
    }

    pub fn max_allowed_packet(&self) -> usize {
        self.max_allowed_packet
    }

    pub fn set_max_allowed_packet(&mut self, max: usize) {
        self.max_allowed_packet = max;
    }

    /// Switch to compressed framing; called right after authentication
    pub fn enable_compression(&mut self) {
        self.compression.get_or_insert_with(Compression::default);
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    /// Start a new exchange: the next packet in either direction carries id 0
    pub fn reset_sequence(&mut self) {
        self.sequence.reset();
        self.compressed_sequence.reset();
    }

    pub fn sequence(&self) -> SequenceTracker {
        self.sequence
    }

    fn read_wire(&mut self, buf: &mut [u8]) -> Result<()> {
        match &mut self.compression {
            Some(compression) => compression
                .reader
                .reader(&mut self.stream, &mut self.compressed_sequence)
                .read_exact(buf)?,
            None => self.stream.read_exact(buf)?,
        }
        Ok(())
    }

    fn with_history(&self, err: Error) -> Error {
        match err {
            Error::PacketSequence {
                expected, actual, ..
            } => Error::PacketSequence {
                expected,
                actual,
                history: self
                    .pipeline
                    .history()
                    .map(|h| h.render())
                    .unwrap_or_default(),
            },
            other => other,
        }
    }

    fn read_header_with(&mut self, sequence: &mut SequenceTracker) -> Result<PacketHeader> {
        let mut bytes = [0u8; 4];
        self.read_wire(&mut bytes)?;
        let header = *PacketHeader::from_bytes(&bytes)?;
        sequence
            .accept(header.sequence_id)
            .map_err(|e| self.with_history(e))?;
        Ok(header)
    }

    /// Read and validate the next wire header
    pub fn read_header(&mut self) -> Result<PacketHeader> {
        let mut sequence = self.sequence;
        let header = self.read_header_with(&mut sequence)?;
        self.sequence = sequence;
        Ok(header)
    }

    /// Read the body announced by `header`
    pub fn read_body(&mut self, header: PacketHeader) -> Result<Vec<u8>> {
        let mut body = vec![0u8; header.length()];
        self.read_wire(&mut body)?;
        self.pipeline.observe(Direction::Receive, header, &body);
        Ok(body)
    }

    fn read_logical(&mut self, sequence: &mut SequenceTracker) -> Result<Payload> {
        let mut body = Vec::new();
        loop {
            let header = self.read_header_with(sequence)?;
            let len = header.length();
            if body.len() + len > self.max_allowed_packet {
                return Err(Error::PacketTooLarge {
                    size: body.len() + len,
                    max: self.max_allowed_packet,
                });
            }
            let start = body.len();
            body.resize(start + len, 0);
            self.read_wire(&mut body[start..])?;
            self.pipeline
                .observe(Direction::Receive, header, &body[start..]);
            if !header.is_continued() {
                return Ok(Payload::from_vec(body));
            }
        }
    }

    /// Read one logical packet, reassembling multi-packet messages
    #[tracing::instrument(skip_all)]
    pub fn read_packet(&mut self) -> Result<Payload> {
        if let Some((payload, sequence)) = self.peeked.take() {
            self.sequence = sequence;
            return Ok(payload);
        }
        let mut sequence = self.sequence;
        let payload = self.read_logical(&mut sequence)?;
        self.sequence = sequence;
        Ok(payload)
    }

    /// Read the next logical packet without consuming it.
    ///
    /// The packet is handed out again by the next `read_packet`; the sequence
    /// counter only moves when that happens.
    pub fn peek_packet(&mut self) -> Result<&Payload> {
        if self.peeked.is_none() {
            let mut sequence = self.sequence;
            let payload = self.read_logical(&mut sequence)?;
            self.peeked = Some((payload, sequence));
        }
        match &self.peeked {
            Some((payload, _)) => Ok(payload),
            None => Err(Error::LibraryBug(eyre!("peeked packet vanished"))),
        }
    }

    pub fn has_peeked(&self) -> bool {
        self.peeked.is_some()
    }

    /// Send one logical packet, splitting it at the maximum packet size
    #[tracing::instrument(skip_all)]
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_allowed_packet {
            return Err(Error::PacketTooLarge {
                size: payload.len(),
                max: self.max_allowed_packet,
            });
        }
        if self.peeked.is_some() {
            return Err(Error::LibraryBug(eyre!(
                "sending a packet while a peeked packet is unread"
            )));
        }

        self.write_buffer.clear();
        for chunk in split_payload(payload) {
            let header = PacketHeader::encode(chunk.len(), self.sequence.next_outgoing());
            self.write_buffer
                .extend_from_slice(zerocopy::IntoBytes::as_bytes(&header));
            self.write_buffer.extend_from_slice(chunk);
            self.pipeline.observe(Direction::Send, header, chunk);
        }

        match &mut self.compression {
            Some(compression) => {
                self.frame_buffer.clear();
                compression.writer.push(
                    &self.write_buffer,
                    &mut self.compressed_sequence,
                    &mut self.frame_buffer,
                )?;
                compression
                    .writer
                    .flush(&mut self.compressed_sequence, &mut self.frame_buffer)?;
                self.stream.get_mut().write_all(&self.frame_buffer)?;
            }
            None => self.stream.get_mut().write_all(&self.write_buffer)?,
        }
        self.stream.get_mut().flush()?;
        Ok(())
    }
}
