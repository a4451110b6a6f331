use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::constant::MAX_PACKET_SIZE;
use crate::error::Error;
use crate::protocol::compress::write_frame;
use crate::protocol::packet::{SequenceTracker, write_framed, write_packet_header};
use crate::protocol::pipeline::{DebugHistory, PipelineHandle, Stage};
use crate::sync::PacketChannel;

/// Server bytes in, client bytes out
#[derive(Default)]
struct Duplex {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Duplex {
    fn replaying(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }
}

impl Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn channel(input: Vec<u8>) -> PacketChannel<Duplex> {
    PacketChannel::new(Duplex::replaying(input), PipelineHandle::default(), 64 << 20)
}

fn packet(sequence_id: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_packet_header(&mut out, sequence_id, body.len());
    out.extend_from_slice(body);
    out
}

#[test]
fn send_numbers_packets_per_exchange() {
    let mut ch = channel(Vec::new());
    ch.send(b"\x03SELECT 1").unwrap();
    ch.send(b"more").unwrap();
    ch.reset_sequence();
    ch.send(b"\x0e").unwrap();

    let mut expected = packet(0, b"\x03SELECT 1");
    expected.extend(packet(1, b"more"));
    expected.extend(packet(0, b"\x0e"));
    assert_eq!(ch.get_ref().output, expected);
}

#[test]
fn reads_continue_the_sequence_of_the_request() {
    let mut ch = channel(packet(1, b"\x00\x00\x00\x02\x00\x00\x00"));
    ch.send(b"\x0e").unwrap();
    let reply = ch.read_packet().unwrap();
    assert_eq!(reply.as_slice(), b"\x00\x00\x00\x02\x00\x00\x00");
    assert_eq!(ch.sequence().expected(), 2);
}

#[test]
fn multi_packet_message_is_reassembled() {
    let body: Vec<u8> = (0..MAX_PACKET_SIZE + 10).map(|i| i as u8).collect();
    let mut wire = Vec::new();
    write_framed(&mut wire, &body, &mut SequenceTracker::default());

    let mut ch = channel(wire);
    let payload = ch.read_packet().unwrap();
    assert_eq!(payload.len(), body.len());
    assert!(payload.as_slice() == body.as_slice());
    assert_eq!(ch.sequence().expected(), 2);
}

#[test]
fn exact_multiple_of_max_needs_empty_terminator() {
    let body = vec![7u8; MAX_PACKET_SIZE];
    let mut ch = channel(Vec::new());
    ch.send(&body).unwrap();
    let out = &ch.get_ref().output;
    assert_eq!(out.len(), 4 + MAX_PACKET_SIZE + 4);
    assert_eq!(&out[4 + MAX_PACKET_SIZE..], &[0, 0, 0, 1]);
}

#[test]
fn out_of_order_packet_reports_history() {
    let history = Arc::new(DebugHistory::new(4));
    let pipeline = PipelineHandle::new(vec![Stage::DebugHistory(Arc::clone(&history))]);
    let mut wire = packet(0, b"\x01");
    wire.extend(packet(5, b"\x02"));
    let mut ch = PacketChannel::new(Duplex::replaying(wire), pipeline, 1024);

    ch.read_packet().unwrap();
    match ch.read_packet() {
        Err(Error::PacketSequence {
            expected, actual, history, ..
        }) => {
            assert_eq!((expected, actual), (1, 5));
            assert!(!history.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn oversized_packets_are_refused_both_ways() {
    let mut ch = PacketChannel::new(
        Duplex::replaying(packet(0, &[0u8; 32])),
        PipelineHandle::default(),
        16,
    );
    assert!(matches!(
        ch.send(&[0u8; 17]),
        Err(Error::PacketTooLarge { size: 17, max: 16 })
    ));
    assert!(matches!(
        ch.read_packet(),
        Err(Error::PacketTooLarge { size: 32, max: 16 })
    ));
}

#[test]
fn peek_does_not_consume() {
    let mut wire = packet(0, b"first");
    wire.extend(packet(1, b"second"));
    let mut ch = channel(wire);

    assert_eq!(ch.peek_packet().unwrap().as_slice(), b"first");
    assert_eq!(ch.sequence().expected(), 0);
    assert!(ch.has_peeked());
    assert_eq!(ch.read_packet().unwrap().as_slice(), b"first");
    assert_eq!(ch.sequence().expected(), 1);
    assert_eq!(ch.read_packet().unwrap().as_slice(), b"second");
}

#[test]
fn sending_with_a_peeked_packet_is_a_bug() {
    let mut ch = channel(packet(0, b"x"));
    ch.peek_packet().unwrap();
    assert!(matches!(ch.send(b"y"), Err(Error::LibraryBug(_))));
}

#[test]
fn compressed_framing_after_enable() {
    let mut frames = Vec::new();
    // one compressed frame carrying two packets
    let mut inner = packet(1, b"\x00\x00\x00\x02\x00\x00\x00");
    inner.extend(packet(2, &[b'z'; 200]));
    write_frame(&mut frames, &inner, 1).unwrap();

    let mut ch = channel(frames);
    ch.enable_compression();
    assert!(ch.is_compressed());
    ch.send(b"\x0e").unwrap();

    // short payloads travel raw inside the frame
    let out = ch.get_ref().output.clone();
    assert_eq!(&out[..7], &[5, 0, 0, 0, 0, 0, 0]);
    assert_eq!(&out[7..], packet(0, b"\x0e").as_slice());

    assert_eq!(ch.read_packet().unwrap().as_slice(), b"\x00\x00\x00\x02\x00\x00\x00");
    assert_eq!(ch.read_packet().unwrap().as_slice(), &[b'z'; 200]);
}
