use pretty_assertions::assert_eq;

use crate::constant::MAX_PACKET_SIZE;
use crate::error::Error;
use crate::protocol::packet::*;

#[test]
fn header_layout() {
    let header = PacketHeader::encode(0x030201, 7);
    assert_eq!(zerocopy::IntoBytes::as_bytes(&header), &[1, 2, 3, 7]);
    assert_eq!(PacketHeader::from_bytes(&[1, 2, 3, 7, 99]).unwrap().length(), 0x030201);
    assert!(matches!(PacketHeader::from_bytes(&[1, 2]), Err(Error::InvalidPacket)));
}

#[test]
fn sequence_wraps_after_255() {
    let mut seq = SequenceTracker::default();
    for expected in 0..=255u8 {
        assert_eq!(seq.next_outgoing(), expected);
    }
    seq.accept(0).unwrap();
    assert_eq!(seq.expected(), 1);
}

#[test]
fn sequence_mismatch_reports_both_ids() {
    let mut seq = SequenceTracker::default();
    seq.accept(0).unwrap();
    match seq.accept(5) {
        Err(Error::PacketSequence {
            expected, actual, ..
        }) => assert_eq!((expected, actual), (1, 5)),
        other => panic!("unexpected {other:?}"),
    }
    seq.reset();
    seq.accept(0).unwrap();
}

fn round_trip(len: usize) {
    let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let mut wire = Vec::new();
    write_framed(&mut wire, &payload, &mut SequenceTracker::default());
    let decoded = reassemble(&wire, &mut SequenceTracker::default()).unwrap();
    assert!(decoded == payload, "round trip of {len} bytes");
}

#[test]
fn split_sizes_around_the_limit() {
    let sizes: Vec<usize> = split_payload(&vec![0; MAX_PACKET_SIZE - 1]).map(<[u8]>::len).collect();
    assert_eq!(sizes, vec![MAX_PACKET_SIZE - 1]);

    let sizes: Vec<usize> = split_payload(&vec![0; MAX_PACKET_SIZE]).map(<[u8]>::len).collect();
    assert_eq!(sizes, vec![MAX_PACKET_SIZE, 0]);

    let sizes: Vec<usize> = split_payload(&vec![0; MAX_PACKET_SIZE + 1]).map(<[u8]>::len).collect();
    assert_eq!(sizes, vec![MAX_PACKET_SIZE, 1]);

    let sizes: Vec<usize> = split_payload(&vec![0; 2 * MAX_PACKET_SIZE]).map(<[u8]>::len).collect();
    assert_eq!(sizes, vec![MAX_PACKET_SIZE, MAX_PACKET_SIZE, 0]);

    let sizes: Vec<usize> = split_payload(&[]).map(<[u8]>::len).collect();
    assert_eq!(sizes, vec![0]);
}

#[test]
fn multi_packet_round_trip() {
    round_trip(0);
    round_trip(10);
    round_trip(MAX_PACKET_SIZE - 1);
    round_trip(MAX_PACKET_SIZE);
    round_trip(MAX_PACKET_SIZE + 1);
}

#[test]
fn terminal_empty_packet_on_exact_multiple() {
    let payload = vec![0xAB; MAX_PACKET_SIZE];
    let mut wire = Vec::new();
    write_framed(&mut wire, &payload, &mut SequenceTracker::default());
    assert_eq!(wire.len(), MAX_PACKET_SIZE + 8);
    assert_eq!(&wire[..4], &[0xFF, 0xFF, 0xFF, 0]);
    assert_eq!(&wire[wire.len() - 4..], &[0, 0, 0, 1]);
}
