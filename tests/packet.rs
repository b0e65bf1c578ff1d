extern crate was_simple;

use was_simple::packet;
use was_simple::{Method, Packet};

#[test]
fn decodes_a_stream_of_back_to_back_frames() {
    let mut buf = Vec::new();
    Packet::Method(Method::Put).encode(&mut buf);
    Packet::Uri(b"/a/b".to_vec()).encode(&mut buf);
    Packet::Header(b"Host".to_vec(), b"example.com".to_vec()).encode(&mut buf);
    Packet::Request.encode(&mut buf);

    let mut got = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let (pkt, len) = packet::decode(&buf[offset..], 65536).unwrap().unwrap();
        got.push(pkt);
        offset += len;
    }

    assert_eq!(
        got,
        vec![
            Packet::Method(Method::Put),
            Packet::Uri(b"/a/b".to_vec()),
            Packet::Header(b"Host".to_vec(), b"example.com".to_vec()),
            Packet::Request,
        ]
    );
}

#[test]
fn decode_reports_a_partial_trailing_frame_as_none() {
    let mut buf = Vec::new();
    Packet::Request.encode(&mut buf);
    Packet::Uri(b"/whole".to_vec()).encode(&mut buf);

    let (first, len) = packet::decode(&buf, 65536).unwrap().unwrap();
    assert_eq!(first, Packet::Request);

    let rest = &buf[len..];
    let short = &rest[..rest.len() - 2];
    assert!(packet::decode(short, 65536).unwrap().is_none());
    assert_eq!(
        packet::decode(rest, 65536).unwrap().unwrap().0,
        Packet::Uri(b"/whole".to_vec())
    );
}

#[test]
fn max_payload_len_bounds_are_exact() {
    let mut buf = Vec::new();
    Packet::Uri(vec![b'x'; 100]).encode(&mut buf);

    assert!(packet::decode(&buf, 100).is_ok());
    assert!(packet::decode(&buf, 99).is_err());
}
