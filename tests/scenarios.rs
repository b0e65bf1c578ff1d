extern crate was_simple;

mod support;

use was_simple::{packet, Error, Method, Packet, PollResult};

fn decode_all(bytes: &[u8]) -> Vec<Packet> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (pkt, len) = packet::decode(&bytes[offset..], 65536).unwrap().unwrap();
        out.push(pkt);
        offset += len;
    }
    out
}

#[test]
fn minimal_get_request_yields_204_no_data() {
    let (mut engine, gw) = support::harness();

    gw.send(&Packet::Method(Method::Get));
    gw.send(&Packet::Uri(b"/".to_vec()));
    gw.send(&Packet::Request);

    assert_eq!(engine.accept().unwrap(), PollResult::Ready);
    assert_eq!(engine.method(), Method::Get);
    assert_eq!(engine.uri(), b"/");

    engine.end().unwrap();

    let reply = decode_all(&gw.recv_raw(4096));
    assert_eq!(reply, vec![Packet::Status(204), Packet::NoData, Packet::End]);
}

#[test]
fn post_with_known_length_roundtrips_the_body() {
    let (mut engine, gw) = support::harness();

    gw.send(&Packet::Method(Method::Post));
    gw.send(&Packet::Uri(b"/upload".to_vec()));
    gw.send(&Packet::Length(5));
    gw.send(&Packet::Request);
    gw.write_body(b"hello");

    assert_eq!(engine.accept().unwrap(), PollResult::Ready);
    assert_eq!(engine.method(), Method::Post);
    assert_eq!(engine.input_remaining(), 5);

    let mut buf = [0u8; 16];
    let n = engine.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(engine.read(&mut buf).unwrap(), 0);

    engine.status(200).unwrap();
    engine.set_length(2).unwrap();
    engine.write(b"ok").unwrap();
    engine.end().unwrap();

    let reply = decode_all(&gw.recv_raw(4096));
    assert_eq!(
        reply,
        vec![Packet::Status(200), Packet::Length(2), Packet::Data, Packet::End]
    );
    assert_eq!(gw.read_response_body(16), b"ok");
}

#[test]
fn input_close_sends_stop_before_body_is_drained() {
    let (mut engine, gw) = support::harness();

    gw.send(&Packet::Method(Method::Post));
    gw.send(&Packet::Length(1_000_000));
    gw.send(&Packet::Request);

    assert_eq!(engine.accept().unwrap(), PollResult::Ready);
    assert!(engine.has_body());

    gw.send(&Packet::Premature);
    engine.input_close().unwrap();

    let reply = decode_all(&gw.recv_raw(4096));
    assert_eq!(reply, vec![Packet::Stop]);
}

#[test]
fn peer_stop_aborts_further_output_writes() {
    let (mut engine, gw) = support::harness();

    gw.send(&Packet::Method(Method::Get));
    gw.send(&Packet::Uri(b"/stream".to_vec()));
    gw.send(&Packet::Request);
    assert_eq!(engine.accept().unwrap(), PollResult::Ready);

    engine.status(200).unwrap();
    engine.write(b"first chunk").unwrap();
    gw.read_response_body(64);

    gw.send(&Packet::Stop);
    assert_eq!(engine.output_poll(-1).unwrap(), PollResult::Closed);

    let err = engine.write(b"second chunk").unwrap_err();
    match err {
        Error::Usage(_) => {}
        other => panic!("expected a usage error after STOP, got {:?}", other),
    }
}

#[test]
fn input_poll_reports_end_after_premature() {
    let (mut engine, gw) = support::harness();

    gw.send(&Packet::Method(Method::Post));
    gw.send(&Packet::Length(1_000_000));
    gw.send(&Packet::Request);
    assert_eq!(engine.accept().unwrap(), PollResult::Ready);

    gw.send(&Packet::Premature);
    assert_eq!(engine.input_poll(-1).unwrap(), PollResult::End);
}

#[test]
fn oversized_control_packet_is_a_protocol_error() {
    let (mut engine, gw) = support::harness();

    let mut bytes = [0u8; 8];
    bytes[0] = 7; // Header kind
    bytes[4..8].copy_from_slice(&(10 * 1024 * 1024u32).to_le_bytes());
    gw.send_raw(&bytes);

    let err = engine.accept().unwrap_err();
    match err {
        Error::Protocol(_) => {}
        other => panic!("expected a protocol error, got {:?}", other),
    }

    let reply = decode_all(&gw.recv_raw(4096));
    assert_eq!(reply, vec![Packet::Abort]);
}

#[test]
fn declared_output_length_mismatch_forces_abort() {
    let (mut engine, gw) = support::harness();

    gw.send(&Packet::Method(Method::Get));
    gw.send(&Packet::Uri(b"/short".to_vec()));
    gw.send(&Packet::Request);
    assert_eq!(engine.accept().unwrap(), PollResult::Ready);

    engine.status(200).unwrap();
    engine.set_length(10).unwrap();
    engine.write(b"abc").unwrap();
    engine.end().unwrap();

    let reply = decode_all(&gw.recv_raw(4096));
    assert!(reply.contains(&Packet::Abort));
    assert!(!reply.contains(&Packet::End));
}

#[test]
fn metric_before_accept_is_a_usage_error() {
    let (mut engine, _gw) = support::harness();
    let err = engine.metric(b"queue_depth", 3.0).unwrap_err();
    match err {
        Error::Usage(_) => {}
        other => panic!("expected a usage error, got {:?}", other),
    }
}

#[test]
fn want_metrics_reflects_a_metric_query_packet() {
    let (mut engine, gw) = support::harness();

    gw.send(&Packet::Method(Method::Get));
    gw.send(&Packet::Uri(b"/".to_vec()));
    gw.send(&Packet::Metric(b"".to_vec(), b"".to_vec()));
    gw.send(&Packet::Request);

    assert_eq!(engine.accept().unwrap(), PollResult::Ready);
    assert!(engine.want_metrics());
    engine.metric(b"latency_ms", 1.5).unwrap();
    engine.end().unwrap();
}
