//! Frames must decode the same however the byte stream is chunked.

use bytes::BytesMut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use stomp_engine::continuation::handler;
use stomp_engine::{Engine, Packet, StompCodec, StompItem, once};
use tokio_util::codec::Decoder;

fn wire() -> Vec<u8> {
    let mut wire = Vec::new();
    wire.extend_from_slice(b"\n");
    wire.extend_from_slice(b"MESSAGE\nsubscription:s1\ndestination:/queue/a\nmessage-id:1\ncontent-length:7\n\nwi\0th\0x\0");
    wire.extend_from_slice(b"\r\n");
    wire.extend_from_slice(b"MESSAGE\r\nsubscription:s1\r\ndestination:/queue/a\r\nmessage-id:2\r\n\r\nplain body\0");
    wire.extend_from_slice(b"RECEIPT\nreceipt-id:r1\n\n\0");
    wire.extend_from_slice(b"MESSAGE\nsubscription:s1\nnote:a\\cb\\\\c\nmessage-id:3\n\n\0");
    wire.extend_from_slice(b"\n\n");
    wire
}

fn engine(out: &Arc<Mutex<Vec<String>>>) -> Engine {
    let mut engine = Engine::new();
    let sink = out.clone();
    engine
        .subscriptions_mut()
        .create_with_id(
            "s1",
            handler(move |p: Packet<'_>| {
                sink.lock().unwrap().push(format!(
                    "{} {:?} {:?}",
                    p.message_id().unwrap_or("-"),
                    p.header("note"),
                    p.payload()
                ))
            }),
        )
        .unwrap();
    let sink = out.clone();
    engine.receipts_mut().insert(
        "r1",
        once(move |p: Packet<'_>| sink.lock().unwrap().push(format!("receipt {}", p.receipt_id().unwrap_or("-")))),
    );
    engine
}

fn expected() -> Vec<String> {
    vec![
        r#"1 None b"wi\0th\0x""#.to_string(),
        r#"2 None b"plain body""#.to_string(),
        "receipt r1".to_string(),
        r#"3 Some("a:b\\c") b"""#.to_string(),
    ]
}

#[test]
fn whole_buffer_dispatch() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let mut engine = engine(&out);
    let wire = wire();
    assert_eq!(engine.feed(&wire).unwrap(), wire.len());
    assert_eq!(*out.lock().unwrap(), expected());
}

#[test]
fn byte_at_a_time_dispatch() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let mut engine = engine(&out);
    for b in wire() {
        engine.feed(&[b]).unwrap();
    }
    assert_eq!(*out.lock().unwrap(), expected());
}

#[test]
fn random_split_dispatch() {
    let mut rng = StdRng::seed_from_u64(0x5708);
    let wire = wire();
    for _ in 0..200 {
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine(&out);
        let mut pos = 0;
        while pos < wire.len() {
            let end = (pos + rng.gen_range(1..=16)).min(wire.len());
            assert_eq!(engine.feed(&wire[pos..end]).unwrap(), end - pos);
            pos = end;
        }
        assert_eq!(*out.lock().unwrap(), expected());
    }
}

#[test]
fn random_split_codec() {
    let mut rng = StdRng::seed_from_u64(42);
    let wire = wire();
    for _ in 0..100 {
        let mut codec = StompCodec::new();
        let mut buf = BytesMut::new();
        let mut items = Vec::new();
        let mut pos = 0;
        while pos < wire.len() {
            let end = (pos + rng.gen_range(1..=12)).min(wire.len());
            buf.extend_from_slice(&wire[pos..end]);
            pos = end;
            while let Some(item) = codec.decode(&mut buf).unwrap() {
                items.push(item);
            }
        }
        let heartbeats = items.iter().filter(|i| **i == StompItem::Heartbeat).count();
        let frames: Vec<_> = items
            .iter()
            .filter_map(|i| match i {
                StompItem::Frame(f) => Some(f.command.clone()),
                StompItem::Heartbeat => None,
            })
            .collect();
        // "\n", "\r\n" and the trailing "\n\n"
        assert_eq!(heartbeats, 4);
        assert_eq!(frames, vec!["MESSAGE", "MESSAGE", "RECEIPT", "MESSAGE"]);
    }
}

#[test]
fn fault_is_sticky_until_reset() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let mut engine = engine(&out);
    assert!(engine.feed(b"MESSAGE\nno colon here\n\n\0").is_err());
    assert!(engine.is_faulted());
    assert!(engine.feed(b"RECEIPT\nreceipt-id:r1\n\n\0").is_err());

    engine.reset();
    assert!(!engine.is_faulted());
    assert_eq!(engine.feed(b"\n").unwrap(), 1);
}

fn long_header_frame(len: usize) -> Vec<u8> {
    let mut wire = b"MESSAGE\nsubscription:s1\nx:".to_vec();
    wire.extend(std::iter::repeat_n(b'a', len));
    wire.extend_from_slice(b"\n\n\0");
    wire
}

/// Feed `wire` in the given chunks; returns the number of messages
/// delivered and whether the engine faulted.
fn feed_chunks(wire: &[u8], cuts: &[usize]) -> (usize, bool) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let mut engine = engine(&out);
    let mut start = 0;
    for &end in cuts.iter().chain(std::iter::once(&wire.len())) {
        if engine.feed(&wire[start..end]).is_err() {
            break;
        }
        start = end;
    }
    let delivered = out.lock().unwrap().len();
    (delivered, engine.is_faulted())
}

#[test]
fn oversized_header_line_faults_however_it_is_split() {
    let wire = long_header_frame(70_000);
    assert_eq!(feed_chunks(&wire, &[]), (0, true));
    assert_eq!(feed_chunks(&wire, &[66_000]), (0, true));
    assert_eq!(feed_chunks(&wire, &[30, 65_000, 69_990]), (0, true));
}

#[test]
fn long_header_line_under_the_cap_parses_however_it_is_split() {
    let wire = long_header_frame(60_000);
    assert_eq!(feed_chunks(&wire, &[]), (1, false));
    assert_eq!(feed_chunks(&wire, &[40_000]), (1, false));
    assert_eq!(feed_chunks(&wire, &[30, 59_000, wire.len() - 2]), (1, false));
}
