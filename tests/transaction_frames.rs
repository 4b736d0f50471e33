//! Transaction and acknowledgement frames.

mod common;

use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use common::logged_on;
use stomp_engine::continuation::handler;
use stomp_engine::{Command, Engine, Frame, Packet, StompCodec, StompItem};
use tokio_util::codec::{Decoder, Encoder};

/// Helper function to verify a decoded frame has the expected command and transaction header
fn verify_transaction_frame(frame: &Frame, expected_command: &str, expected_tx_id: &str) {
    assert_eq!(frame.command, expected_command);
    assert_eq!(frame.get_header("transaction"), Some(expected_tx_id));
}

fn round_trip(command: Command) -> Frame {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(command, &mut buf).expect("encode failed");
    match codec.decode(&mut buf).expect("decode failed") {
        Some(StompItem::Frame(f)) => f,
        other => panic!("expected frame, got {:?}", other),
    }
}

#[test]
fn begin_commit_abort_frames() {
    verify_transaction_frame(&round_trip(Command::begin("tx1").unwrap()), "BEGIN", "tx1");
    verify_transaction_frame(&round_trip(Command::commit("tx1").unwrap()), "COMMIT", "tx1");
    verify_transaction_frame(&round_trip(Command::abort("tx-2").unwrap()), "ABORT", "tx-2");
}

#[test]
fn transactional_send_keeps_body() {
    let frame = round_trip(
        Command::send("/queue/a")
            .unwrap()
            .transaction("tx1")
            .unwrap()
            .body("in tx")
            .unwrap(),
    );
    verify_transaction_frame(&frame, "SEND", "tx1");
    assert_eq!(frame.body, b"in tx");
}

/// Builds commands from a delivered MESSAGE inside the handler.
fn commands_for(raw: &[u8]) -> Vec<String> {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink = out.clone();
    let mut engine = Engine::new();
    engine
        .subscriptions_mut()
        .create_with_id(
            "s1",
            handler(move |p: Packet<'_>| {
                let mut sink = sink.lock().unwrap();
                for cmd in [Command::ack_for(&p), Command::nack_for(&p), Command::commit_for(&p)] {
                    match cmd {
                        Ok(cmd) => sink.push(String::from_utf8_lossy(&cmd.finalize()).into_owned()),
                        Err(err) => sink.push(err.to_string()),
                    }
                }
            }),
        )
        .unwrap();
    engine.feed(raw).unwrap();
    let out = out.lock().unwrap().clone();
    out
}

#[test]
fn acknowledgements_follow_the_message() {
    let out = commands_for(b"MESSAGE\nsubscription:s1\nmessage-id:m1\nack:a1\ntransaction:tx9\n\n\0");
    assert_eq!(
        out,
        vec![
            "ACK\nid:a1\ntransaction:tx9\n\n\0",
            "NACK\nid:a1\ntransaction:tx9\n\n\0",
            "COMMIT\ntransaction:tx9\n\n\0",
        ]
    );
}

#[test]
fn acknowledgement_falls_back_to_message_id() {
    let out = commands_for(b"MESSAGE\nsubscription:s1\nmessage-id:m1\n\n\0");
    assert_eq!(out[0], "ACK\nid:m1\n\n\0");
    assert_eq!(out[2], "transaction must not be empty");
}

#[test]
fn connection_transaction_verbs() {
    let mut conn = logged_on("0,0");
    conn.begin("tx1", None).unwrap();
    conn.send(
        Command::send("/queue/a").unwrap().transaction("tx1").unwrap(),
        None,
    )
    .unwrap();
    conn.commit("tx1", None).unwrap();
    conn.abort("tx2", None).unwrap();
    assert!(conn.begin("", None).is_err());

    let frames = conn.transport().frames();
    assert_eq!(
        &frames[frames.len() - 4..],
        &[
            "BEGIN\ntransaction:tx1\n\n\0",
            "SEND\ndestination:/queue/a\ntransaction:tx1\n\n\0",
            "COMMIT\ntransaction:tx1\n\n\0",
            "ABORT\ntransaction:tx2\n\n\0",
        ]
    );
}
