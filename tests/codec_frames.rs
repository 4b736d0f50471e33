//! Heart-beats, escaping and framing through the `tokio_util` codec.

use bytes::BytesMut;
use stomp_engine::codec::{StompCodec, StompItem};
use stomp_engine::{Command, Frame};
use tokio_util::codec::{Decoder, Encoder};

fn decode_one(codec: &mut StompCodec, buf: &mut BytesMut) -> StompItem {
    codec
        .decode(buf)
        .expect("decode failed")
        .expect("no item")
}

fn decode_frame(raw: &[u8]) -> Frame {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(raw);
    match decode_one(&mut codec, &mut buf) {
        StompItem::Frame(frame) => frame,
        other => panic!("expected frame, got {:?}", other),
    }
}

#[test]
fn decode_single_lf_as_heartbeat() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&[0x0Au8][..]);
    assert_eq!(decode_one(&mut codec, &mut buf), StompItem::Heartbeat);
    assert!(buf.is_empty(), "buffer should be empty after consuming heartbeat");
}

#[test]
fn decode_multiple_consecutive_heartbeats() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&[0x0A, 0x0A, 0x0A][..]);

    assert_eq!(decode_one(&mut codec, &mut buf), StompItem::Heartbeat);
    assert_eq!(buf.len(), 2);
    assert_eq!(decode_one(&mut codec, &mut buf), StompItem::Heartbeat);
    assert_eq!(buf.len(), 1);
    assert_eq!(decode_one(&mut codec, &mut buf), StompItem::Heartbeat);
    assert!(buf.is_empty());
}

#[test]
fn crlf_counts_as_one_heartbeat() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\r\n"[..]);
    assert_eq!(decode_one(&mut codec, &mut buf), StompItem::Heartbeat);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn decode_heartbeat_around_frame() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\nSEND\ndestination:/queue/test\n\nhello\0\n"[..]);

    assert_eq!(decode_one(&mut codec, &mut buf), StompItem::Heartbeat);
    match decode_one(&mut codec, &mut buf) {
        StompItem::Frame(f) => {
            assert_eq!(f.command, "SEND");
            assert_eq!(f.body, b"hello");
        }
        other => panic!("expected frame, got {:?}", other),
    }
    assert_eq!(decode_one(&mut codec, &mut buf), StompItem::Heartbeat);
    assert!(buf.is_empty());
}

#[test]
fn partial_frame_waits_for_more_bytes() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"MESSAGE\nmessage-id:7\n\nhal"[..]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    buf.extend_from_slice(b"f\0");
    match decode_one(&mut codec, &mut buf) {
        StompItem::Frame(f) => {
            assert_eq!(f.get_header("message-id"), Some("7"));
            assert_eq!(f.body, b"half");
        }
        other => panic!("expected frame, got {:?}", other),
    }
}

#[test]
fn content_length_allows_nul_in_body() {
    let frame = decode_frame(b"MESSAGE\ncontent-length:3\n\na\0b\0");
    assert_eq!(frame.body, b"a\0b");
}

#[test]
fn missing_nul_after_content_length_is_an_error() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:1\n\nab\0"[..]);
    let err = codec.decode(&mut buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn first_header_occurrence_wins() {
    let frame = decode_frame(b"MESSAGE\nfoo:first\nfoo:second\n\n\0");
    assert_eq!(frame.get_header("foo"), Some("first"));
}

#[test]
fn unescape_sequences() {
    let frame = decode_frame(b"MESSAGE\nheader:a\\\\b\\nc\\rd\\ce\n\n\0");
    assert_eq!(frame.get_header("header"), Some("a\\b\nc\rd:e"));
}

#[test]
fn unescape_header_key() {
    let frame = decode_frame(b"MESSAGE\nkey\\cwith\\ccolons:value\n\n\0");
    assert_eq!(frame.get_header("key:with:colons"), Some("value"));
}

#[test]
fn invalid_escape_is_rejected() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"MESSAGE\nheader:bad\\tescape\n\n\0"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn connected_headers_are_not_unescaped() {
    let frame = decode_frame(b"CONNECTED\nserver:broker\\c1\n\n\0");
    assert_eq!(frame.get_header("server"), Some("broker\\c1"));
}

#[test]
fn encode_heartbeat() {
    let mut codec = StompCodec::new();
    let mut dst = BytesMut::new();
    codec.encode(StompItem::Heartbeat, &mut dst).expect("encode failed");
    assert_eq!(&dst[..], &[0x0Au8]);
}

#[test]
fn encode_escapes_headers_and_adds_content_length() {
    let mut codec = StompCodec::new();
    let mut dst = BytesMut::new();
    let frame = Frame::new("MESSAGE")
        .header("path", "a:b\\c")
        .set_body(b"hi".to_vec());
    codec.encode(StompItem::Frame(frame), &mut dst).unwrap();
    assert_eq!(&dst[..], b"MESSAGE\npath:a\\cb\\\\c\ncontent-length:2\n\nhi\0");
}

#[test]
fn encode_connect_leaves_headers_raw() {
    let mut codec = StompCodec::new();
    let mut dst = BytesMut::new();
    let frame = Frame::new("CONNECT").header("passcode", "p:w");
    codec.encode(StompItem::Frame(frame), &mut dst).unwrap();
    assert_eq!(&dst[..], b"CONNECT\npasscode:p:w\n\n\0");
}

#[test]
fn escaped_frame_decodes_back() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    let frame = Frame::new("MESSAGE")
        .header("weird", "line1\nline2:\\")
        .set_body(b"payload".to_vec());
    codec.encode(StompItem::Frame(frame.clone()), &mut buf).unwrap();
    match decode_one(&mut codec, &mut buf) {
        StompItem::Frame(decoded) => {
            assert_eq!(decoded.get_header("weird"), Some("line1\nline2:\\"));
            assert_eq!(decoded.body, frame.body);
        }
        other => panic!("expected frame, got {:?}", other),
    }
}

#[test]
fn commands_encode_through_the_codec() {
    let mut codec = StompCodec::new();
    let mut dst = BytesMut::new();
    let cmd = Command::begin("tx-1").unwrap();
    codec.encode(cmd, &mut dst).unwrap();
    assert_eq!(&dst[..], b"BEGIN\ntransaction:tx-1\n\n\0");
}
