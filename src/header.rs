//! Header names, prebuilt header lines and STOMP 1.2 value escaping.

use std::borrow::Cow;

use crate::error::ParseError;

pub const ACCEPT_VERSION: &str = "accept-version";
pub const ACK: &str = "ack";
pub const AUTO_DELETE: &str = "auto-delete";
pub const CONTENT_ENCODING: &str = "content-encoding";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_TYPE: &str = "content-type";
pub const DESTINATION: &str = "destination";
pub const DURABLE: &str = "durable";
pub const EXPIRATION: &str = "expiration";
pub const EXPIRES: &str = "expires";
pub const HEART_BEAT: &str = "heart-beat";
pub const HOST: &str = "host";
pub const ID: &str = "id";
pub const LOGIN: &str = "login";
pub const MESSAGE: &str = "message";
pub const MESSAGE_ID: &str = "message-id";
pub const PASSCODE: &str = "passcode";
pub const PERSISTENT: &str = "persistent";
pub const PREFETCH_COUNT: &str = "prefetch-count";
pub const PRIORITY: &str = "priority";
pub const RECEIPT: &str = "receipt";
pub const RECEIPT_ID: &str = "receipt-id";
pub const REPLY_TO: &str = "reply-to";
pub const SERVER: &str = "server";
pub const SESSION: &str = "session";
pub const SUBSCRIPTION: &str = "subscription";
pub const TIMESTAMP: &str = "timestamp";
pub const TRANSACTION: &str = "transaction";
pub const VERSION: &str = "version";

// RabbitMQ queue arguments, honoured on the SUBSCRIBE that declares a queue.
pub const DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
pub const DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
pub const MAX_LENGTH: &str = "x-max-length";
pub const MAX_LENGTH_BYTES: &str = "x-max-length-bytes";
pub const MAX_PRIORITY: &str = "x-max-priority";
pub const MESSAGE_TTL: &str = "x-message-ttl";

/// Frequently used header lines, stored pre-rendered so builders can
/// append them without formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownHeader {
    AcceptVersion12,
    Version12,
    AckAuto,
    AckClient,
    AckClientIndividual,
    PersistentTrue,
    ContentTypeTextPlain,
    ContentTypeJson,
    ContentTypeXml,
    ContentTypeOctetStream,
    ContentEncodingIdentity,
    ContentEncodingDeflate,
    ContentEncodingGzip,
    ContentEncodingBrotli,
    DurableTrue,
    AutoDeleteFalse,
}

const KNOWN: [(&str, &str); 16] = [
    (ACCEPT_VERSION, "1.2"),
    (VERSION, "1.2"),
    (ACK, "auto"),
    (ACK, "client"),
    (ACK, "client-individual"),
    (PERSISTENT, "true"),
    (CONTENT_TYPE, "text/plain"),
    (CONTENT_TYPE, "application/json"),
    (CONTENT_TYPE, "application/xml"),
    (CONTENT_TYPE, "application/octet-stream"),
    (CONTENT_ENCODING, "identity"),
    (CONTENT_ENCODING, "deflate"),
    (CONTENT_ENCODING, "gzip"),
    (CONTENT_ENCODING, "br"),
    (DURABLE, "true"),
    (AUTO_DELETE, "false"),
];

impl KnownHeader {
    pub const fn key(self) -> &'static str {
        KNOWN[self as usize].0
    }

    pub const fn value(self) -> &'static str {
        KNOWN[self as usize].1
    }
}

/// Acknowledgement modes for SUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// The broker considers a message acknowledged as soon as it is sent.
    #[default]
    Auto,
    /// Cumulative acknowledgement: an ACK covers every earlier message.
    Client,
    /// Each message must be acknowledged on its own.
    ClientIndividual,
}

impl AckMode {
    pub const fn known(self) -> KnownHeader {
        match self {
            AckMode::Auto => KnownHeader::AckAuto,
            AckMode::Client => KnownHeader::AckClient,
            AckMode::ClientIndividual => KnownHeader::AckClientIndividual,
        }
    }

    pub const fn as_str(self) -> &'static str {
        self.known().value()
    }
}

fn needs_escape(b: u8) -> bool {
    matches!(b, b'\\' | b'\r' | b'\n' | b':')
}

/// Escape a header key or value for the wire.
///
/// Backslash, CR, LF and colon become `\\`, `\r`, `\n` and `\c`.
/// Values without special characters are returned borrowed.
pub fn escape(input: &str) -> Cow<'_, str> {
    if !input.bytes().any(needs_escape) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 8);
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`escape`]. Any escape other than the four defined ones is an
/// error.
pub fn unescape(input: &[u8]) -> Result<Cow<'_, [u8]>, ParseError> {
    if !input.contains(&b'\\') {
        return Ok(Cow::Borrowed(input));
    }
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            _ => {
                return Err(ParseError::InvalidEscape(
                    String::from_utf8_lossy(input).into_owned(),
                ));
            }
        }
    }
    Ok(Cow::Owned(out))
}
