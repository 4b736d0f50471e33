//! Outbound frame builders.
//!
//! A [`Command`] renders headers straight into a wire buffer as they are
//! pushed. Finalizing adds `content-length` for a non-empty body and the
//! terminating NUL and freezes the buffer, which is then handed to the
//! transport without another copy.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{TransportError, ValidationError};
use crate::header::{self, AckMode, KnownHeader, escape};
use crate::heartbeat::format_heartbeat_header;
use crate::method::Method;
use crate::packet::Packet;
use crate::transport::Transport;

const DUMP_PREVIEW: usize = 32;

/// A STOMP frame under construction.
#[derive(Debug, Clone)]
pub struct Command {
    method: Method,
    head: BytesMut,
    body: BytesMut,
    id: Option<String>,
    transactional: bool,
    heart_beat: Option<(u64, u64)>,
    reply_to: Option<String>,
}

fn millis(d: Duration) -> String {
    d.as_millis().to_string()
}

fn unix_millis(at: SystemTime) -> String {
    millis(at.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO))
}

fn require<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    if value.is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(value)
    }
}

impl Command {
    /// Start a bare frame for `method`.
    pub fn new(method: Method) -> Self {
        let mut head = BytesMut::with_capacity(256);
        head.extend_from_slice(method.as_str().as_bytes());
        Self {
            method,
            head,
            body: BytesMut::new(),
            id: None,
            transactional: false,
            heart_beat: None,
            reply_to: None,
        }
    }

    /// CONNECT for STOMP 1.2. Empty `login`/`passcode` are left out; an
    /// empty `host` becomes `/`.
    pub fn connect(host: &str, login: &str, passcode: &str) -> Self {
        let mut cmd = Command::new(Method::Connect).known(KnownHeader::AcceptVersion12);
        cmd.put(header::HOST, if host.is_empty() { "/" } else { host });
        if !login.is_empty() {
            cmd.put(header::LOGIN, login);
        }
        if !passcode.is_empty() {
            cmd.put(header::PASSCODE, passcode);
        }
        cmd
    }

    /// Advertise heart-beat intervals (milliseconds).
    pub fn heart_beat(mut self, cx: u64, cy: u64) -> Self {
        if self.heart_beat.is_none() {
            self.put(header::HEART_BEAT, &format_heartbeat_header(cx, cy));
            self.heart_beat = Some((cx, cy));
        }
        self
    }

    pub fn send(destination: &str) -> Result<Self, ValidationError> {
        let destination = require("destination", destination)?;
        let mut cmd = Command::new(Method::Send);
        cmd.put(header::DESTINATION, destination);
        Ok(cmd)
    }

    /// SEND whose replies come back on the temporary queue `reply_to`
    /// (RabbitMQ `/temp-queue/...` convention).
    pub fn send_temp(destination: &str, reply_to: &str) -> Result<Self, ValidationError> {
        let reply_to = require("reply-to", reply_to)?;
        let mut cmd = Command::send(destination)?;
        cmd.put(header::REPLY_TO, reply_to);
        cmd.reply_to = Some(reply_to.to_owned());
        Ok(cmd)
    }

    /// SUBSCRIBE without an `ack` header, so the broker default (`auto`)
    /// applies; see [`ack_mode`](Self::ack_mode). The id is minted by the
    /// connection unless set with [`with_id`](Self::with_id).
    pub fn subscribe(destination: &str) -> Result<Self, ValidationError> {
        let destination = require("destination", destination)?;
        let mut cmd = Command::new(Method::Subscribe);
        cmd.put(header::DESTINATION, destination);
        Ok(cmd)
    }

    /// Set the `id` header of a SUBSCRIBE/UNSUBSCRIBE/ACK/NACK.
    pub fn with_id(mut self, id: &str) -> Result<Self, ValidationError> {
        self.set_id(id)?;
        Ok(self)
    }

    pub(crate) fn set_id(&mut self, id: &str) -> Result<(), ValidationError> {
        let id = require("id", id)?;
        if self.id.is_none() {
            self.put(header::ID, id);
            self.id = Some(id.to_owned());
        }
        Ok(())
    }

    pub fn ack_mode(self, mode: AckMode) -> Self {
        self.known(mode.known())
    }

    pub fn unsubscribe(id: &str) -> Result<Self, ValidationError> {
        Command::new(Method::Unsubscribe).with_id(id)
    }

    pub fn ack(id: &str) -> Result<Self, ValidationError> {
        Command::new(Method::Ack).with_id(id)
    }

    pub fn nack(id: &str) -> Result<Self, ValidationError> {
        Command::new(Method::Nack).with_id(id)
    }

    /// ACK the MESSAGE `packet`, inside its transaction if it carries one.
    pub fn ack_for(packet: &Packet<'_>) -> Result<Self, ValidationError> {
        Command::acknowledge(Method::Ack, packet)
    }

    pub fn nack_for(packet: &Packet<'_>) -> Result<Self, ValidationError> {
        Command::acknowledge(Method::Nack, packet)
    }

    fn acknowledge(method: Method, packet: &Packet<'_>) -> Result<Self, ValidationError> {
        let id = packet.ack_id().ok_or(ValidationError::EmptyField("ack"))?;
        let mut cmd = Command::new(method).with_id(id)?;
        if let Some(tx) = packet.transaction() {
            cmd.push(header::TRANSACTION, tx)?;
        }
        Ok(cmd)
    }

    pub fn begin(transaction: &str) -> Result<Self, ValidationError> {
        Command::transaction_frame(Method::Begin, transaction)
    }

    pub fn commit(transaction: &str) -> Result<Self, ValidationError> {
        Command::transaction_frame(Method::Commit, transaction)
    }

    pub fn abort(transaction: &str) -> Result<Self, ValidationError> {
        Command::transaction_frame(Method::Abort, transaction)
    }

    /// COMMIT the transaction `packet` belongs to.
    pub fn commit_for(packet: &Packet<'_>) -> Result<Self, ValidationError> {
        Command::commit(packet.transaction().unwrap_or_default())
    }

    pub fn abort_for(packet: &Packet<'_>) -> Result<Self, ValidationError> {
        Command::abort(packet.transaction().unwrap_or_default())
    }

    fn transaction_frame(method: Method, transaction: &str) -> Result<Self, ValidationError> {
        let transaction = require("transaction", transaction)?;
        let mut cmd = Command::new(method);
        cmd.put(header::TRANSACTION, transaction);
        Ok(cmd)
    }

    pub fn disconnect() -> Self {
        Command::new(Method::Disconnect)
    }

    /// Broker-side CONNECTED.
    pub fn connected(session: &str, server: &str) -> Self {
        let mut cmd = Command::new(Method::Connected).known(KnownHeader::Version12);
        if !session.is_empty() {
            cmd.put(header::SESSION, session);
        }
        if !server.is_empty() {
            cmd.put(header::SERVER, server);
        }
        cmd
    }

    /// Broker-side RECEIPT.
    pub fn receipt(receipt_id: &str) -> Result<Self, ValidationError> {
        let receipt_id = require("receipt-id", receipt_id)?;
        let mut cmd = Command::new(Method::Receipt);
        cmd.put(header::RECEIPT_ID, receipt_id);
        Ok(cmd)
    }

    /// Broker-side ERROR with a short `message` header.
    pub fn error(message: &str) -> Result<Self, ValidationError> {
        let message = require("message", message)?;
        let mut cmd = Command::new(Method::Error);
        cmd.put(header::MESSAGE, message);
        Ok(cmd)
    }

    /// Broker-side MESSAGE.
    pub fn message(destination: &str, subscription: &str, message_id: &str) -> Result<Self, ValidationError> {
        let mut cmd = Command::new(Method::Message);
        cmd.put(header::DESTINATION, require("destination", destination)?);
        cmd.put(header::SUBSCRIPTION, require("subscription", subscription)?);
        cmd.put(header::MESSAGE_ID, require("message-id", message_id)?);
        Ok(cmd)
    }

    /// Add a header (builder style).
    pub fn header(mut self, key: &str, value: &str) -> Result<Self, ValidationError> {
        self.push(key, value)?;
        Ok(self)
    }

    /// Append `key:value`. Both must be non-empty; escaping is applied for
    /// every frame except CONNECT and CONNECTED.
    pub fn push(&mut self, key: &str, value: &str) -> Result<(), ValidationError> {
        if key.is_empty() {
            return Err(ValidationError::EmptyHeaderKey);
        }
        if value.is_empty() {
            return Err(ValidationError::EmptyHeaderValue(key.to_owned()));
        }
        if key == header::TRANSACTION {
            self.transactional = true;
        }
        self.put(key, value);
        Ok(())
    }

    /// Tag the frame with a transaction id.
    pub fn transaction(mut self, transaction: &str) -> Result<Self, ValidationError> {
        let transaction = require("transaction", transaction)?;
        self.push(header::TRANSACTION, transaction)?;
        Ok(self)
    }

    /// Append a prebuilt header.
    pub fn known(mut self, known: KnownHeader) -> Self {
        self.push_known(known);
        self
    }

    pub fn push_known(&mut self, known: KnownHeader) {
        self.put(known.key(), known.value());
    }

    pub fn persistent(self) -> Self {
        self.known(KnownHeader::PersistentTrue)
    }

    pub fn content_type(self, content_type: &str) -> Result<Self, ValidationError> {
        self.header(header::CONTENT_TYPE, content_type)
    }

    /// Per-message TTL (`expiration`, RabbitMQ).
    pub fn expiration(self, ttl: Duration) -> Result<Self, ValidationError> {
        self.header(header::EXPIRATION, &millis(ttl))
    }

    /// Absolute expiry time in milliseconds since the Unix epoch (`expires`).
    pub fn expires_at(self, at: SystemTime) -> Result<Self, ValidationError> {
        self.header(header::EXPIRES, &unix_millis(at))
    }

    /// Message creation time in milliseconds since the Unix epoch.
    pub fn timestamp(self, at: SystemTime) -> Result<Self, ValidationError> {
        self.header(header::TIMESTAMP, &unix_millis(at))
    }

    pub fn priority(self, priority: u8) -> Result<Self, ValidationError> {
        self.header(header::PRIORITY, &priority.to_string())
    }

    /// Unacknowledged messages the broker may push to this subscription.
    pub fn prefetch_count(self, count: u32) -> Result<Self, ValidationError> {
        self.header(header::PREFETCH_COUNT, &count.to_string())
    }

    pub fn durable(self, durable: bool) -> Result<Self, ValidationError> {
        self.header(header::DURABLE, if durable { "true" } else { "false" })
    }

    pub fn auto_delete(self, auto_delete: bool) -> Result<Self, ValidationError> {
        self.header(header::AUTO_DELETE, if auto_delete { "true" } else { "false" })
    }

    /// Queue-level TTL for a declared queue (`x-message-ttl`).
    pub fn message_ttl(self, ttl: Duration) -> Result<Self, ValidationError> {
        self.header(header::MESSAGE_TTL, &millis(ttl))
    }

    /// Queue length limit for a declared queue (`x-max-length`).
    pub fn max_length(self, messages: u64) -> Result<Self, ValidationError> {
        self.header(header::MAX_LENGTH, &messages.to_string())
    }

    /// Set the body (builder style).
    pub fn body(mut self, payload: impl AsRef<[u8]>) -> Result<Self, ValidationError> {
        self.push_payload(payload.as_ref())?;
        Ok(self)
    }

    /// Append to the body. Only SEND, MESSAGE and ERROR carry one.
    pub fn push_payload(&mut self, payload: &[u8]) -> Result<(), ValidationError> {
        if !self.method.has_body() {
            return Err(ValidationError::BodyNotAllowed(self.method));
        }
        self.body.extend_from_slice(payload);
        Ok(())
    }

    fn put(&mut self, key: &str, value: &str) {
        self.head.put_u8(b'\n');
        if self.method.escapes_headers() {
            self.head.extend_from_slice(escape(key).as_bytes());
            self.head.put_u8(b':');
            self.head.extend_from_slice(escape(value).as_bytes());
        } else {
            self.head.extend_from_slice(key.as_bytes());
            self.head.put_u8(b':');
            self.head.extend_from_slice(value.as_bytes());
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The `id` header, if one was set.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn heart_beat_request(&self) -> Option<(u64, u64)> {
        self.heart_beat
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn payload_len(&self) -> usize {
        self.body.len()
    }

    /// Request a receipt. Connection-internal: the caller registers the
    /// matching continuation.
    pub(crate) fn push_receipt(&mut self, receipt_id: &str) {
        self.put(header::RECEIPT, receipt_id);
    }

    /// Render the finished frame.
    pub fn finalize(mut self) -> Bytes {
        if self.body.is_empty() {
            self.head.extend_from_slice(b"\n\n\0");
        } else {
            let len = self.body.len().to_string();
            self.put(header::CONTENT_LENGTH, &len);
            self.head.reserve(self.body.len() + 3);
            self.head.extend_from_slice(b"\n\n");
            self.head.extend_from_slice(&self.body);
            self.head.put_u8(0);
        }
        self.head.freeze()
    }

    /// Finalize and queue on `transport`. Returns the frame size.
    pub fn write<T: Transport + ?Sized>(self, transport: &mut T) -> Result<usize, TransportError> {
        let bytes = self.finalize();
        let len = bytes.len();
        transport.write(bytes)?;
        Ok(len)
    }

    /// One-line rendering for trace logs; passcodes are masked.
    pub fn dump(&self) -> String {
        let head = String::from_utf8_lossy(&self.head);
        let mut out = head
            .split('\n')
            .map(|line| match line.split_once(':') {
                Some((header::PASSCODE, _)) => "passcode:***",
                _ => line,
            })
            .collect::<Vec<_>>()
            .join(" ");
        if !self.body.is_empty() {
            let shown = self.body.len().min(DUMP_PREVIEW);
            out.push_str(&format!(
                " | {} bytes: {}",
                self.body.len(),
                String::from_utf8_lossy(&self.body[..shown]).escape_debug()
            ));
        }
        out
    }
}
