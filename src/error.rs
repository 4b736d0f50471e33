use std::io;

use thiserror::Error;

use crate::frame::Frame;
use crate::method::Method;

/// Rejections raised while building an outbound command.
///
/// These are returned synchronously from the builder (or from the
/// connection when a verb is not allowed) and never reach the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required argument (destination, transaction, id, ...) was empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("header key must not be empty")]
    EmptyHeaderKey,

    #[error("value of header '{0}' must not be empty")]
    EmptyHeaderValue(String),

    /// Receipts are not requested for SEND frames inside a transaction.
    #[error("a receipt cannot be requested for a transactional SEND")]
    ReceiptOnTransaction,

    /// A body was attached to a command that never carries one.
    #[error("{0} frames do not carry a body")]
    BodyNotAllowed(Method),

    /// SUBSCRIBE needs a message handler and must go through `subscribe`.
    #[error("SUBSCRIBE must be sent through subscribe() with a message handler")]
    MissingHandler,

    /// The command does not match the verb it was passed to.
    #[error("{0} frame not accepted here")]
    WrongMethod(Method),
}

/// Tokenizer faults. Once raised the tokenizer stays faulted until reset.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid frame command: {0:?}")]
    InvalidMethod(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("missing NUL terminator after content-length body")]
    MissingNul,

    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    /// A parser hook refused the frame.
    #[error("frame rejected: {0}")]
    Rejected(String),
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out")]
    Timeout,

    #[error("connection closed by peer")]
    Eof,

    #[error("transport closed")]
    Closed,
}

/// Errors surfaced by [`Connection`](crate::connection::Connection) and
/// [`Client`](crate::client::Client).
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("subscription '{0}' already exists")]
    AlreadyExists(String),

    /// The broker answered with an ERROR frame.
    #[error("broker error: {message}")]
    Broker { message: String, frame: Box<Frame> },

    /// Timed out waiting for a RECEIPT.
    #[error("receipt timeout: {0}")]
    ReceiptTimeout(String),

    /// The connection task is gone (handle outlived the driver).
    #[error("connection task closed")]
    Closed,
}

impl ConnError {
    /// Build a `Broker` error from an ERROR frame, preferring the
    /// `message` header and falling back to the body text.
    pub fn broker(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .map(str::to_owned)
            .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).trim().to_owned());
        ConnError::Broker {
            message,
            frame: Box::new(frame),
        }
    }
}
