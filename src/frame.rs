use std::fmt;

use crate::method::Method;

/// An owned copy of a STOMP frame.
///
/// The engine hands borrowed [`Packet`](crate::packet::Packet)s to
/// continuations; a `Frame` is what survives the callback, e.g. when a
/// message is forwarded over a channel or decoded by
/// [`StompCodec`](crate::codec::StompCodec). Headers keep wire order and
/// duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. MESSAGE, RECEIPT, SEND)
    pub command: String,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a frame with the given command and no headers or body.
    ///
    /// Parameters
    /// - `command`: the STOMP command name (for example `"MESSAGE"`).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header (builder style).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of `key` (case-sensitive), or `None`.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The command as a [`Method`], if it is one the engine knows.
    pub fn method(&self) -> Option<Method> {
        Method::from_bytes(self.command.as_bytes())
    }

    pub fn is_error(&self) -> bool {
        self.method() == Some(Method::Error)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}
