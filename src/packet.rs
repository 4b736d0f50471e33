use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

use crate::frame::Frame;
use crate::header;
use crate::header_store::HeaderStore;
use crate::method::Method;

/// Longest body prefix shown by [`Packet::dump`].
const DUMP_PREVIEW: usize = 64;

/// Read-only view of an inbound frame, handed to continuations.
///
/// Headers are borrowed from the engine's header store and are only valid
/// for the duration of the callback; the payload is owned and may be kept.
/// Use [`to_frame`](Self::to_frame) to keep the whole frame.
#[derive(Debug, Clone)]
pub struct Packet<'a> {
    method: Method,
    headers: &'a HeaderStore,
    session: &'a str,
    subscription_id: Option<&'a str>,
    payload: Bytes,
}

impl<'a> Packet<'a> {
    pub(crate) fn new(
        method: Method,
        headers: &'a HeaderStore,
        session: &'a str,
        payload: Bytes,
    ) -> Self {
        Self {
            method,
            headers,
            session,
            subscription_id: None,
            payload,
        }
    }

    /// Attach the subscription a RECEIPT/ERROR answers, for frames that do
    /// not echo it.
    pub(crate) fn with_subscription_id<'b>(self, id: &'b str) -> Packet<'b>
    where
        'a: 'b,
    {
        Packet {
            method: self.method,
            headers: self.headers,
            session: self.session,
            subscription_id: Some(id),
            payload: self.payload,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn is_error(&self) -> bool {
        self.method == Method::Error
    }

    pub fn header(&self, key: &str) -> Option<&'a str> {
        self.headers.get(key)
    }

    pub fn headers(&self) -> &'a HeaderStore {
        self.headers
    }

    pub fn destination(&self) -> Option<&'a str> {
        self.header(header::DESTINATION)
    }

    pub fn message_id(&self) -> Option<&'a str> {
        self.header(header::MESSAGE_ID)
    }

    /// Id to use when acknowledging this message: the `ack` header, or the
    /// `message-id` for brokers that do not send one.
    pub fn ack_id(&self) -> Option<&'a str> {
        self.header(header::ACK).or_else(|| self.message_id())
    }

    /// Subscription the frame belongs to: the `subscription` header, or the
    /// id filled in for a SUBSCRIBE receipt.
    pub fn subscription(&self) -> Option<&'a str> {
        self.header(header::SUBSCRIPTION).or(self.subscription_id)
    }

    pub fn receipt_id(&self) -> Option<&'a str> {
        self.header(header::RECEIPT_ID)
    }

    pub fn transaction(&self) -> Option<&'a str> {
        self.header(header::TRANSACTION)
    }

    /// Short error description of an ERROR frame.
    pub fn message(&self) -> Option<&'a str> {
        self.header(header::MESSAGE)
    }

    pub fn content_type(&self) -> Option<&'a str> {
        self.header(header::CONTENT_TYPE)
    }

    /// Session id assigned by the broker in CONNECTED.
    pub fn session(&self) -> Option<&'a str> {
        Some(self.session).filter(|s| !s.is_empty())
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Copy the frame out of the callback. Headers are sorted by key.
    pub fn to_frame(&self) -> Frame {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        if let (Some(id), None) = (self.subscription_id, self.header(header::SUBSCRIPTION)) {
            headers.push((header::SUBSCRIPTION.to_owned(), id.to_owned()));
        }
        headers.sort();
        Frame {
            command: self.method.as_str().to_owned(),
            headers,
            body: self.payload.to_vec(),
        }
    }

    /// One-line rendering for trace logs.
    pub fn dump(&self) -> String {
        let mut out = format!("{} {}", self.method, self.headers.dump(" "));
        if !self.payload.is_empty() {
            let shown = self.payload.len().min(DUMP_PREVIEW);
            out.push_str(&format!(
                " | {} bytes: {}",
                self.payload.len(),
                String::from_utf8_lossy(&self.payload[..shown]).escape_debug()
            ));
        }
        out
    }
}

impl fmt::Display for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}
