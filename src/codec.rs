use std::collections::VecDeque;
use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::error::ParseError;
use crate::frame::Frame;
use crate::header::{CONTENT_LENGTH, escape};
use crate::method::Method;
use crate::parser::{FrameControl, ParserHook, Tokenizer};

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single EOL received between frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF)
    Heartbeat,
}

/// Parser hook that collects owned frames.
#[derive(Default)]
struct Collector {
    current: Option<Frame>,
    key: String,
    ready: VecDeque<StompItem>,
}

impl ParserHook for Collector {
    fn on_method(&mut self, _ctl: &mut FrameControl, _method: Option<Method>, token: &[u8]) {
        self.current = Some(Frame::new(String::from_utf8_lossy(token)));
    }

    fn on_header_key(&mut self, ctl: &mut FrameControl, key: &[u8]) {
        match std::str::from_utf8(key) {
            Ok(key) => self.key = key.to_owned(),
            Err(e) => ctl.reject(ParseError::MalformedHeader(format!("invalid utf8 in header key: {e}"))),
        }
    }

    fn on_header_value(&mut self, ctl: &mut FrameControl, value: &[u8]) {
        let value = match std::str::from_utf8(value) {
            Ok(value) => value,
            Err(e) => {
                ctl.reject(ParseError::MalformedHeader(format!("invalid utf8 in header value: {e}")));
                return;
            }
        };
        let Some(frame) = self.current.as_mut() else {
            return;
        };
        let first = frame.get_header(&self.key).is_none();
        if first && self.key.eq_ignore_ascii_case(CONTENT_LENGTH) {
            match value.trim().parse() {
                Ok(len) => ctl.set_content_length(len),
                Err(_) => ctl.reject(ParseError::InvalidContentLength(value.to_owned())),
            }
        }
        frame.headers.push((std::mem::take(&mut self.key), value.to_owned()));
    }

    fn on_body(&mut self, _ctl: &mut FrameControl, chunk: &[u8]) {
        if let Some(frame) = self.current.as_mut() {
            frame.body.extend_from_slice(chunk);
        }
    }

    fn on_frame_end(&mut self, _ctl: &mut FrameControl) {
        if let Some(frame) = self.current.take() {
            self.ready.push_back(StompItem::Frame(frame));
        }
    }

    fn on_heartbeat(&mut self) {
        self.ready.push_back(StompItem::Heartbeat);
    }

    fn should_pause(&self) -> bool {
        !self.ready.is_empty()
    }
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol on top of the engine's [`Tokenizer`].
///
/// It is the owned-frame counterpart of the callback engine: handy for
/// brokers, proxies and test peers that want `Framed` streams of
/// [`Frame`]s. Decoding consumes exactly one item per call, so a buffer
/// holding `N` heart-beats yields `N` items.
#[derive(Default)]
pub struct StompCodec {
    tokenizer: Tokenizer,
    collector: Collector,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Bytes of an incomplete frame are consumed into the tokenizer's
    /// state; the next call resumes where this one stopped.
    ///
    /// Returns
    /// - `Ok(Some(StompItem))` when a frame or heart-beat completed.
    /// - `Ok(None)` when more bytes are required.
    /// - `Err(io::Error)` with kind `InvalidData` on malformed input. The
    ///   codec stays faulted afterwards.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.collector.ready.pop_front() {
            return Ok(Some(item));
        }
        let consumed = self.tokenizer.run(&mut self.collector, src.chunk());
        src.advance(consumed);
        if let Some(err) = self.tokenizer.fault() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("parse error: {err}"),
            ));
        }
        Ok(self.collector.ready.pop_front())
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = io::Error;

    /// Encode a `StompItem` into `dst`.
    ///
    /// Headers are escaped except on CONNECT/CONNECTED. A `content-length`
    /// header is added for any non-empty body that does not carry one.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) => frame,
        };
        let escapes = frame.method().is_none_or(|m| m.escapes_headers());
        dst.extend_from_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');
        for (k, v) in &frame.headers {
            if escapes {
                dst.extend_from_slice(escape(k).as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(escape(v).as_bytes());
            } else {
                dst.extend_from_slice(k.as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(v.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        let has_length = frame
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(CONTENT_LENGTH));
        if !frame.body.is_empty() && !has_length {
            dst.extend_from_slice(format!("{CONTENT_LENGTH}:{}\n", frame.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

impl Encoder<Command> for StompCodec {
    type Error = io::Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&command.finalize());
        Ok(())
    }
}
