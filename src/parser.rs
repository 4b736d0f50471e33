//! Incremental STOMP tokenizer.
//!
//! The tokenizer is fed arbitrary chunks of the inbound byte stream and
//! reports what it finds through a [`ParserHook`]. It keeps its position
//! between calls, so a frame may be split anywhere: inside the command,
//! a header line, the body, or right before the terminating NUL.

use std::borrow::Cow;

use crate::error::ParseError;
use crate::header::unescape;
use crate::method::Method;

/// Upper bound for a single command or header line.
const MAX_LINE: usize = 64 * 1024;

/// Per-frame control block handed to every hook callback.
///
/// Hooks use it to announce a `content-length` (switching the body to
/// length-delimited mode) or to reject the frame.
#[derive(Debug, Default)]
pub struct FrameControl {
    content_length: Option<usize>,
    error: Option<ParseError>,
}

impl FrameControl {
    /// Declare the body length. Only the first declaration counts.
    pub fn set_content_length(&mut self, len: usize) {
        if self.content_length.is_none() {
            self.content_length = Some(len);
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Fail the frame. The tokenizer enters its fault state once the
    /// current callback returns.
    pub fn reject(&mut self, err: ParseError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Callbacks driven by [`Tokenizer::run`].
///
/// Header keys and values arrive unescaped (except on CONNECT/CONNECTED
/// frames). Body bytes may arrive over several `on_body` calls.
pub trait ParserHook {
    fn on_frame_start(&mut self, _ctl: &mut FrameControl) {}

    /// `method` is `None` for a well-formed command the engine does not
    /// know; `token` always holds the raw command.
    fn on_method(&mut self, ctl: &mut FrameControl, method: Option<Method>, token: &[u8]);

    fn on_header_key(&mut self, ctl: &mut FrameControl, key: &[u8]);

    fn on_header_value(&mut self, ctl: &mut FrameControl, value: &[u8]);

    fn on_body(&mut self, ctl: &mut FrameControl, chunk: &[u8]);

    fn on_frame_end(&mut self, ctl: &mut FrameControl);

    /// A bare EOL between frames.
    fn on_heartbeat(&mut self) {}

    /// Checked after every step; returning `true` makes
    /// [`Tokenizer::run`] return early with the input partly consumed.
    fn should_pause(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Method,
    Headers,
    HeadersCr,
    HeaderLine,
    FixedBody(usize),
    FixedNul,
    OpenBody,
}

/// Byte-level state machine for the STOMP wire format.
#[derive(Debug)]
pub struct Tokenizer {
    state: State,
    line: Vec<u8>,
    unescape: bool,
    ctl: FrameControl,
    fault: Option<ParseError>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            line: Vec::with_capacity(128),
            unescape: true,
            ctl: FrameControl::default(),
            fault: None,
        }
    }

    /// Consume `input`, invoking `hook` for every token.
    ///
    /// Returns the number of bytes consumed. That is all of `input` unless
    /// the hook asks to pause or a fault occurs; after a fault the count
    /// stops at the offending step and every later call consumes nothing
    /// until [`reset`](Self::reset).
    pub fn run<H: ParserHook + ?Sized>(&mut self, hook: &mut H, input: &[u8]) -> usize {
        if self.fault.is_some() {
            return 0;
        }
        let mut pos = 0;
        while pos < input.len() {
            match self.step(hook, &input[pos..]) {
                Ok(n) => pos += n,
                Err(err) => {
                    self.fault = Some(err);
                    break;
                }
            }
            if hook.should_pause() {
                break;
            }
        }
        pos
    }

    /// The sticky fault, if any.
    pub fn fault(&self) -> Option<&ParseError> {
        self.fault.as_ref()
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// `true` between frames.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Return to the initial state, clearing any fault.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.line.clear();
        self.unescape = true;
        self.ctl = FrameControl::default();
        self.fault = None;
    }

    fn step<H: ParserHook + ?Sized>(&mut self, hook: &mut H, input: &[u8]) -> Result<usize, ParseError> {
        match self.state {
            State::Idle => match input[0] {
                b'\n' => {
                    hook.on_heartbeat();
                    Ok(1)
                }
                b'\r' | b'\0' => Ok(1),
                _ => {
                    self.ctl = FrameControl::default();
                    self.line.clear();
                    hook.on_frame_start(&mut self.ctl);
                    check(&mut self.ctl)?;
                    self.state = State::Method;
                    Ok(0)
                }
            },
            State::Method => {
                let (n, complete) = self.take_line(input)?;
                if complete {
                    let token = strip_cr(&self.line);
                    if token.is_empty() || !token.iter().all(u8::is_ascii_uppercase) {
                        return Err(ParseError::InvalidMethod(
                            String::from_utf8_lossy(token).into_owned(),
                        ));
                    }
                    let method = Method::from_bytes(token);
                    self.unescape = method.is_none_or(|m| m.escapes_headers());
                    hook.on_method(&mut self.ctl, method, token);
                    check(&mut self.ctl)?;
                    self.line.clear();
                    self.state = State::Headers;
                }
                Ok(n)
            }
            State::Headers => match input[0] {
                b'\n' => {
                    self.begin_body();
                    Ok(1)
                }
                b'\r' => {
                    self.state = State::HeadersCr;
                    Ok(1)
                }
                _ => {
                    self.state = State::HeaderLine;
                    Ok(0)
                }
            },
            State::HeadersCr => {
                if input[0] != b'\n' {
                    return Err(ParseError::MalformedHeader("\r".to_owned()));
                }
                self.begin_body();
                Ok(1)
            }
            State::HeaderLine => {
                let (n, complete) = self.take_line(input)?;
                if complete {
                    self.emit_header(hook)?;
                    self.line.clear();
                    self.state = State::Headers;
                }
                Ok(n)
            }
            State::FixedBody(remaining) => {
                let take = remaining.min(input.len());
                hook.on_body(&mut self.ctl, &input[..take]);
                check(&mut self.ctl)?;
                self.state = if take == remaining {
                    State::FixedNul
                } else {
                    State::FixedBody(remaining - take)
                };
                Ok(take)
            }
            State::FixedNul => {
                if input[0] != 0 {
                    return Err(ParseError::MissingNul);
                }
                self.finish(hook)?;
                Ok(1)
            }
            State::OpenBody => match input.iter().position(|&b| b == 0) {
                Some(end) => {
                    if end > 0 {
                        hook.on_body(&mut self.ctl, &input[..end]);
                        check(&mut self.ctl)?;
                    }
                    self.finish(hook)?;
                    Ok(end + 1)
                }
                None => {
                    hook.on_body(&mut self.ctl, input);
                    check(&mut self.ctl)?;
                    Ok(input.len())
                }
            },
        }
    }

    fn take_line(&mut self, input: &[u8]) -> Result<(usize, bool), ParseError> {
        let (take, complete) = match input.iter().position(|&b| b == b'\n') {
            Some(eol) => (eol, true),
            None => (input.len(), false),
        };
        self.line.extend_from_slice(&input[..take]);
        if strip_cr(&self.line).len() > MAX_LINE {
            let head = String::from_utf8_lossy(&self.line[..32]).into_owned();
            return Err(ParseError::MalformedHeader(head));
        }
        Ok((take + usize::from(complete), complete))
    }

    fn emit_header<H: ParserHook + ?Sized>(&mut self, hook: &mut H) -> Result<(), ParseError> {
        let line = strip_cr(&self.line);
        let malformed = || ParseError::MalformedHeader(String::from_utf8_lossy(line).into_owned());
        let colon = line.iter().position(|&b| b == b':').ok_or_else(malformed)?;
        if colon == 0 {
            return Err(malformed());
        }
        let (raw_key, raw_value) = (&line[..colon], &line[colon + 1..]);
        let (key, value) = if self.unescape {
            (unescape(raw_key)?, unescape(raw_value)?)
        } else {
            (Cow::Borrowed(raw_key), Cow::Borrowed(raw_value))
        };
        hook.on_header_key(&mut self.ctl, &key);
        check(&mut self.ctl)?;
        hook.on_header_value(&mut self.ctl, &value);
        check(&mut self.ctl)
    }

    fn begin_body(&mut self) {
        self.state = match self.ctl.content_length {
            Some(0) => State::FixedNul,
            Some(len) => State::FixedBody(len),
            None => State::OpenBody,
        };
    }

    fn finish<H: ParserHook + ?Sized>(&mut self, hook: &mut H) -> Result<(), ParseError> {
        hook.on_frame_end(&mut self.ctl);
        self.state = State::Idle;
        check(&mut self.ctl)
    }
}

fn check(ctl: &mut FrameControl) -> Result<(), ParseError> {
    ctl.error.take().map_or(Ok(()), Err)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        body: Vec<u8>,
        reject_key: Option<&'static str>,
    }

    impl ParserHook for Recorder {
        fn on_frame_start(&mut self, _ctl: &mut FrameControl) {
            self.events.push("start".into());
        }

        fn on_method(&mut self, _ctl: &mut FrameControl, method: Option<Method>, token: &[u8]) {
            let label = method.map_or("?", |m| m.as_str());
            self.events
                .push(format!("method {label} {}", String::from_utf8_lossy(token)));
        }

        fn on_header_key(&mut self, ctl: &mut FrameControl, key: &[u8]) {
            if self.reject_key.is_some_and(|k| k.as_bytes() == key) {
                ctl.reject(ParseError::Rejected("unwanted".into()));
            }
            self.events.push(format!("key {}", String::from_utf8_lossy(key)));
        }

        fn on_header_value(&mut self, ctl: &mut FrameControl, value: &[u8]) {
            let text = String::from_utf8_lossy(value).into_owned();
            if self.events.last().is_some_and(|e| e == "key content-length") {
                if let Ok(n) = text.parse() {
                    ctl.set_content_length(n);
                }
            }
            self.events.push(format!("value {text}"));
        }

        fn on_body(&mut self, _ctl: &mut FrameControl, chunk: &[u8]) {
            self.body.extend_from_slice(chunk);
        }

        fn on_frame_end(&mut self, _ctl: &mut FrameControl) {
            self.events.push("end".into());
        }

        fn on_heartbeat(&mut self) {
            self.events.push("heartbeat".into());
        }
    }

    #[test]
    fn parses_a_message_frame() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder::default();
        let wire = b"MESSAGE\ndestination:/queue/a\nsubscription:1\n\nhello\0";
        assert_eq!(tok.run(&mut rec, wire), wire.len());
        assert_eq!(
            rec.events,
            [
                "start",
                "method MESSAGE MESSAGE",
                "key destination",
                "value /queue/a",
                "key subscription",
                "value 1",
                "end",
            ]
        );
        assert_eq!(rec.body, b"hello");
        assert!(tok.is_idle());
    }

    #[test]
    fn byte_at_a_time_matches_single_pass() {
        let wire = b"RECEIPT\r\nreceipt-id:77\r\n\r\n\0\nMESSAGE\ncontent-length:3\n\na\0b\0";
        let mut whole = Recorder::default();
        Tokenizer::new().run(&mut whole, wire);

        let mut tok = Tokenizer::new();
        let mut split = Recorder::default();
        for b in wire.iter() {
            assert_eq!(tok.run(&mut split, std::slice::from_ref(b)), 1);
        }
        assert_eq!(whole.events, split.events);
        assert_eq!(split.body, b"a\0b");
        assert_eq!(split.events.iter().filter(|e| *e == "end").count(), 2);
        assert!(split.events.contains(&"heartbeat".to_string()));
    }

    #[test]
    fn heartbeats_between_frames() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder::default();
        tok.run(&mut rec, b"\n\r\n\n");
        assert_eq!(rec.events, ["heartbeat", "heartbeat", "heartbeat"]);
    }

    #[test]
    fn escapes_are_decoded_except_on_connected() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder::default();
        tok.run(&mut rec, b"MESSAGE\nk\\cx:a\\nb\n\n\0CONNECTED\nweird:a\\cb\n\n\0");
        assert!(rec.events.contains(&"key k:x".to_string()));
        assert!(rec.events.contains(&"value a\nb".to_string()));
        assert!(rec.events.contains(&"value a\\cb".to_string()));
    }

    #[test]
    fn unknown_command_is_reported_without_fault() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder::default();
        tok.run(&mut rec, b"PING\n\n\0");
        assert_eq!(rec.events[1], "method ? PING");
        assert!(!tok.is_faulted());
    }

    #[test]
    fn lowercase_command_faults() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder::default();
        tok.run(&mut rec, b"message\n\n\0");
        assert!(matches!(tok.fault(), Some(ParseError::InvalidMethod(_))));
    }

    #[test]
    fn missing_nul_after_fixed_body_faults_and_sticks() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder::default();
        let consumed = tok.run(&mut rec, b"MESSAGE\ncontent-length:2\n\nabX\0");
        // everything up to the byte where the NUL was expected
        assert_eq!(consumed, 28);
        assert_eq!(tok.fault(), Some(&ParseError::MissingNul));

        let before = rec.events.len();
        assert_eq!(tok.run(&mut rec, b"RECEIPT\nreceipt-id:1\n\n\0"), 0);
        assert_eq!(rec.events.len(), before);

        tok.reset();
        assert!(!tok.is_faulted());
        assert!(tok.run(&mut rec, b"RECEIPT\nreceipt-id:1\n\n\0") > 0);
    }

    #[test]
    fn header_without_colon_faults() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder::default();
        tok.run(&mut rec, b"MESSAGE\nnocolon\n\n\0");
        assert!(matches!(tok.fault(), Some(ParseError::MalformedHeader(_))));
    }

    #[test]
    fn hook_rejection_faults() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder {
            reject_key: Some("evil"),
            ..Default::default()
        };
        tok.run(&mut rec, b"MESSAGE\nevil:1\n\n\0");
        assert_eq!(tok.fault(), Some(&ParseError::Rejected("unwanted".into())));
        assert!(!rec.events.contains(&"end".to_string()));
    }

    #[test]
    fn zero_content_length_expects_nul_immediately() {
        let mut tok = Tokenizer::new();
        let mut rec = Recorder::default();
        tok.run(&mut rec, b"MESSAGE\ncontent-length:0\n\n\0");
        assert!(rec.events.last().is_some_and(|e| e == "end"));
        assert!(rec.body.is_empty());
    }
}
