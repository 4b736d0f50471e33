//! Inbound dispatch.
//!
//! The engine owns the tokenizer and the per-frame header store. When a
//! frame completes it is routed by command:
//!
//! - CONNECTED records the session and completes the pending logon;
//! - MESSAGE goes to the subscription named by its `subscription` header;
//! - RECEIPT goes to the continuation registered under its `receipt-id`;
//! - ERROR goes to the receipt or subscription it names, else to the
//!   pending logon, else to the connection's error handler.

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::continuation::{Continuation, ExceptionHandler, Exceptions, Handler};
use crate::error::ParseError;
use crate::header::{self, CONTENT_LENGTH};
use crate::header_store::HeaderStore;
use crate::heartbeat::parse_heartbeat_header;
use crate::method::Method;
use crate::packet::Packet;
use crate::parser::{FrameControl, ParserHook, Tokenizer};
use crate::receipt::{ReceiptAction, ReceiptCorrelator};
use crate::subscription::SubscriptionRegistry;

/// Things the connection must react to after a feed.
#[derive(Debug, Default)]
pub(crate) struct Signals {
    /// Broker heart-beat pair from CONNECTED.
    pub(crate) connected: Option<(u64, u64)>,
    /// The DISCONNECT receipt arrived.
    pub(crate) disconnected: bool,
}

#[derive(Default)]
struct Routes {
    receipts: ReceiptCorrelator,
    subscriptions: SubscriptionRegistry,
    logon: Option<Continuation>,
    awaiting_logon: bool,
    on_error: Option<Handler>,
    exceptions: Exceptions,
    signals: Signals,
}

impl Routes {
    fn logged_on(&mut self, heart_beat: (u64, u64), packet: Packet<'_>) {
        self.signals.connected = Some(heart_beat);
        self.awaiting_logon = false;
        if let Some(logon) = self.logon.take() {
            self.exceptions.run("logon", move || logon(packet));
        }
    }

    fn message(&mut self, packet: Packet<'_>) {
        let id = packet
            .header(header::SUBSCRIPTION)
            .filter(|id| self.subscriptions.contains(id))
            .or_else(|| packet.destination().filter(|d| self.subscriptions.contains(d)));
        let Some(id) = id else {
            debug!(subscription = ?packet.subscription(), "no handler for MESSAGE");
            return;
        };
        self.deliver(id, packet);
    }

    fn deliver(&mut self, id: &str, packet: Packet<'_>) {
        if let Err(err) = self.subscriptions.call(id, packet) {
            self.exceptions.report(err);
        }
    }

    fn receipt(&mut self, packet: Packet<'_>) {
        let Some(id) = packet.receipt_id() else {
            debug!("RECEIPT without receipt-id");
            return;
        };
        if !self.settle_receipt(id, packet) {
            debug!(receipt = id, "unknown receipt");
        }
    }

    fn settle_receipt(&mut self, id: &str, packet: Packet<'_>) -> bool {
        let Some(entry) = self.receipts.take(id) else {
            return false;
        };
        let (continuation, action) = entry.into_parts();
        match action {
            ReceiptAction::Plain => self.fire(continuation, packet),
            ReceiptAction::Subscribe(sub) => {
                if packet.is_error() {
                    debug!(subscription = %sub, "subscribe refused, dropping handler");
                    self.subscriptions.remove(&sub);
                }
                self.fire(continuation, packet.with_subscription_id(&sub));
            }
            ReceiptAction::Unsubscribe(sub) => {
                self.fire(continuation, packet);
                for done in self.subscriptions.settle(&sub) {
                    self.exceptions.run("unsubscribe", done);
                }
            }
            ReceiptAction::Disconnect => {
                self.signals.disconnected = true;
                self.fire(continuation, packet);
            }
        }
        true
    }

    fn fire(&mut self, continuation: Option<Continuation>, packet: Packet<'_>) {
        if let Some(continuation) = continuation {
            self.exceptions.run("receipt", move || continuation(packet));
        }
    }

    fn error(&mut self, packet: Packet<'_>) {
        warn!(message = packet.message().unwrap_or_default(), "broker sent ERROR");
        if let Some(id) = packet.receipt_id().filter(|id| self.receipts.contains(id)) {
            self.settle_receipt(id, packet);
            return;
        }
        if let Some(id) = packet
            .header(header::SUBSCRIPTION)
            .filter(|id| self.subscriptions.contains(id))
        {
            self.deliver(id, packet);
            return;
        }
        if self.awaiting_logon {
            self.awaiting_logon = false;
            if let Some(logon) = self.logon.take() {
                self.exceptions.run("logon", move || logon(packet));
            }
            return;
        }
        match self.on_error.as_mut() {
            Some(handler) => self.exceptions.run("error", || handler(packet)),
            None => warn!(frame = %packet.dump(), "unhandled ERROR"),
        }
    }
}

/// Parser hook that assembles frames and routes them.
struct Dispatch {
    headers: HeaderStore,
    session: String,
    method: Option<Method>,
    key: String,
    body: BytesMut,
    routes: Routes,
}

impl ParserHook for Dispatch {
    fn on_frame_start(&mut self, _ctl: &mut FrameControl) {
        self.headers.clear();
        self.method = None;
        self.body.clear();
    }

    fn on_method(&mut self, _ctl: &mut FrameControl, method: Option<Method>, token: &[u8]) {
        if method.is_none() {
            debug!(command = %String::from_utf8_lossy(token), "unknown command");
        }
        self.method = method;
    }

    fn on_header_key(&mut self, ctl: &mut FrameControl, key: &[u8]) {
        match std::str::from_utf8(key) {
            Ok(key) => {
                self.key.clear();
                self.key.push_str(key);
            }
            Err(_) => ctl.reject(ParseError::MalformedHeader(
                String::from_utf8_lossy(key).into_owned(),
            )),
        }
    }

    fn on_header_value(&mut self, ctl: &mut FrameControl, value: &[u8]) {
        let Ok(value) = std::str::from_utf8(value) else {
            ctl.reject(ParseError::MalformedHeader(format!("{}:<non-utf8>", self.key)));
            return;
        };
        if self.headers.set(&self.key, value) && self.key == CONTENT_LENGTH {
            match value.trim().parse() {
                Ok(len) => ctl.set_content_length(len),
                Err(_) => ctl.reject(ParseError::InvalidContentLength(value.to_owned())),
            }
        }
    }

    fn on_body(&mut self, _ctl: &mut FrameControl, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    fn on_frame_end(&mut self, _ctl: &mut FrameControl) {
        let payload = self.body.split().freeze();
        let Some(method) = self.method else {
            return;
        };
        if method == Method::Connected {
            self.session.clear();
            self.session
                .push_str(self.headers.get(header::SESSION).unwrap_or_default());
        }
        let packet = Packet::new(method, &self.headers, &self.session, payload);
        trace!(frame = %packet, "inbound");
        match method {
            Method::Connected => {
                let heart_beat = packet
                    .header(header::HEART_BEAT)
                    .map_or((0, 0), parse_heartbeat_header);
                self.routes.logged_on(heart_beat, packet);
            }
            Method::Message => self.routes.message(packet),
            Method::Receipt => self.routes.receipt(packet),
            Method::Error => self.routes.error(packet),
            other => debug!(command = %other, "ignoring client frame from broker"),
        }
    }

    fn on_heartbeat(&mut self) {
        trace!("heart-beat");
    }
}

/// Tokenizer plus dispatch state for one connection.
pub struct Engine {
    tokenizer: Tokenizer,
    dispatch: Dispatch,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            dispatch: Dispatch {
                headers: HeaderStore::new(),
                session: String::new(),
                method: None,
                key: String::new(),
                body: BytesMut::new(),
                routes: Routes::default(),
            },
        }
    }

    /// Parse `data` and dispatch every frame it completes.
    ///
    /// Returns the bytes consumed, or the tokenizer's fault. A faulted
    /// engine consumes nothing until [`reset`](Self::reset).
    pub fn feed(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        let consumed = self.tokenizer.run(&mut self.dispatch, data);
        match self.tokenizer.fault() {
            Some(err) => Err(err.clone()),
            None => Ok(consumed),
        }
    }

    /// Session id from the last CONNECTED, empty before logon.
    pub fn session(&self) -> &str {
        &self.dispatch.session
    }

    pub fn is_faulted(&self) -> bool {
        self.tokenizer.is_faulted()
    }

    pub fn awaiting_logon(&self) -> bool {
        self.dispatch.routes.awaiting_logon
    }

    pub fn receipts(&self) -> &ReceiptCorrelator {
        &self.dispatch.routes.receipts
    }

    pub fn receipts_mut(&mut self) -> &mut ReceiptCorrelator {
        &mut self.dispatch.routes.receipts
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.dispatch.routes.subscriptions
    }

    pub fn subscriptions_mut(&mut self) -> &mut SubscriptionRegistry {
        &mut self.dispatch.routes.subscriptions
    }

    /// Wait for CONNECTED (or a logon ERROR) and hand it to `continuation`.
    pub fn expect_logon(&mut self, continuation: Option<Continuation>) {
        self.dispatch.routes.awaiting_logon = true;
        self.dispatch.routes.logon = continuation;
    }

    /// Handler for ERROR frames that match nothing else.
    pub fn set_error_handler(&mut self, handler: Handler) {
        self.dispatch.routes.on_error = Some(handler);
    }

    /// Receives panics from every other callback.
    pub fn set_exception_handler(&mut self, handler: ExceptionHandler) {
        self.dispatch.routes.exceptions.set(handler);
    }

    pub(crate) fn register_receipt(
        &mut self,
        id: String,
        continuation: Option<Continuation>,
        action: ReceiptAction,
    ) {
        self.dispatch.routes.receipts.register(id, continuation, action);
    }

    pub(crate) fn take_signals(&mut self) -> Signals {
        std::mem::take(&mut self.dispatch.routes.signals)
    }

    /// Run a callback that is not tied to a frame (connect, event,
    /// barrier notifications) with panic containment.
    pub(crate) fn run_guarded<F: FnOnce()>(&mut self, context: &'static str, f: F) {
        self.dispatch.routes.exceptions.run(context, f);
    }

    /// Forget the session and everything pending. Installed error and
    /// exception handlers survive.
    pub fn reset(&mut self) {
        self.tokenizer.reset();
        let d = &mut self.dispatch;
        d.headers.clear();
        d.session.clear();
        d.method = None;
        d.body.clear();
        d.routes.receipts.clear();
        d.routes.subscriptions.clear();
        d.routes.logon = None;
        d.routes.awaiting_logon = false;
        d.routes.signals = Signals::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::{handler, once};
    use std::sync::{Arc, Mutex};

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn connected_sets_session_and_signals_heart_beat() {
        let seen = log();
        let sink = Arc::clone(&seen);
        let mut engine = Engine::new();
        engine.expect_logon(Some(once(move |p| {
            sink.lock().unwrap().push(p.session().unwrap_or_default().to_owned())
        })));
        engine
            .feed(b"CONNECTED\nversion:1.2\nsession:s-1\nheart-beat:5000,10000\n\n\0")
            .unwrap();
        assert_eq!(engine.session(), "s-1");
        assert!(!engine.awaiting_logon());
        assert_eq!(*seen.lock().unwrap(), ["s-1"]);
        let signals = engine.take_signals();
        assert_eq!(signals.connected, Some((5000, 10000)));
        assert!(engine.take_signals().connected.is_none());
    }

    #[test]
    fn message_split_across_feeds_dispatches_once() {
        let seen = log();
        let sink = Arc::clone(&seen);
        let mut engine = Engine::new();
        engine
            .subscriptions_mut()
            .create_with_id("sub-1", handler(move |p| sink.lock().unwrap().push(p.body_text().into_owned())))
            .unwrap();
        let wire = b"MESSAGE\nsubscription:sub-1\ncontent-length:5\n\nab\0cd\0";
        engine.feed(&wire[..9]).unwrap();
        engine.feed(&wire[9..30]).unwrap();
        engine.feed(&wire[30..]).unwrap();
        assert_eq!(*seen.lock().unwrap(), ["ab\0cd"]);
    }

    #[test]
    fn invalid_content_length_faults_engine() {
        let mut engine = Engine::new();
        let err = engine.feed(b"MESSAGE\ncontent-length:abc\n\n\0").unwrap_err();
        assert_eq!(err, ParseError::InvalidContentLength("abc".into()));
        assert!(engine.is_faulted());
        assert!(engine.feed(b"\n").is_err());
        engine.reset();
        assert_eq!(engine.feed(b"\n").unwrap(), 1);
    }

    #[test]
    fn error_without_route_goes_to_error_handler() {
        let seen = log();
        let sink = Arc::clone(&seen);
        let mut engine = Engine::new();
        engine.set_error_handler(handler(move |p| {
            sink.lock().unwrap().push(p.message().unwrap_or_default().to_owned())
        }));
        engine.feed(b"ERROR\nmessage:bad frame\n\noops\0").unwrap();
        assert_eq!(*seen.lock().unwrap(), ["bad frame"]);
    }

    #[test]
    fn error_during_logon_goes_to_logon_continuation() {
        let seen = log();
        let (logon_sink, error_sink) = (Arc::clone(&seen), Arc::clone(&seen));
        let mut engine = Engine::new();
        engine.set_error_handler(handler(move |_| error_sink.lock().unwrap().push("error".into())));
        engine.expect_logon(Some(once(move |p| {
            logon_sink.lock().unwrap().push(format!("logon {}", p.method()))
        })));
        engine.feed(b"ERROR\nmessage:denied\n\n\0").unwrap();
        assert_eq!(*seen.lock().unwrap(), ["logon ERROR"]);
    }

    #[test]
    fn panics_reach_exception_handler_and_parsing_continues() {
        let seen = log();
        let sink = Arc::clone(&seen);
        let mut engine = Engine::new();
        engine.set_exception_handler(Box::new(move |p| sink.lock().unwrap().push(p.to_string())));
        engine.receipts_mut().insert("r1", once(|_| panic!("receipt blew up")));
        engine.feed(b"RECEIPT\nreceipt-id:r1\n\n\0\n").unwrap();
        assert_eq!(*seen.lock().unwrap(), ["receipt callback panicked: receipt blew up"]);
        assert!(!engine.is_faulted());
    }
}
