//! Connection lifecycle.
//!
//! [`Connection`] is a sans-IO state machine: it never blocks and never
//! touches a socket itself. It writes finished frames to a [`Transport`]
//! and is told about I/O through [`on_transport_event`], [`on_data`],
//! [`on_write_timer`] and [`on_timer`]. The tokio driver in
//! [`client`](crate::client) is one such caller; tests drive it directly.
//!
//! [`on_transport_event`]: Connection::on_transport_event
//! [`on_data`]: Connection::on_data
//! [`on_write_timer`]: Connection::on_write_timer
//! [`on_timer`]: Connection::on_timer

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::command::Command;
use crate::continuation::{Continuation, ContinuationPanic, Notify};
use crate::engine::Engine;
use crate::error::{ConnError, ParseError, TransportError, ValidationError};
use crate::heartbeat::{self, Heartbeat};
use crate::id::IdGenerator;
use crate::method::Method;
use crate::options::ConnectOptions;
use crate::packet::Packet;
use crate::receipt::ReceiptAction;
use crate::subscription::Drain;
use crate::transport::{Endpoint, TimerId, Transport, TransportEvent};

/// Where a connection is in its lifecycle.
///
/// Failures return the connection to `Ready`; the cause is reported to the
/// event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Connecting,
    Running,
}

/// Why a connection left the running state.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The broker closed the stream.
    Eof,
    Error(TransportError),
    /// Nothing was received within the negotiated heart-beat window.
    Timeout,
    /// The inbound stream could not be parsed.
    Protocol(ParseError),
    /// Closed locally, by `disconnect` or `close`.
    Closed,
}

pub type EventHandler = Box<dyn FnMut(&ConnectionEvent) + Send>;

struct Closing {
    waiters: Vec<Notify>,
    disconnect_sent: bool,
}

/// A single STOMP session over a [`Transport`].
pub struct Connection<T: Transport> {
    transport: T,
    engine: Engine,
    options: ConnectOptions,
    ids: IdGenerator,
    status: Status,
    on_connect: Option<Notify>,
    on_event: Option<EventHandler>,
    heartbeat_request: (u64, u64),
    heartbeat: Heartbeat,
    closing: Option<Closing>,
    drained: Arc<AtomicBool>,
    bytes_read: u64,
    bytes_written: u64,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, options: ConnectOptions) -> Self {
        let ids = IdGenerator::new(options.epoch_value().clone());
        Self {
            transport,
            engine: Engine::new(),
            options,
            ids,
            status: Status::Ready,
            on_connect: None,
            on_event: None,
            heartbeat_request: (0, 0),
            heartbeat: Heartbeat::default(),
            closing: None,
            drained: Arc::new(AtomicBool::new(false)),
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Called whenever the connection leaves the running state.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: FnMut(&ConnectionEvent) + Send + 'static,
    {
        self.on_event = Some(Box::new(handler));
    }

    /// Called for ERROR frames no receipt, subscription or logon claims.
    pub fn on_error<F>(&mut self, handler: F)
    where
        F: for<'a> FnMut(Packet<'a>) + Send + 'static,
    {
        self.engine.set_error_handler(Box::new(handler));
    }

    /// Called with panics caught in any other callback.
    pub fn on_exception<F>(&mut self, handler: F)
    where
        F: FnMut(ContinuationPanic) + Send + 'static,
    {
        self.engine.set_exception_handler(Box::new(handler));
    }

    /// Open the transport to `endpoint`.
    ///
    /// Parameters
    /// - `endpoint`: broker address.
    /// - `on_connect`: runs once the transport reports it is connected.
    ///
    /// Returns `AlreadyConnected` unless the connection is `Ready`.
    pub fn connect<F>(&mut self, endpoint: &Endpoint, on_connect: F) -> Result<(), ConnError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.status != Status::Ready {
            return Err(ConnError::AlreadyConnected);
        }
        info!(%endpoint, "connecting");
        self.transport
            .connect(endpoint, self.options.connect_timeout_value())?;
        self.status = Status::Connecting;
        self.on_connect = Some(Box::new(on_connect));
        Ok(())
    }

    pub fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if self.status != Status::Connecting {
                    warn!(status = ?self.status, "unexpected connect notification");
                    return;
                }
                let epoch = self.ids.next_connection();
                self.status = Status::Running;
                self.transport.enable_read();
                debug!(connection = epoch, "transport connected");
                if let Some(on_connect) = self.on_connect.take() {
                    self.engine.run_guarded("connect", on_connect);
                }
            }
            TransportEvent::Eof => {
                let graceful = self.closing.as_ref().is_some_and(|c| c.disconnect_sent);
                self.teardown(if graceful {
                    ConnectionEvent::Closed
                } else {
                    ConnectionEvent::Eof
                });
            }
            TransportEvent::Error(err) => self.teardown(ConnectionEvent::Error(err)),
            TransportEvent::Timeout => self.teardown(ConnectionEvent::Timeout),
        }
    }

    /// Feed inbound bytes.
    pub fn on_data(&mut self, data: &[u8]) {
        if self.status != Status::Running {
            debug!(len = data.len(), "dropping data, connection not running");
            return;
        }
        self.bytes_read += data.len() as u64;
        if let Err(err) = self.engine.feed(data) {
            warn!(error = %err, "protocol fault");
            self.teardown(ConnectionEvent::Protocol(err));
            return;
        }
        if self.heartbeat.read.is_some() {
            self.transport.set_read_timeout(self.heartbeat.read);
        }
        self.apply_signals();
        self.advance_close();
    }

    /// The periodic write timer fired: send a heart-beat unless output is
    /// already queued.
    pub fn on_write_timer(&mut self) {
        if self.status != Status::Running {
            return;
        }
        if self.transport.pending_output() > 0 {
            trace!("output queued, skipping heart-beat");
            return;
        }
        match self.transport.write(Bytes::from_static(b"\n")) {
            Ok(()) => {
                self.bytes_written += 1;
                trace!("heart-beat sent");
            }
            Err(err) => warn!(error = %err, "heart-beat write failed"),
        }
    }

    pub fn on_timer(&mut self, timer: TimerId) {
        match timer {
            TimerId::DisconnectDeadline => {
                if self.closing.is_some() {
                    warn!("no DISCONNECT receipt before deadline");
                    self.teardown(ConnectionEvent::Closed);
                }
            }
        }
    }

    /// Send a prepared command.
    ///
    /// Parameters
    /// - `command`: the frame to send. CONNECT/STOMP start a logon and
    ///   UNSUBSCRIBE drops the matching handler. SUBSCRIBE must go
    ///   through [`subscribe`](Self::subscribe).
    /// - `continuation`: when given, a receipt is requested and the
    ///   continuation receives the RECEIPT (or ERROR). For a logon it
    ///   receives CONNECTED (or ERROR) instead.
    ///
    /// Returns the receipt id, if one was requested.
    pub fn send(&mut self, command: Command, continuation: Option<Continuation>) -> Result<Option<String>, ConnError> {
        self.require_running()?;
        let action = match command.method() {
            Method::Connect | Method::Stomp => {
                self.heartbeat_request = command.heart_beat_request().unwrap_or((0, 0));
                self.engine.expect_logon(continuation);
                self.transmit(command)?;
                return Ok(None);
            }
            Method::Subscribe => return Err(ValidationError::MissingHandler.into()),
            Method::Unsubscribe => {
                let id = command
                    .id()
                    .map(str::to_owned)
                    .ok_or(ValidationError::EmptyField("id"))?;
                self.engine.subscriptions_mut().remove(&id);
                ReceiptAction::Unsubscribe(id)
            }
            Method::Disconnect => ReceiptAction::Disconnect,
            Method::Send if continuation.is_some() && command.is_transactional() => {
                return Err(ValidationError::ReceiptOnTransaction.into());
            }
            _ => ReceiptAction::Plain,
        };
        self.send_with(command, continuation, action)
    }

    /// Send CONNECT. `continuation` receives CONNECTED or the logon ERROR.
    pub fn logon(&mut self, command: Command, continuation: Option<Continuation>) -> Result<(), ConnError> {
        if !matches!(command.method(), Method::Connect | Method::Stomp) {
            return Err(ValidationError::WrongMethod(command.method()).into());
        }
        self.send(command, continuation).map(|_| ())
    }

    /// Subscribe and register `handler` for the messages.
    ///
    /// The subscription id is taken from the command or minted. When the
    /// broker refuses the subscription (ERROR answering its receipt) the
    /// handler is dropped again. The receipt packet passed to
    /// `continuation` carries the subscription id.
    ///
    /// Returns the subscription id.
    pub fn subscribe<H>(&mut self, mut command: Command, handler: H, continuation: Option<Continuation>) -> Result<String, ConnError>
    where
        H: for<'a> FnMut(Packet<'a>) + Send + 'static,
    {
        self.require_running()?;
        if command.method() != Method::Subscribe {
            return Err(ValidationError::WrongMethod(command.method()).into());
        }
        let id = match command.id() {
            Some(id) => id.to_owned(),
            None => {
                let id = self.ids.subscription();
                command.set_id(&id)?;
                id
            }
        };
        self.engine
            .subscriptions_mut()
            .create_with_id(id.clone(), Box::new(handler))?;
        if let Err(err) = self.send_with(command, continuation, ReceiptAction::Subscribe(id.clone())) {
            self.engine.subscriptions_mut().remove(&id);
            return Err(err);
        }
        debug!(subscription = %id, "subscribed");
        Ok(id)
    }

    /// SEND with `reply-to`, routing replies on the reply queue to
    /// `handler`. A handler already registered for that queue is replaced.
    pub fn send_temp<H>(&mut self, command: Command, handler: H, continuation: Option<Continuation>) -> Result<Option<String>, ConnError>
    where
        H: for<'a> FnMut(Packet<'a>) + Send + 'static,
    {
        self.require_running()?;
        let reply_to = command
            .reply_to()
            .map(str::to_owned)
            .ok_or(ValidationError::EmptyField("reply-to"))?;
        let registry = self.engine.subscriptions_mut();
        registry.remove(&reply_to);
        registry.create_with_id(reply_to, Box::new(handler))?;
        self.send(command, continuation)
    }

    pub fn unsubscribe(&mut self, id: &str, continuation: Option<Continuation>) -> Result<(), ConnError> {
        self.send(Command::unsubscribe(id)?, continuation).map(|_| ())
    }

    pub fn ack(&mut self, id: &str, continuation: Option<Continuation>) -> Result<(), ConnError> {
        self.send(Command::ack(id)?, continuation).map(|_| ())
    }

    pub fn nack(&mut self, id: &str, continuation: Option<Continuation>) -> Result<(), ConnError> {
        self.send(Command::nack(id)?, continuation).map(|_| ())
    }

    pub fn begin(&mut self, transaction: &str, continuation: Option<Continuation>) -> Result<(), ConnError> {
        self.send(Command::begin(transaction)?, continuation).map(|_| ())
    }

    pub fn commit(&mut self, transaction: &str, continuation: Option<Continuation>) -> Result<(), ConnError> {
        self.send(Command::commit(transaction)?, continuation).map(|_| ())
    }

    pub fn abort(&mut self, transaction: &str, continuation: Option<Continuation>) -> Result<(), ConnError> {
        self.send(Command::abort(transaction)?, continuation).map(|_| ())
    }

    /// Unsubscribe every live subscription; `done` runs once the broker
    /// has confirmed all of them (immediately if there are none).
    pub fn unsubscribe_all<F>(&mut self, done: F) -> Result<(), ConnError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.require_running()?;
        self.drain_subscriptions(Box::new(done))
    }

    fn drain_subscriptions(&mut self, done: Notify) -> Result<(), ConnError> {
        match self.engine.subscriptions_mut().unsubscribe_all(done) {
            Drain::Complete(done) => self.engine.run_guarded("unsubscribe", done),
            Drain::Pending(ids) => {
                for id in ids {
                    let command = Command::unsubscribe(&id)?;
                    self.send_with(command, None, ReceiptAction::Unsubscribe(id))?;
                }
            }
        }
        Ok(())
    }

    /// Graceful shutdown: unsubscribe everything, send DISCONNECT with a
    /// receipt, then close once the receipt arrives or the disconnect
    /// timeout passes. `done` runs when the connection is closed.
    ///
    /// Calling it again while closing (or when not connected) does not
    /// start another shutdown.
    pub fn disconnect<F>(&mut self, done: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let done: Notify = Box::new(done);
        match self.status {
            Status::Ready => {
                debug!("disconnect: not connected");
                self.engine.run_guarded("disconnect", done);
            }
            Status::Connecting => {
                self.closing = Some(Closing {
                    waiters: vec![done],
                    disconnect_sent: false,
                });
                self.teardown(ConnectionEvent::Closed);
            }
            Status::Running => {
                if let Some(closing) = self.closing.as_mut() {
                    closing.waiters.push(done);
                    return;
                }
                info!("disconnecting");
                self.closing = Some(Closing {
                    waiters: vec![done],
                    disconnect_sent: false,
                });
                self.transport
                    .schedule_once(self.options.disconnect_timeout_value(), TimerId::DisconnectDeadline);
                let drained = Arc::clone(&self.drained);
                let flag: Notify = Box::new(move || drained.store(true, Ordering::Release));
                if let Err(err) = self.drain_subscriptions(flag) {
                    warn!(error = %err, "unsubscribe during disconnect failed");
                    self.teardown(ConnectionEvent::Closed);
                    return;
                }
                self.advance_close();
            }
        }
    }

    /// Drop the connection without the DISCONNECT handshake.
    pub fn close(&mut self) {
        self.teardown(ConnectionEvent::Closed);
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    /// Session id from CONNECTED, empty before logon.
    pub fn session(&self) -> &str {
        self.engine.session()
    }

    /// Mint an id for stamping a caller-built frame (a `message-id` or
    /// correlation header). Ids never repeat within the connection's
    /// [`Epoch`](crate::id::Epoch), across reconnects included.
    pub fn message_id(&mut self) -> String {
        self.ids.message()
    }

    /// Mint a subscription id, e.g. for [`Command::with_id`].
    pub fn subscription_id(&mut self) -> String {
        self.ids.subscription()
    }

    pub fn receipt_id(&mut self) -> String {
        self.ids.receipt()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Negotiated heart-beat timers (both `None` before logon).
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn require_running(&self) -> Result<(), ConnError> {
        if self.status == Status::Running {
            Ok(())
        } else {
            Err(ConnError::NotConnected)
        }
    }

    fn send_with(&mut self, mut command: Command, continuation: Option<Continuation>, action: ReceiptAction) -> Result<Option<String>, ConnError> {
        let receipt = match (continuation, action) {
            (None, ReceiptAction::Plain) => None,
            (continuation, action) => {
                let id = self.ids.receipt();
                command.push_receipt(&id);
                self.engine.register_receipt(id.clone(), continuation, action);
                Some(id)
            }
        };
        if let Err(err) = self.transmit(command) {
            if let Some(id) = &receipt {
                self.engine.receipts_mut().cancel(id);
            }
            return Err(err);
        }
        Ok(receipt)
    }

    fn transmit(&mut self, command: Command) -> Result<(), ConnError> {
        trace!(frame = %command.dump(), "outbound");
        let written = command.write(&mut self.transport)?;
        self.bytes_written += written as u64;
        if self.heartbeat.write.is_some() {
            self.transport.set_write_timer(self.heartbeat.write);
        }
        Ok(())
    }

    fn apply_signals(&mut self) {
        let signals = self.engine.take_signals();
        if let Some(server) = signals.connected {
            self.heartbeat = heartbeat::timers(
                self.heartbeat_request,
                server,
                self.options.read_tolerance_factor(),
                self.options.write_tolerance_factor(),
            );
            info!(
                session = self.engine.session(),
                write = ?self.heartbeat.write,
                read = ?self.heartbeat.read,
                "logged on"
            );
            self.transport.set_write_timer(self.heartbeat.write);
            self.transport.set_read_timeout(self.heartbeat.read);
        }
        if signals.disconnected {
            self.teardown(ConnectionEvent::Closed);
        }
    }

    /// Once the unsubscribe barrier has drained, send DISCONNECT.
    fn advance_close(&mut self) {
        if self.status != Status::Running || !self.drained.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(closing) = self.closing.as_mut() else {
            return;
        };
        closing.disconnect_sent = true;
        if let Err(err) = self.send_with(Command::disconnect(), None, ReceiptAction::Disconnect) {
            warn!(error = %err, "DISCONNECT write failed");
            self.teardown(ConnectionEvent::Closed);
        }
    }

    fn teardown(&mut self, event: ConnectionEvent) {
        if self.status == Status::Ready {
            return;
        }
        match &event {
            ConnectionEvent::Closed => info!("connection closed"),
            other => warn!(event = ?other, "connection lost"),
        }
        self.transport.cancel_timers();
        self.transport.close();
        self.engine.reset();
        self.status = Status::Ready;
        self.heartbeat = Heartbeat::default();
        self.on_connect = None;
        self.drained.store(false, Ordering::Release);
        if let Some(closing) = self.closing.take() {
            for done in closing.waiters {
                self.engine.run_guarded("disconnect", done);
            }
        }
        if let Some(handler) = self.on_event.as_mut() {
            self.engine.run_guarded("event", || handler(&event));
        }
    }
}
