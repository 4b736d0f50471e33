//! Tokio driver for [`Connection`].
//!
//! [`Client::spawn`] moves a connection onto a background task that owns
//! the socket and every timer. The returned [`Client`] is a cheap, cloneable
//! handle: each request is a closure sent over a channel and run on the
//! task with exclusive access to the connection, so connection state is
//! never shared between threads.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::future;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, warn};

use crate::command::Command;
use crate::connection::{Connection, ConnectionEvent, Status};
use crate::continuation::once;
use crate::error::{ConnError, TransportError};
use crate::frame::Frame;
use crate::header::{self, AckMode};
use crate::id::IdKind;
use crate::options::ConnectOptions;
use crate::packet::Packet;
use crate::transport::{Endpoint, TimerId, Transport, TransportEvent};

/// Messages buffered per channel-backed subscription.
const SUBSCRIPTION_BUFFER: usize = 64;

type Request = Box<dyn FnOnce(&mut Connection<TcpTransport>) + Send>;

/// [`Transport`] state owned by the driver task.
///
/// The connection records intents here (bytes to write, timers to arm);
/// the driver loop turns them into socket I/O and sleeps.
#[derive(Debug, Default)]
pub struct TcpTransport {
    connect: Option<(Endpoint, Option<Duration>)>,
    connected: bool,
    reading: bool,
    close_requested: bool,
    connect_failure: Option<TransportError>,
    outbound: VecDeque<Bytes>,
    pending: usize,
    read_deadline: Option<Instant>,
    write_interval: Option<Duration>,
    write_due: Option<Instant>,
    timers: Vec<(Instant, TimerId)>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_connect(&mut self) -> Option<(Endpoint, Option<Duration>)> {
        self.connect.take()
    }

    fn take_close(&mut self) -> bool {
        std::mem::take(&mut self.close_requested)
    }

    fn front(&self) -> Option<Bytes> {
        self.outbound.front().cloned()
    }

    fn consume(&mut self, mut written: usize) {
        self.pending = self.pending.saturating_sub(written);
        while written > 0 {
            let Some(front) = self.outbound.front_mut() else {
                break;
            };
            if written < front.len() {
                front.advance(written);
                break;
            }
            written -= front.len();
            self.outbound.pop_front();
        }
    }

    fn next_timer(&self) -> Option<Instant> {
        self.timers.iter().map(|(at, _)| *at).min()
    }

    fn pop_due_timer(&mut self, now: Instant) -> Option<TimerId> {
        let pos = self.timers.iter().position(|(at, _)| *at <= now)?;
        Some(self.timers.swap_remove(pos).1)
    }

    fn rearm_write_timer(&mut self) {
        self.write_due = self.write_interval.map(|i| Instant::now() + i);
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, endpoint: &Endpoint, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.connect = Some((endpoint.clone(), timeout));
        Ok(())
    }

    fn enable_read(&mut self) {
        self.reading = true;
    }

    fn write(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.pending += data.len();
        self.outbound.push_back(data);
        Ok(())
    }

    fn pending_output(&self) -> usize {
        self.pending
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_deadline = timeout.map(|t| Instant::now() + t);
    }

    fn set_write_timer(&mut self, interval: Option<Duration>) {
        self.write_interval = interval;
        self.rearm_write_timer();
    }

    fn schedule_once(&mut self, delay: Duration, timer: TimerId) {
        self.timers.push((Instant::now() + delay, timer));
    }

    fn cancel_timers(&mut self) {
        self.read_deadline = None;
        self.write_interval = None;
        self.write_due = None;
        self.timers.clear();
    }

    fn close(&mut self) {
        self.close_requested = true;
        self.connected = false;
        self.reading = false;
        self.outbound.clear();
        self.pending = 0;
    }
}

enum Wake {
    Request(Option<Request>),
    Read(io::Result<usize>),
    Wrote(io::Result<usize>),
    ReadTimeout,
    WriteTimer,
    Timer,
}

async fn open(endpoint: &Endpoint, limit: Option<Duration>) -> Result<TcpStream, TransportError> {
    let connect = TcpStream::connect((endpoint.host(), endpoint.port()));
    let stream = match limit {
        Some(limit) => timeout(limit, connect)
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => connect.await,
    }
    .map_err(TransportError::Connect)?;
    if let Err(err) = stream.set_nodelay(true) {
        warn!(error = %err, "failed to set TCP_NODELAY");
    }
    Ok(stream)
}

fn duplicate(err: &TransportError) -> TransportError {
    let copy = |e: &io::Error| io::Error::new(e.kind(), e.to_string());
    match err {
        TransportError::Connect(e) => TransportError::Connect(copy(e)),
        TransportError::Io(e) => TransportError::Io(copy(e)),
        TransportError::Timeout => TransportError::Timeout,
        TransportError::Eof => TransportError::Eof,
        TransportError::Closed => TransportError::Closed,
    }
}

async fn read_some(reader: Option<&mut OwnedReadHalf>, buf: &mut BytesMut) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read_buf(buf).await,
        None => future::pending().await,
    }
}

async fn write_some(writer: Option<&mut OwnedWriteHalf>, data: Option<Bytes>) -> io::Result<usize> {
    match (writer, data) {
        (Some(writer), Some(data)) => writer.write(&data).await,
        _ => future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending::<()>().await,
    }
}

async fn drive(mut conn: Connection<TcpTransport>, mut requests: mpsc::UnboundedReceiver<Request>) {
    let read_size = conn.options().read_buffer_size();
    let mut socket: Option<(OwnedReadHalf, OwnedWriteHalf)> = None;
    let mut buf = BytesMut::with_capacity(read_size);

    loop {
        if conn.transport_mut().take_close() && socket.take().is_some() {
            debug!("socket closed");
        }
        if let Some((endpoint, limit)) = conn.transport_mut().take_connect() {
            match open(&endpoint, limit).await {
                Ok(stream) => {
                    socket = Some(stream.into_split());
                    conn.transport_mut().connected = true;
                    conn.on_transport_event(TransportEvent::Connected);
                }
                Err(err) => {
                    let event = TransportEvent::Error(duplicate(&err));
                    conn.transport_mut().connect_failure = Some(err);
                    conn.on_transport_event(event);
                }
            }
            continue;
        }

        let transport = conn.transport();
        let reading = transport.reading && socket.is_some();
        let front = socket.as_ref().and(transport.front());
        let writing = front.is_some();
        let read_deadline = transport.read_deadline;
        let write_due = transport.write_due;
        let timer_due = transport.next_timer();
        let (has_read_deadline, has_write_due, has_timer) =
            (read_deadline.is_some(), write_due.is_some(), timer_due.is_some());
        let (reader, writer) = match socket.as_mut() {
            Some((reader, writer)) => (Some(reader), Some(writer)),
            None => (None, None),
        };
        if reading {
            buf.reserve(read_size);
        }

        let wake = tokio::select! {
            request = requests.recv() => Wake::Request(request),
            res = read_some(reader, &mut buf), if reading => Wake::Read(res),
            res = write_some(writer, front), if writing => Wake::Wrote(res),
            _ = sleep_opt(read_deadline), if has_read_deadline => Wake::ReadTimeout,
            _ = sleep_opt(write_due), if has_write_due => Wake::WriteTimer,
            _ = sleep_opt(timer_due), if has_timer => Wake::Timer,
        };

        match wake {
            Wake::Request(Some(request)) => request(&mut conn),
            Wake::Request(None) => {
                debug!("all client handles dropped, stopping");
                conn.close();
                break;
            }
            Wake::Read(Ok(0)) => conn.on_transport_event(TransportEvent::Eof),
            Wake::Read(Ok(_)) => {
                conn.on_data(&buf);
                buf.clear();
            }
            Wake::Read(Err(err)) => conn.on_transport_event(TransportEvent::Error(err.into())),
            Wake::Wrote(Ok(0)) => {
                let err = io::Error::from(io::ErrorKind::WriteZero);
                conn.on_transport_event(TransportEvent::Error(err.into()));
            }
            Wake::Wrote(Ok(n)) => conn.transport_mut().consume(n),
            Wake::Wrote(Err(err)) => conn.on_transport_event(TransportEvent::Error(err.into())),
            Wake::ReadTimeout => conn.on_transport_event(TransportEvent::Timeout),
            Wake::WriteTimer => {
                conn.transport_mut().rearm_write_timer();
                conn.on_write_timer();
            }
            Wake::Timer => {
                while let Some(timer) = conn.transport_mut().pop_due_timer(Instant::now()) {
                    conn.on_timer(timer);
                }
            }
        }
    }
}

/// Handle to a connection running on a tokio task.
#[derive(Clone)]
pub struct Client {
    requests: mpsc::UnboundedSender<Request>,
}

impl Client {
    /// Start the driver task. The task stops once every `Client` clone
    /// (including those captured by callbacks) has been dropped.
    pub fn spawn(options: ConnectOptions) -> (Client, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(TcpTransport::new(), options);
        let handle = tokio::spawn(drive(conn, rx));
        (Client { requests: tx }, handle)
    }

    /// Queue `f` to run on the driver task without waiting. Safe to call
    /// from inside callbacks.
    pub fn post<F>(&self, f: F) -> Result<(), ConnError>
    where
        F: FnOnce(&mut Connection<TcpTransport>) + Send + 'static,
    {
        self.requests
            .send(Box::new(f))
            .map_err(|_| ConnError::Closed)
    }

    /// Run `f` on the driver task and return its result.
    pub async fn call<F, R>(&self, f: F) -> Result<R, ConnError>
    where
        F: FnOnce(&mut Connection<TcpTransport>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move |conn| {
            let _ = tx.send(f(conn));
        })?;
        rx.await.map_err(|_| ConnError::Closed)
    }

    /// Open the TCP connection. Resolves once connected, or with the
    /// transport error that prevented it.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), ConnError> {
        let (tx, rx) = oneshot::channel();
        self.call(move |conn| {
            conn.transport_mut().connect_failure = None;
            conn.connect(&endpoint, move || {
                let _ = tx.send(());
            })
        })
        .await??;
        if rx.await.is_ok() {
            return Ok(());
        }
        let failure = self
            .call(|conn| conn.transport_mut().connect_failure.take())
            .await?;
        Err(failure.map_or(ConnError::NotConnected, ConnError::Transport))
    }

    /// Send CONNECT and wait for the broker's answer.
    ///
    /// Returns the CONNECTED frame, or `Broker` when the broker answered
    /// with ERROR.
    pub async fn logon(&self, command: Command) -> Result<Frame, ConnError> {
        let (tx, rx) = oneshot::channel();
        let reply = once(move |p: Packet<'_>| {
            let _ = tx.send(p.to_frame());
        });
        self.call(move |conn| conn.logon(command, Some(reply))).await??;
        let frame = rx.await.map_err(|_| ConnError::NotConnected)?;
        if frame.is_error() {
            return Err(ConnError::broker(frame));
        }
        Ok(frame)
    }

    /// Connect and log on with the virtual host and heart-beat pair from
    /// the options.
    pub async fn login(&self, endpoint: Endpoint, login: &str, passcode: &str) -> Result<Frame, ConnError> {
        let (host, (cx, cy)) = self
            .call(|conn| {
                let options = conn.options();
                (options.host_value().to_owned(), options.heartbeat_request())
            })
            .await?;
        self.connect(endpoint).await?;
        self.logon(Command::connect(&host, login, passcode).heart_beat(cx, cy))
            .await
    }

    /// Send without a receipt.
    pub async fn send(&self, command: Command) -> Result<(), ConnError> {
        self.call(move |conn| conn.send(command, None)).await??;
        Ok(())
    }

    /// Send with a receipt and wait up to `wait` for it.
    pub async fn send_confirmed(&self, command: Command, wait: Duration) -> Result<Frame, ConnError> {
        let (tx, rx) = oneshot::channel();
        let reply = once(move |p: Packet<'_>| {
            let _ = tx.send(p.to_frame());
        });
        let receipt = self
            .call(move |conn| conn.send(command, Some(reply)))
            .await??
            .unwrap_or_default();
        match timeout(wait, rx).await {
            Ok(Ok(frame)) if frame.is_error() => Err(ConnError::broker(frame)),
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(ConnError::NotConnected),
            Err(_) => Err(ConnError::ReceiptTimeout(receipt)),
        }
    }

    /// Subscribe and receive messages over a channel. Resolves once the
    /// broker has confirmed the subscription.
    pub async fn subscribe(&self, destination: &str, ack: AckMode) -> Result<Subscription, ConnError> {
        let command = Command::subscribe(destination)?.ack_mode(ack);
        let (msg_tx, msg_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (tx, rx) = oneshot::channel();
        let confirm = once(move |p: Packet<'_>| {
            let _ = tx.send(p.to_frame());
        });
        let forward = move |p: Packet<'_>| {
            if let Err(err) = msg_tx.try_send(p.to_frame()) {
                warn!(error = %err, "dropping message for subscription");
            }
        };
        let id = self
            .call(move |conn| conn.subscribe(command, forward, Some(confirm)))
            .await??;
        let receipt = rx.await.map_err(|_| ConnError::NotConnected)?;
        if receipt.is_error() {
            return Err(ConnError::broker(receipt));
        }
        Ok(Subscription {
            id,
            destination: destination.to_owned(),
            receiver: msg_rx,
            client: self.clone(),
        })
    }

    /// Subscribe with a callback that runs on the driver task.
    pub async fn subscribe_with<H>(&self, command: Command, handler: H) -> Result<String, ConnError>
    where
        H: for<'a> FnMut(Packet<'a>) + Send + 'static,
    {
        self.call(move |conn| conn.subscribe(command, handler, None))
            .await?
    }

    pub async fn unsubscribe(&self, id: &str) -> Result<(), ConnError> {
        let id = id.to_owned();
        self.call(move |conn| conn.unsubscribe(&id, None)).await?
    }

    pub async fn ack(&self, id: &str) -> Result<(), ConnError> {
        let id = id.to_owned();
        self.call(move |conn| conn.ack(&id, None)).await?
    }

    pub async fn nack(&self, id: &str) -> Result<(), ConnError> {
        let id = id.to_owned();
        self.call(move |conn| conn.nack(&id, None)).await?
    }

    pub async fn begin(&self, transaction: &str) -> Result<(), ConnError> {
        let tx = transaction.to_owned();
        self.call(move |conn| conn.begin(&tx, None)).await?
    }

    pub async fn commit(&self, transaction: &str) -> Result<(), ConnError> {
        let tx = transaction.to_owned();
        self.call(move |conn| conn.commit(&tx, None)).await?
    }

    pub async fn abort(&self, transaction: &str) -> Result<(), ConnError> {
        let tx = transaction.to_owned();
        self.call(move |conn| conn.abort(&tx, None)).await?
    }

    /// Graceful disconnect. Resolves once the connection is closed.
    pub async fn disconnect(&self) -> Result<(), ConnError> {
        let (tx, rx) = oneshot::channel();
        self.call(move |conn| {
            conn.disconnect(move || {
                let _ = tx.send(());
            })
        })
        .await?;
        rx.await.map_err(|_| ConnError::Closed)
    }

    /// Drop the connection without the DISCONNECT handshake.
    pub async fn close(&self) -> Result<(), ConnError> {
        self.call(|conn| conn.close()).await
    }

    pub async fn status(&self) -> Result<Status, ConnError> {
        self.call(|conn| conn.status()).await
    }

    pub async fn session(&self) -> Result<String, ConnError> {
        self.call(|conn| conn.session().to_owned()).await
    }

    /// Mint a connection-scoped id of the given kind.
    pub async fn create_id(&self, kind: IdKind) -> Result<String, ConnError> {
        self.call(move |conn| match kind {
            IdKind::Message => conn.message_id(),
            IdKind::Subscription => conn.subscription_id(),
            IdKind::Receipt => conn.receipt_id(),
        })
        .await
    }

    /// Install the connection event handler.
    pub async fn on_event<F>(&self, handler: F) -> Result<(), ConnError>
    where
        F: FnMut(&ConnectionEvent) + Send + 'static,
    {
        self.call(move |conn| conn.on_event(handler)).await
    }

    /// Install the handler for unrouted ERROR frames.
    pub async fn on_error<F>(&self, handler: F) -> Result<(), ConnError>
    where
        F: for<'a> FnMut(Packet<'a>) + Send + 'static,
    {
        self.call(move |conn| conn.on_error(handler)).await
    }
}

/// A channel-backed subscription returned by [`Client::subscribe`].
pub struct Subscription {
    id: String,
    destination: String,
    receiver: mpsc::Receiver<Frame>,
    client: Client,
}

impl Subscription {
    /// Returns the subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the destination this subscription listens to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Next message, or `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Consume the `Subscription` and return the underlying receiver.
    pub fn into_receiver(self) -> mpsc::Receiver<Frame> {
        self.receiver
    }

    /// Acknowledge `message` using its `ack` header (or `message-id`).
    pub async fn ack(&self, message: &Frame) -> Result<(), ConnError> {
        self.client.ack(ack_id(message)?).await
    }

    /// Negative-acknowledge `message`.
    pub async fn nack(&self, message: &Frame) -> Result<(), ConnError> {
        self.client.nack(ack_id(message)?).await
    }

    pub async fn unsubscribe(self) -> Result<(), ConnError> {
        self.client.unsubscribe(&self.id).await
    }
}

fn ack_id(message: &Frame) -> Result<&str, ConnError> {
    message
        .get_header(header::ACK)
        .or_else(|| message.get_header(header::MESSAGE_ID))
        .ok_or_else(|| crate::error::ValidationError::EmptyField("ack").into())
}
