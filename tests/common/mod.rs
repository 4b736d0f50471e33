#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use stomp_engine::{
    ConnectOptions, Connection, Endpoint, Epoch, TimerId, Transport, TransportError,
    TransportEvent,
};

/// Records everything a connection asks of its transport.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub connects: Vec<(Endpoint, Option<Duration>)>,
    pub written: Vec<Bytes>,
    pub backlog: usize,
    pub reading: bool,
    pub read_timeouts: Vec<Option<Duration>>,
    pub write_timers: Vec<Option<Duration>>,
    pub scheduled: Vec<(Duration, TimerId)>,
    pub cancelled: usize,
    pub closed: usize,
    pub fail_connect: bool,
    pub fail_write: bool,
}

impl MockTransport {
    /// Written frames as text, oldest first.
    pub fn frames(&self) -> Vec<String> {
        self.written
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    pub fn last_frame(&self) -> String {
        self.frames().pop().unwrap_or_default()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, endpoint: &Endpoint, timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused)));
        }
        self.connects.push((endpoint.clone(), timeout));
        Ok(())
    }

    fn enable_read(&mut self) {
        self.reading = true;
    }

    fn write(&mut self, data: Bytes) -> Result<(), TransportError> {
        if self.fail_write {
            return Err(TransportError::Closed);
        }
        self.written.push(data);
        Ok(())
    }

    fn pending_output(&self) -> usize {
        self.backlog
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeouts.push(timeout);
    }

    fn set_write_timer(&mut self, interval: Option<Duration>) {
        self.write_timers.push(interval);
    }

    fn schedule_once(&mut self, delay: Duration, timer: TimerId) {
        self.scheduled.push((delay, timer));
    }

    fn cancel_timers(&mut self) {
        self.cancelled += 1;
    }

    fn close(&mut self) {
        self.closed += 1;
        self.reading = false;
    }
}

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Options with a fixed id anchor so ids are predictable.
pub fn options() -> ConnectOptions {
    ConnectOptions::default().epoch(Epoch::fixed("0"))
}

/// A connection whose transport has reported `Connected`.
pub fn running() -> Connection<MockTransport> {
    let mut conn = Connection::new(MockTransport::default(), options());
    conn.connect(&Endpoint::new("localhost", 61613), || {}).unwrap();
    conn.on_transport_event(TransportEvent::Connected);
    conn
}

/// A running connection that has logged on with the given broker
/// heart-beat header and a `0,0` request.
pub fn logged_on(heart_beat: &str) -> Connection<MockTransport> {
    let mut conn = running();
    conn.logon(stomp_engine::Command::connect("/", "guest", "guest").heart_beat(0, 0), None)
        .unwrap();
    conn.on_data(format!("CONNECTED\nversion:1.2\nsession:s-1\nheart-beat:{heart_beat}\n\n\0").as_bytes());
    conn
}

/// Value of `key` in a rendered frame.
pub fn header_of(frame: &str, key: &str) -> Option<String> {
    frame
        .split("\n\n")
        .next()?
        .lines()
        .skip(1)
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':').map(str::to_owned))
}
