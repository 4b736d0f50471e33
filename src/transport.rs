//! The seam between the protocol state machine and real I/O.
//!
//! A [`Transport`] buffers outbound bytes and keeps timers; whatever drives
//! it (the tokio driver in [`client`](crate::client), or a test mock)
//! reports what happened back through
//! [`Connection::on_transport_event`](crate::connection::Connection::on_transport_event),
//! [`Connection::on_data`](crate::connection::Connection::on_data) and the
//! timer callbacks.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{TransportError, ValidationError};

/// Broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ValidationError;

    /// Parse `host:port`. A missing port defaults to 61613.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ValidationError::EmptyField("port"))?;
                (host, port)
            }
            None => (s, 61613),
        };
        if host.is_empty() {
            return Err(ValidationError::EmptyField("host"));
        }
        Ok(Endpoint::new(host, port))
    }
}

/// Lifecycle events reported by the transport driver.
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Eof,
    Error(TransportError),
    /// The read timeout elapsed without inbound traffic.
    Timeout,
}

/// One-shot timers a connection can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Gives up waiting for the DISCONNECT receipt.
    DisconnectDeadline,
}

/// Byte pipe and timer host used by a connection.
pub trait Transport {
    /// Start connecting. Completion is reported as
    /// [`TransportEvent::Connected`] or [`TransportEvent::Error`].
    fn connect(&mut self, endpoint: &Endpoint, timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Start delivering inbound data.
    fn enable_read(&mut self);

    /// Queue bytes for sending.
    fn write(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Bytes queued but not yet written.
    fn pending_output(&self) -> usize;

    /// Arm (or with `None` disarm) the inactivity timeout. Calling again
    /// restarts the countdown.
    fn set_read_timeout(&mut self, timeout: Option<Duration>);

    /// Arm (or disarm) the periodic write timer. Calling again restarts
    /// the period.
    fn set_write_timer(&mut self, interval: Option<Duration>);

    fn schedule_once(&mut self, delay: Duration, timer: TimerId);

    /// Disarm every timer.
    fn cancel_timers(&mut self);

    /// Drop the link. Queued output is discarded.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parsing() {
        let ep: Endpoint = "broker.local:61614".parse().unwrap();
        assert_eq!(ep, Endpoint::new("broker.local", 61614));
        assert_eq!(ep.to_string(), "broker.local:61614");

        let ep: Endpoint = "localhost".parse().unwrap();
        assert_eq!(ep.port(), 61613);

        assert!("host:notaport".parse::<Endpoint>().is_err());
        assert!(":61613".parse::<Endpoint>().is_err());
    }
}
