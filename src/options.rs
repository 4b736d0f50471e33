use std::time::Duration;

use tracing::warn;

use crate::heartbeat::{DEFAULT_READ_TOLERANCE, DEFAULT_WRITE_TOLERANCE};
use crate::id::Epoch;

/// Tunables for a [`Connection`](crate::connection::Connection).
///
/// Built with chained setters:
///
/// ```
/// use std::time::Duration;
/// use stomp_engine::ConnectOptions;
///
/// let opts = ConnectOptions::default()
///     .heartbeat(5_000, 5_000)
///     .connect_timeout(Some(Duration::from_secs(3)));
/// assert_eq!(opts.heartbeat_request(), (5_000, 5_000));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    host: String,
    heartbeat: (u64, u64),
    read_tolerance: f64,
    write_tolerance: f64,
    connect_timeout: Option<Duration>,
    disconnect_timeout: Duration,
    read_buffer: usize,
    epoch: Epoch,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "/".to_owned(),
            heartbeat: (10_000, 10_000),
            read_tolerance: DEFAULT_READ_TOLERANCE,
            write_tolerance: DEFAULT_WRITE_TOLERANCE,
            connect_timeout: Some(Duration::from_secs(10)),
            disconnect_timeout: Duration::from_secs(5),
            read_buffer: 8 * 1024,
            epoch: Epoch::now(),
        }
    }
}

impl ConnectOptions {
    /// Virtual host sent in the CONNECT `host` header by logon helpers.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Heart-beat pair `(cx, cy)` in milliseconds advertised by logon
    /// helpers that build the CONNECT frame.
    pub fn heartbeat(mut self, cx: u64, cy: u64) -> Self {
        self.heartbeat = (cx, cy);
        self
    }

    /// Multiplier for the read timeout. Must be greater than 1; other
    /// values fall back to the default.
    pub fn read_tolerance(mut self, factor: f64) -> Self {
        if factor > 1.0 && factor.is_finite() {
            self.read_tolerance = factor;
        } else {
            warn!(factor, "read tolerance must be > 1, keeping {}", DEFAULT_READ_TOLERANCE);
            self.read_tolerance = DEFAULT_READ_TOLERANCE;
        }
        self
    }

    /// Multiplier for the write timer. Must be in (0, 1); other values
    /// fall back to the default.
    pub fn write_tolerance(mut self, factor: f64) -> Self {
        if factor > 0.0 && factor < 1.0 {
            self.write_tolerance = factor;
        } else {
            warn!(factor, "write tolerance must be in (0, 1), keeping {}", DEFAULT_WRITE_TOLERANCE);
            self.write_tolerance = DEFAULT_WRITE_TOLERANCE;
        }
        self
    }

    /// `None` waits for the OS connect timeout.
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// How long a graceful disconnect waits for the broker's receipt.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer = bytes.max(512);
        self
    }

    pub fn epoch(mut self, epoch: Epoch) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn host_value(&self) -> &str {
        &self.host
    }

    pub fn heartbeat_request(&self) -> (u64, u64) {
        self.heartbeat
    }

    pub fn read_tolerance_factor(&self) -> f64 {
        self.read_tolerance
    }

    pub fn write_tolerance_factor(&self) -> f64 {
        self.write_tolerance
    }

    pub fn connect_timeout_value(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn disconnect_timeout_value(&self) -> Duration {
        self.disconnect_timeout
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer
    }

    pub fn epoch_value(&self) -> &Epoch {
        &self.epoch
    }
}
