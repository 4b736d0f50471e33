//! Heart-beat negotiation.

use std::time::Duration;

/// Factor applied to the negotiated inbound interval before the read
/// timeout fires.
pub const DEFAULT_READ_TOLERANCE: f64 = 1.3;
/// Factor applied to the negotiated outbound interval for the write timer.
pub const DEFAULT_WRITE_TOLERANCE: f64 = 0.9;

/// Parse a `heart-beat` header value ("cx,cy").
///
/// Missing or invalid parts become `0` (no heart-beat in that direction).
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.splitn(2, ',');
    let cx = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
    let cy = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
    (cx, cy)
}

/// Render a heart-beat pair for the wire.
pub fn format_heartbeat_header(cx: u64, cy: u64) -> String {
    format!("{cx},{cy}")
}

/// Negotiated timers for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// Period of the outbound heart-beat timer.
    pub write: Option<Duration>,
    /// Inactivity limit for inbound traffic.
    pub read: Option<Duration>,
}

/// Negotiate one direction: disabled when the peer sent 0, otherwise the
/// larger of the peer's value and our own request. A local value of 0
/// means no preference: unlike the STOMP 1.2 rule, where a client `0`
/// turns that direction off, a client sending `heart-beat:0,0` still arms
/// both timers when the broker answers with non-zero values.
pub fn negotiate(local_ms: u64, peer_ms: u64) -> Option<Duration> {
    (peer_ms != 0).then(|| Duration::from_millis(local_ms.max(peer_ms)))
}

/// Scale `interval` by `factor`, rounding to whole milliseconds.
pub fn scale(interval: Duration, factor: f64) -> Duration {
    let ms = interval.as_millis() as f64 * factor;
    Duration::from_millis(ms.round() as u64)
}

/// Derive the connection's timers.
///
/// Parameters
/// - `requested`: the `(cx, cy)` pair the client sent in CONNECT.
/// - `server`: the `(sx, sy)` pair from CONNECTED.
/// - `read_tolerance`, `write_tolerance`: multipliers applied to the
///   negotiated read and write intervals.
///
/// Outbound beats follow the broker's `sy` (what it wants to receive);
/// inbound checks follow its `sx` (what it promises to send).
pub fn timers(requested: (u64, u64), server: (u64, u64), read_tolerance: f64, write_tolerance: f64) -> Heartbeat {
    let (cx, cy) = requested;
    let (sx, sy) = server;
    Heartbeat {
        write: negotiate(cx, sy).map(|d| scale(d, write_tolerance)),
        read: negotiate(cy, sx).map(|d| scale(d, read_tolerance)),
    }
}
