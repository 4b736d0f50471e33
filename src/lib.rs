//! Callback-driven STOMP 1.2 client engine.
//!
//! The crate is layered:
//!
//! - [`Tokenizer`] splits the inbound byte stream into frame events and
//!   [`Engine`] routes finished frames to receipts, subscriptions, the
//!   pending logon or an error handler;
//! - [`Command`] builds outbound frames;
//! - [`Connection`] is the sans-IO session state machine over a
//!   [`Transport`];
//! - [`Client`] runs a connection on a tokio task over TCP.
//!
//! [`StompCodec`] exposes the same tokenizer as a `tokio_util` codec of
//! owned [`Frame`]s, which is convenient for brokers and test peers.

pub mod client;
pub mod codec;
pub mod command;
pub mod connection;
pub mod continuation;
pub mod engine;
pub mod error;
pub mod frame;
pub mod header;
pub mod header_store;
pub mod heartbeat;
pub mod id;
pub mod method;
pub mod options;
pub mod packet;
pub mod parser;
pub mod receipt;
pub mod subscription;
pub mod transport;

pub use client::{Client, Subscription, TcpTransport};
pub use codec::{StompCodec, StompItem};
pub use command::Command;
pub use connection::{Connection, ConnectionEvent, Status};
pub use continuation::{Continuation, ContinuationPanic, Handler, Notify, once};
pub use engine::Engine;
pub use error::{ConnError, ParseError, TransportError, ValidationError};
pub use frame::Frame;
pub use header::{AckMode, KnownHeader};
pub use header_store::HeaderStore;
pub use heartbeat::{Heartbeat, parse_heartbeat_header};
pub use id::{Epoch, IdGenerator, IdKind};
pub use method::Method;
pub use options::ConnectOptions;
pub use packet::Packet;
pub use parser::{FrameControl, ParserHook, Tokenizer};
pub use receipt::ReceiptCorrelator;
pub use subscription::{Drain, SubscriptionRegistry};
pub use transport::{Endpoint, TimerId, Transport, TransportEvent};
