//! Callback types and panic containment.
//!
//! User callbacks run on the engine's dispatch path. A panic inside one is
//! caught and routed to the connection's exception handler so it cannot
//! unwind through the tokenizer and corrupt the stream state.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::packet::Packet;

/// One-shot completion callback (receipts, logon).
pub type Continuation = Box<dyn for<'a> FnOnce(Packet<'a>) + Send>;

/// Persistent callback (subscription messages, broker errors).
pub type Handler = Box<dyn for<'a> FnMut(Packet<'a>) + Send>;

/// One-shot notification without a packet.
pub type Notify = Box<dyn FnOnce() + Send>;

/// Receives panics raised by other callbacks.
pub type ExceptionHandler = Box<dyn FnMut(ContinuationPanic) + Send>;

/// Box a closure as a [`Continuation`].
pub fn once<F>(f: F) -> Continuation
where
    F: for<'a> FnOnce(Packet<'a>) + Send + 'static,
{
    Box::new(f)
}

/// Box a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> FnMut(Packet<'a>) + Send + 'static,
{
    Box::new(f)
}

/// Box a closure as a [`Notify`].
pub fn notify<F>(f: F) -> Notify
where
    F: FnOnce() + Send + 'static,
{
    Box::new(f)
}

/// A panic caught while running a callback.
pub struct ContinuationPanic {
    context: &'static str,
    payload: Box<dyn Any + Send>,
}

impl ContinuationPanic {
    /// Which kind of callback panicked (`"receipt"`, `"subscription"`, ...).
    pub fn context(&self) -> &'static str {
        self.context
    }

    /// Panic message when the payload is a string.
    pub fn message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&str>() {
            s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "<non-string panic payload>"
        }
    }

    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }
}

impl fmt::Debug for ContinuationPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationPanic")
            .field("context", &self.context)
            .field("message", &self.message())
            .finish()
    }
}

impl fmt::Display for ContinuationPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} callback panicked: {}", self.context, self.message())
    }
}

impl std::error::Error for ContinuationPanic {}

/// Run `f`, converting a panic into a [`ContinuationPanic`].
pub(crate) fn guard<F: FnOnce()>(context: &'static str, f: F) -> Result<(), ContinuationPanic> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| ContinuationPanic { context, payload })
}

/// Holder for the exception handler.
#[derive(Default)]
pub(crate) struct Exceptions {
    handler: Option<ExceptionHandler>,
}

impl Exceptions {
    pub(crate) fn set(&mut self, handler: ExceptionHandler) {
        self.handler = Some(handler);
    }

    pub(crate) fn report(&mut self, err: ContinuationPanic) {
        let Some(handler) = self.handler.as_mut() else {
            error!(context = err.context(), "{err}");
            return;
        };
        if let Err(nested) = guard("exception", || handler(err)) {
            error!("exception handler panicked: {}", nested.message());
        }
    }

    /// Run a callback and report a panic.
    pub(crate) fn run<F: FnOnce()>(&mut self, context: &'static str, f: F) {
        if let Err(err) = guard(context, f) {
            self.report(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn guard_captures_string_payloads() {
        let err = guard("receipt", || panic!("boom {}", 7)).unwrap_err();
        assert_eq!(err.context(), "receipt");
        assert_eq!(err.message(), "boom 7");
        assert_eq!(err.to_string(), "receipt callback panicked: boom 7");
    }

    #[test]
    fn exceptions_route_to_installed_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut exceptions = Exceptions::default();
        exceptions.set(Box::new(move |p| sink.lock().unwrap().push(p.to_string())));

        exceptions.run("subscription", || panic!("bad message"));
        exceptions.run("subscription", || {});

        assert_eq!(
            *seen.lock().unwrap(),
            ["subscription callback panicked: bad message"]
        );
    }

    #[test]
    fn panicking_exception_handler_is_contained() {
        let mut exceptions = Exceptions::default();
        exceptions.set(Box::new(|_| panic!("handler broke")));
        exceptions.run("logon", || panic!("first"));
    }
}
