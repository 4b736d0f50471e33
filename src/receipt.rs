//! Receipt correlation.
//!
//! Outstanding receipts are kept in send order. Brokers answer receipts
//! in roughly the order they were requested, so the scan usually hits the
//! first entry.

use crate::continuation::{Continuation, ContinuationPanic, guard};
use crate::packet::Packet;

/// Bookkeeping the connection attaches to a receipt besides the user's
/// continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReceiptAction {
    Plain,
    /// Fill the subscription id into the receipt; drop the subscription if
    /// the broker answers with ERROR.
    Subscribe(String),
    /// Settles one id of an unsubscribe-all barrier.
    Unsubscribe(String),
    /// Completes a graceful disconnect.
    Disconnect,
}

pub(crate) struct ReceiptEntry {
    id: String,
    continuation: Option<Continuation>,
    action: ReceiptAction,
}

impl ReceiptEntry {
    pub(crate) fn into_parts(self) -> (Option<Continuation>, ReceiptAction) {
        (self.continuation, self.action)
    }
}

/// Maps receipt ids to the continuation waiting on them.
///
/// Each continuation fires at most once; a RECEIPT (or ERROR carrying a
/// `receipt-id`) for an unknown id is ignored.
#[derive(Default)]
pub struct ReceiptCorrelator {
    seq: u64,
    pending: Vec<ReceiptEntry>,
}

impl ReceiptCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `continuation` under a fresh id and return the id.
    pub fn create(&mut self, continuation: Continuation) -> String {
        let id = loop {
            self.seq += 1;
            let id = format!("{:x}", self.seq);
            if !self.contains(&id) {
                break id;
            }
        };
        self.register(id.clone(), Some(continuation), ReceiptAction::Plain);
        id
    }

    /// Register `continuation` under a caller-chosen `id`.
    pub fn insert(&mut self, id: impl Into<String>, continuation: Continuation) {
        self.register(id.into(), Some(continuation), ReceiptAction::Plain);
    }

    pub(crate) fn register(
        &mut self,
        id: String,
        continuation: Option<Continuation>,
        action: ReceiptAction,
    ) {
        self.pending.push(ReceiptEntry {
            id,
            continuation,
            action,
        });
    }

    /// Deliver `packet` to the continuation registered under `id`.
    ///
    /// Returns `Ok(true)` when an entry matched (and was removed),
    /// `Ok(false)` when none did, and `Err` when the continuation panicked.
    pub fn call(&mut self, id: &str, packet: Packet<'_>) -> Result<bool, ContinuationPanic> {
        let Some(entry) = self.take(id) else {
            return Ok(false);
        };
        if let Some(continuation) = entry.continuation {
            guard("receipt", move || continuation(packet))?;
        }
        Ok(true)
    }

    pub(crate) fn take(&mut self, id: &str) -> Option<ReceiptEntry> {
        let pos = self.pending.iter().position(|e| e.id == id)?;
        Some(self.pending.remove(pos))
    }

    /// Drop the entry without firing it.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.take(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending ids in send order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.pending.iter().map(|e| e.id.as_str())
    }

    /// Drop every entry without firing.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::once;
    use crate::header_store::HeaderStore;
    use crate::method::Method;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    #[test]
    fn receipts_fire_once_in_any_order() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut receipts = ReceiptCorrelator::new();
        for id in ["a", "b", "c"] {
            let fired = Arc::clone(&fired);
            receipts.insert(id, once(move |p| {
                fired.lock().unwrap().push(p.receipt_id().unwrap_or_default().to_owned())
            }));
        }
        assert_eq!(receipts.ids().collect::<Vec<_>>(), ["a", "b", "c"]);

        let mut headers = HeaderStore::new();
        for id in ["b", "a", "b", "c", "zzz"] {
            headers.clear();
            headers.set("receipt-id", id);
            let packet = Packet::new(Method::Receipt, &headers, "", Bytes::new());
            let matched = receipts.call(id, packet).unwrap();
            assert_eq!(matched, fired.lock().unwrap().last().map(String::as_str) == Some(id));
        }
        assert_eq!(*fired.lock().unwrap(), ["b", "a", "c"]);
        assert!(receipts.is_empty());
    }

    #[test]
    fn minted_ids_skip_taken_ones() {
        let mut receipts = ReceiptCorrelator::new();
        receipts.insert("2", once(|_| {}));
        assert_eq!(receipts.create(once(|_| {})), "1");
        assert_eq!(receipts.create(once(|_| {})), "3");
        assert_eq!(receipts.ids().collect::<Vec<_>>(), ["2", "1", "3"]);
    }

    #[test]
    fn panicking_continuation_still_consumes_entry() {
        let mut receipts = ReceiptCorrelator::new();
        receipts.insert("x", once(|_| panic!("nope")));
        let headers = HeaderStore::new();
        let packet = Packet::new(Method::Receipt, &headers, "", Bytes::new());
        let err = receipts.call("x", packet).unwrap_err();
        assert_eq!(err.message(), "nope");
        assert!(!receipts.contains("x"));
    }
}
