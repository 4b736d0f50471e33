//! Subscription registry.
//!
//! Handlers stay registered until unsubscribed and are invoked for every
//! MESSAGE carrying their id.

use std::collections::{HashMap, HashSet};

use crate::continuation::{ContinuationPanic, Handler, Notify, guard};
use crate::error::{ConnError, ValidationError};
use crate::packet::Packet;

/// Outcome of [`SubscriptionRegistry::unsubscribe_all`].
pub enum Drain {
    /// UNSUBSCRIBE these ids; the notification fires when the last one
    /// is settled.
    Pending(Vec<String>),
    /// Nothing was subscribed. Fire the notification now.
    Complete(Notify),
}

#[derive(Default)]
struct Barrier {
    outstanding: HashSet<String>,
    waiters: Vec<Notify>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    seq: u64,
    handlers: HashMap<String, Handler>,
    barrier: Option<Barrier>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under a fresh local id.
    pub fn create(&mut self, handler: Handler) -> String {
        loop {
            self.seq += 1;
            let id = format!("{:x}", self.seq);
            if !self.handlers.contains_key(&id) {
                self.handlers.insert(id.clone(), handler);
                return id;
            }
        }
    }

    /// Register `handler` under a caller-chosen id.
    pub fn create_with_id(&mut self, id: impl Into<String>, handler: Handler) -> Result<(), ConnError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::EmptyField("subscription id").into());
        }
        if self.handlers.contains_key(&id) {
            return Err(ConnError::AlreadyExists(id));
        }
        self.handlers.insert(id, handler);
        Ok(())
    }

    /// Deliver `packet` to the handler registered under `id`.
    ///
    /// Returns `Ok(false)` when no handler matches. The handler stays
    /// registered even if it panics.
    pub fn call(&mut self, id: &str, packet: Packet<'_>) -> Result<bool, ContinuationPanic> {
        let Some(handler) = self.handlers.get_mut(id) else {
            return Ok(false);
        };
        guard("subscription", || handler(packet))?;
        Ok(true)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.handlers.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.handlers.keys().map(String::as_str)
    }

    /// Remove every handler and arm a barrier over the removed ids.
    ///
    /// `done` runs once [`settle`](Self::settle) has been called for each
    /// of them. A second call while a barrier is armed joins it.
    pub fn unsubscribe_all(&mut self, done: Notify) -> Drain {
        let ids: Vec<String> = self.handlers.drain().map(|(id, _)| id).collect();
        if ids.is_empty() && self.barrier.is_none() {
            return Drain::Complete(done);
        }
        let barrier = self.barrier.get_or_insert_with(Barrier::default);
        barrier.outstanding.extend(ids.iter().cloned());
        barrier.waiters.push(done);
        Drain::Pending(ids)
    }

    /// Mark `id` as unsubscribed. Returns the barrier's notifications once
    /// nothing is outstanding.
    pub fn settle(&mut self, id: &str) -> Vec<Notify> {
        let Some(barrier) = self.barrier.as_mut() else {
            return Vec::new();
        };
        barrier.outstanding.remove(id);
        if !barrier.outstanding.is_empty() {
            return Vec::new();
        }
        self.barrier.take().map(|b| b.waiters).unwrap_or_default()
    }

    pub fn is_draining(&self) -> bool {
        self.barrier.is_some()
    }

    /// Drop handlers and any armed barrier without notifying.
    pub fn clear(&mut self) {
        self.handlers.clear();
        self.barrier = None;
    }
}
