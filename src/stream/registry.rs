//! Subscription registry
//!
//! Maps stream hash to message handler. The lock is held only for map
//! mutation and lookup, never across a handler invocation, so a slow or
//! panicking handler cannot block registration from other tasks.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Handler invoked with the payload of each matching data frame
pub type MessageHandler = dyn Fn(Value) + Send + Sync;

/// Outcome of dispatching one data frame
#[derive(Debug)]
pub enum Dispatch {
    /// Handler invoked
    Delivered,
    /// No handler registered for the hash; frame discarded
    NoHandler,
    /// Handler panicked; panic contained, detail captured
    HandlerPanicked(String),
}

/// Registry of active subscriptions, keyed by stream hash.
///
/// At most one handler per hash; inserting for an existing hash replaces
/// the previous handler.
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: RwLock<HashMap<String, Arc<MessageHandler>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a hash, replacing any previous one
    pub fn insert(&self, hash: &str, handler: Arc<MessageHandler>) {
        self.handlers
            .write()
            .unwrap()
            .insert(hash.to_string(), handler);
    }

    /// Remove the handler for a hash; returns whether one was present
    pub fn remove(&self, hash: &str) -> bool {
        self.handlers.write().unwrap().remove(hash).is_some()
    }

    /// Hashes with an active handler
    pub fn hashes(&self) -> Vec<String> {
        self.handlers.read().unwrap().keys().cloned().collect()
    }

    /// Deliver a data frame payload to the handler for `hash`.
    ///
    /// A frame for an unregistered hash is discarded without error:
    /// channels can outlive local interest while an unsubscribe is in
    /// flight. Handler panics are contained and reported to the caller.
    pub fn dispatch(&self, hash: &str, payload: Value) -> Dispatch {
        let handler = {
            let handlers = self.handlers.read().unwrap();
            match handlers.get(hash) {
                Some(handler) => Arc::clone(handler),
                None => {
                    debug!(hash = %hash, "No subscription for inbound frame, discarding");
                    return Dispatch::NoHandler;
                }
            }
        };

        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(()) => Dispatch::Delivered,
            Err(panic) => Dispatch::HandlerPanicked(panic_message(panic)),
        }
    }
}

/// Best-effort extraction of a panic payload's message
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
