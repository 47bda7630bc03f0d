//! Lifecycle callback slots
//!
//! One independently replaceable slot per connection event kind. Slots
//! are replaced atomically on registration (last registration wins) and
//! read by the read loop without holding the lock across an invocation.
//! An unregistered slot simply drops its event.

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{error, trace};

use super::registry::panic_message;

type OpenHandler = dyn Fn() + Send + Sync;
type ClosedHandler = dyn Fn(bool, u16, String) + Send + Sync;
type DeleteHandler = dyn Fn(Value) + Send + Sync;
type DsMessageHandler = dyn Fn(Value) + Send + Sync;

/// Registered lifecycle handlers, one optional slot per event kind
#[derive(Default)]
pub struct LifecycleCallbacks {
    open: RwLock<Option<Arc<OpenHandler>>>,
    closed: RwLock<Option<Arc<ClosedHandler>>>,
    delete: RwLock<Option<Arc<DeleteHandler>>>,
    ds_message: RwLock<Option<Arc<DsMessageHandler>>>,
}

impl LifecycleCallbacks {
    pub fn set_open(&self, handler: Arc<OpenHandler>) {
        *self.open.write().unwrap() = Some(handler);
    }

    pub fn set_closed(&self, handler: Arc<ClosedHandler>) {
        *self.closed.write().unwrap() = Some(handler);
    }

    pub fn set_delete(&self, handler: Arc<DeleteHandler>) {
        *self.delete.write().unwrap() = Some(handler);
    }

    pub fn set_ds_message(&self, handler: Arc<DsMessageHandler>) {
        *self.ds_message.write().unwrap() = Some(handler);
    }

    pub fn fire_open(&self) {
        let handler = self.open.read().unwrap().clone();
        match handler {
            Some(handler) => isolate("open", || handler()),
            None => trace!("No open handler registered, dropping event"),
        }
    }

    pub fn fire_closed(&self, clean: bool, code: u16, reason: &str) {
        let handler = self.closed.read().unwrap().clone();
        match handler {
            Some(handler) => {
                let reason = reason.to_string();
                isolate("closed", move || handler(clean, code, reason));
            }
            None => trace!("No closed handler registered, dropping event"),
        }
    }

    pub fn fire_delete(&self, interaction: Value) {
        let handler = self.delete.read().unwrap().clone();
        match handler {
            Some(handler) => isolate("delete", move || handler(interaction)),
            None => trace!("No delete handler registered, dropping event"),
        }
    }

    pub fn fire_ds_message(&self, message: Value) {
        let handler = self.ds_message.read().unwrap().clone();
        match handler {
            Some(handler) => isolate("ds_message", move || handler(message)),
            None => trace!("No ds_message handler registered, dropping event"),
        }
    }
}

/// Invoke a lifecycle handler with panic containment.
///
/// A panicking handler must not take down the read loop that fired it.
fn isolate(slot: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        error!(slot = %slot, detail = %panic_message(panic), "Lifecycle handler panicked");
    }
}
