//! Live stream consumption
//!
//! This module maintains the single persistent connection to the
//! streaming service and multiplexes its traffic to registered handlers.
//!
//! # Architecture
//!
//! Organized by concern, each submodule with a single responsibility:
//!
//! | Module       | Responsibility                                      |
//! |--------------|-----------------------------------------------------|
//! | `transport`  | WebSocket connect, send/receive halves, close info  |
//! | `protocol`   | Frame decode, subscribe/unsubscribe wire messages   |
//! | `registry`   | Stream hash -> handler map, dispatch, panic safety  |
//! | `callbacks`  | Lifecycle slots: open, closed, delete, ds_message   |
//! | `supervisor` | Connection state machine and the read loop task     |
//!
//! # Key design points
//!
//! - `StreamSupervisor::start()` connects before returning. "Connected"
//!   is not a flag to poll; when `start()` returns Ok the connection is
//!   open and the opened callback has fired.
//! - One read loop task owns the connection. Frames are processed
//!   strictly in arrival order and routed to exactly one consumer each:
//!   the registry for data events, the lifecycle slots for everything
//!   else. Nothing is silently dropped except data frames for hashes
//!   nobody subscribed to, which can happen while an unsubscribe is in
//!   flight.
//! - Subscriptions are keyed by stream hash, not connection instance, so
//!   they survive a restart; the supervisor re-announces them.
//! - Handler failures are contained per frame. A panicking handler is
//!   reported through the diagnostic message path and the loop moves on.

mod callbacks;
mod protocol;
mod registry;
mod transport;

mod supervisor;

pub use registry::MessageHandler;
pub use supervisor::{ConnectionState, StreamSupervisor, Subscription};
