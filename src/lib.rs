//! DataSift client - REST calls plus live stream consumption
//!
//! Two halves share one set of credentials:
//!
//! - **REST**: stateless request/response calls (compile, validate,
//!   balance, usage, dpu, pull, historics), each piped through a
//!   response classifier that maps the service's error conventions onto
//!   typed failures.
//! - **Streaming**: one persistent websocket connection multiplexing any
//!   number of subscribed stream hashes, managed by a supervisor with an
//!   explicit lifecycle (start, subscribe, stop, restart).
//!
//! ## Usage
//!
//! ```ignore
//! use datasift::{Config, DataSiftClient};
//!
//! let client = DataSiftClient::new(Config::new("user", "apikey"))?;
//!
//! // Compile a query, then consume its live stream
//! client.on_closed(|clean, code, reason| {
//!     eprintln!("stream closed ({}, {}): {}", clean, code, reason);
//! });
//! client.start_stream_subscriber().await?;
//!
//! let stream = client.compile(r#"interaction.content contains "music""#).await?;
//! let subscription = client.subscribe(&stream.hash, |interaction| {
//!     println!("{}", interaction);
//! })?;
//!
//! // Later: tear the channel down
//! subscription.unsubscribe()?;
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod historics;
pub mod rest;
pub mod stream;

// Re-exports
pub use classify::Classified;
pub use client::{CompiledStream, DataSiftClient, PullResponse};
pub use config::Config;
pub use error::{DataSiftError, Result};
pub use historics::Historics;
pub use stream::{ConnectionState, MessageHandler, StreamSupervisor, Subscription};
