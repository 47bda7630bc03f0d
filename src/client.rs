//! High-level client facade
//!
//! One `DataSiftClient` per account: stateless REST calls share an
//! authenticated HTTP client, and the streaming surface delegates to the
//! supervisor that owns the persistent connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{DataSiftError, Result};
use crate::historics::Historics;
use crate::rest::RestClient;
use crate::stream::{ConnectionState, StreamSupervisor, Subscription};

/// Result of compiling a CSDL query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledStream {
    /// Opaque identifier for the compiled query's event channel
    pub hash: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub dpu: Option<Value>,
}

/// One page of pulled interactions plus pagination cursors
#[derive(Debug, Clone)]
pub struct PullResponse {
    pub interactions: Vec<Value>,
    pub cursor_current: Option<String>,
    pub cursor_next: Option<String>,
}

/// Client for the DataSift API
pub struct DataSiftClient {
    rest: Arc<RestClient>,
    historics: Historics,
    stream: StreamSupervisor,
}

impl DataSiftClient {
    /// Create a client from a config
    pub fn new(config: Config) -> Result<Self> {
        let stream_url = config.stream_url();
        let rest = Arc::new(RestClient::new(config)?);
        Ok(Self {
            historics: Historics::new(Arc::clone(&rest)),
            rest,
            stream: StreamSupervisor::new(stream_url),
        })
    }

    // ==================== REST API ====================

    /// Compile a CSDL query into a stream hash.
    ///
    /// A rejected query surfaces as `DataSiftError::Api` carrying the
    /// service's error detail.
    pub async fn compile(&self, csdl: &str) -> Result<CompiledStream> {
        let value = self
            .rest
            .post("compile", &[("csdl", csdl.to_string())])
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Validate a CSDL query without compiling it
    pub async fn validate(&self, csdl: &str) -> Result<Value> {
        self.rest
            .post("validate", &[("csdl", csdl.to_string())])
            .await
    }

    /// Whether a CSDL query is valid.
    ///
    /// A query the service rejects yields `false`; any other failure
    /// (authorization, server-side, transport) propagates.
    pub async fn is_valid(&self, csdl: &str) -> Result<bool> {
        csdl_validity(self.validate(csdl).await)
    }

    /// Account balance
    pub async fn balance(&self) -> Result<Value> {
        self.rest.get("balance", &[]).await
    }

    /// Account usage, optionally for a specific period ("hour", "day")
    pub async fn usage(&self, period: Option<&str>) -> Result<Value> {
        let mut params = Vec::new();
        if let Some(period) = period {
            params.push(("period", period.to_string()));
        }
        self.rest.get("usage", &params).await
    }

    /// DPU cost breakdown for a compiled stream
    pub async fn dpu(&self, hash: &str) -> Result<Value> {
        self.rest.get("dpu", &[("hash", hash.to_string())]).await
    }

    /// Pull a page of interactions from a push subscription.
    ///
    /// Pagination cursors ride on response headers; an exhausted
    /// subscription yields an empty page.
    pub async fn pull(
        &self,
        subscription_id: &str,
        size: Option<u64>,
        cursor: Option<&str>,
    ) -> Result<PullResponse> {
        let mut params = vec![("id", subscription_id.to_string())];
        if let Some(size) = size {
            params.push(("size", size.to_string()));
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let (headers, value) = self.rest.get_with_headers("pull", &params).await?;

        let interactions = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };

        Ok(PullResponse {
            interactions,
            cursor_current: header_value(&headers, "x-datasift-cursor-current"),
            cursor_next: header_value(&headers, "x-datasift-cursor-next"),
        })
    }

    /// Historics sub-API
    pub fn historics(&self) -> &Historics {
        &self.historics
    }

    // ==================== Streaming ====================

    /// Open the persistent streaming connection and start the read loop.
    ///
    /// Returns once the connection is open; the opened callback has
    /// already fired. Restarting after a close keeps all subscriptions.
    pub async fn start_stream_subscriber(&self) -> Result<()> {
        self.stream.start().await
    }

    /// Close the streaming connection and wait for the read loop to end
    pub async fn stop_stream_subscriber(&self) -> Result<()> {
        self.stream.stop().await
    }

    /// Current state of the streaming connection
    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    /// Register a handler for a compiled stream's events.
    ///
    /// Requires the streaming connection to be open; fails with
    /// `StreamSubscriberNotStarted` otherwise.
    pub fn subscribe<F>(&self, hash: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.stream.subscribe(hash, handler)
    }

    /// Handler invoked once the streaming connection opens
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.stream.on_open(handler);
    }

    /// Handler invoked when the streaming connection closes:
    /// `(was_clean, code, reason)`
    pub fn on_closed<F>(&self, handler: F)
    where
        F: Fn(bool, u16, String) + Send + Sync + 'static,
    {
        self.stream.on_closed(handler);
    }

    /// Handler invoked for each interaction delete notice
    pub fn on_delete<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.stream.on_delete(handler);
    }

    /// Handler invoked for service protocol messages (status, ticks,
    /// undecodable frames, contained handler failures)
    pub fn on_ds_message<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.stream.on_ds_message(handler);
    }
}

/// Translate a validate outcome into a boolean.
///
/// Only a query rejection (a 400-level API error) means "invalid";
/// everything else is a real failure the caller needs to see.
fn csdl_validity(outcome: Result<Value>) -> Result<bool> {
    match outcome {
        Ok(_) => Ok(true),
        Err(DataSiftError::Api { status: 400, .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

fn header_value(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
