//! Error types for the DataSift client

use thiserror::Error;

/// Client error
#[derive(Error, Debug)]
pub enum DataSiftError {
    /// Subscribe attempted before the stream connection reached Open
    #[error("Stream subscriber not started - call start_stream_subscriber first")]
    StreamSubscriberNotStarted,

    /// Unsubscribe token invoked again before the delete round trip completed
    #[error("Stream {0} must be deleted before it can be torn down again")]
    DeleteRequired(String),

    /// Authorization failure reported by the API
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// Structured failure reported by the API (e.g. invalid CSDL)
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded as the expected JSON
    #[error("API failure: {0}")]
    ApiFailure(String),

    /// Status/body combination the classifier does not recognize
    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// HTTP transport failure, surfaced verbatim
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stream connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, DataSiftError>;
