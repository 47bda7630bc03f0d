//! Configuration for the DataSift client

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration
///
/// Credentials plus the two service endpoints: the REST host for
/// request/response calls and the websocket host for live streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Account username
    pub username: String,

    /// Account API key
    pub api_key: String,

    /// REST API host
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// Streaming websocket host
    #[serde(default = "default_stream_host")]
    pub stream_host: String,

    /// Use https/wss rather than http/ws
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Timeout for individual REST requests in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_host() -> String {
    "api.datasift.com".to_string()
}

fn default_stream_host() -> String {
    "websocket.datasift.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Create a config with default endpoints
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: api_key.into(),
            api_host: default_api_host(),
            stream_host: default_stream_host(),
            secure: true,
            request_timeout_secs: default_timeout(),
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Full URL for a REST endpoint
    pub fn api_url(&self, endpoint: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}/v1/{}", scheme, self.api_host, endpoint)
    }

    /// URL for the multi-stream websocket endpoint.
    ///
    /// The streaming service authenticates via query parameters rather
    /// than headers.
    pub fn stream_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{}://{}/multi?username={}&api_key={}",
            scheme, self.stream_host, self.username, self.api_key
        )
    }
}
