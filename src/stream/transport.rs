//! WebSocket transport layer
//!
//! Single responsibility: connect to the streaming endpoint and expose the
//! raw send/receive halves. No knowledge of stream hashes, subscriptions,
//! or the service's frame format.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::CloseFrame, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{DataSiftError, Result};

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// How a connection ended, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Whether termination followed the close handshake
    pub clean: bool,
    /// Close status code (1005 when the peer sent none, 1006 on abrupt drops)
    pub code: u16,
    /// Reason text, empty when the transport reported none
    pub reason: String,
}

impl CloseInfo {
    /// Close handshake completed; decode the peer's close frame
    pub fn from_frame(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => Self {
                clean: true,
                code: u16::from(frame.code),
                reason: frame.reason.into_owned(),
            },
            None => Self {
                clean: true,
                code: 1005,
                reason: String::new(),
            },
        }
    }

    /// Connection dropped without a close handshake
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            clean: false,
            code: 1006,
            reason: reason.into(),
        }
    }

    /// Shutdown requested locally
    pub fn local_shutdown() -> Self {
        Self {
            clean: true,
            code: 1000,
            reason: "Shutdown requested".to_string(),
        }
    }
}

/// A connected WebSocket transport.
///
/// Can only be constructed via `Transport::connect()`; holding one means
/// the handshake completed.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
}

impl Transport {
    /// Connect to the streaming endpoint.
    ///
    /// Returns a Transport only when the connection is established.
    pub async fn connect(url: &str) -> Result<Self> {
        debug!(url = %url, "Connecting to streaming endpoint");

        let request = Request::builder()
            .uri(url)
            .header("Host", extract_host(url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| DataSiftError::Connection(format!("Failed to build request: {}", e)))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| DataSiftError::Connection(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "Streaming endpoint connected");
        Ok(Self { sink, stream })
    }

    /// Split into separate sink and stream for concurrent send/receive.
    pub fn split(self) -> (WsSink, WsStream) {
        (self.sink, self.stream)
    }
}

/// Extract host from URL for the Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("ws://localhost:4444"), "localhost:4444");
        assert_eq!(
            extract_host("wss://websocket.datasift.com/multi?username=u&api_key=k"),
            "websocket.datasift.com"
        );
        assert_eq!(extract_host("invalid"), "localhost");
    }

    #[test]
    fn test_close_info_from_frame() {
        let info = CloseInfo::from_frame(None);
        assert!(info.clean);
        assert_eq!(info.code, 1005);

        let info = CloseInfo::abnormal("connection reset");
        assert!(!info.clean);
        assert_eq!(info.code, 1006);
        assert_eq!(info.reason, "connection reset");
    }
}
