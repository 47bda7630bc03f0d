//! Wire format for the multi-stream protocol
//!
//! Inbound traffic is frame-delimited JSON. Each frame is classified into
//! exactly one [`InboundFrame`] kind; text that fails to decode is carried
//! through verbatim as a protocol message so the consumer can diagnose
//! drift instead of losing it. Outbound traffic is limited to the
//! subscribe/unsubscribe control messages keyed by stream hash.

use serde_json::{json, Value};

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Event on a subscribed channel
    Data { hash: String, payload: Value },
    /// Delete notice for a previously delivered interaction
    Deleted { interaction: Value },
    /// Anything else the service sends: status, ticks, undecodable text
    Protocol(Value),
}

/// Classify one frame of inbound text.
///
/// Delete notices may arrive with or without a stream hash, so the
/// deleted marker is checked before hash-based classification.
pub fn decode_frame(text: &str) -> InboundFrame {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return InboundFrame::Protocol(Value::String(text.to_string())),
    };

    if value.get("deleted").and_then(Value::as_bool) == Some(true) {
        return InboundFrame::Deleted { interaction: value };
    }
    if let Some(data) = value.get("data") {
        if data.get("deleted").and_then(Value::as_bool) == Some(true) {
            return InboundFrame::Deleted {
                interaction: data.clone(),
            };
        }
    }

    match (value.get("hash").and_then(Value::as_str), value.get("data")) {
        (Some(hash), Some(data)) => InboundFrame::Data {
            hash: hash.to_string(),
            payload: data.clone(),
        },
        _ => InboundFrame::Protocol(value),
    }
}

/// Outbound control message, keyed by stream hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Subscribe { hash: String },
    Unsubscribe { hash: String },
}

impl ControlMessage {
    /// Encode for the wire
    pub fn encode(&self) -> String {
        match self {
            ControlMessage::Subscribe { hash } => {
                json!({"action": "subscribe", "hash": hash}).to_string()
            }
            ControlMessage::Unsubscribe { hash } => {
                json!({"action": "unsubscribe", "hash": hash}).to_string()
            }
        }
    }
}
