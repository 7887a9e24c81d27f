//! Message and state types for the relay WebSocket protocol.
//!
//! Both directions use the same JSON envelope:
//!
//! ```json
//! { "action": "price_update", "data": { "symbol": "BTC", "price": 1 } }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::websocket::error::{WebSocketError, WsResult};

// ============================================================================
// RESERVED ACTIONS AND CLOSE CODES
// ============================================================================

/// Outbound liveness ping.
pub const HEARTBEAT_ACTION: &str = "heartbeat";

/// Inbound liveness acknowledgement. Never surfaced to user handlers.
pub const HEARTBEAT_ACK_ACTION: &str = "heartbeat_ack";

/// Handlers registered under this tag receive every non-heartbeat frame.
pub const CATCH_ALL_ACTION: &str = "message";

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Closed without a close frame (transport failure).
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// WIRE FRAME
// ============================================================================

/// The `{action, data}` envelope used in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsFrame {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

impl WsFrame {
    /// Create a frame
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
        }
    }

    /// Create an outbound heartbeat carrying the send time in epoch millis
    pub fn heartbeat(timestamp_ms: i64) -> Self {
        Self::new(HEARTBEAT_ACTION, serde_json::json!({ "timestamp": timestamp_ms }))
    }

    /// Whether this is a heartbeat acknowledgement
    pub fn is_heartbeat_ack(&self) -> bool {
        self.action == HEARTBEAT_ACK_ACTION
    }

    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> WsResult<String> {
        serde_json::to_string(self).map_err(WebSocketError::from)
    }

    /// Parse a frame from wire text
    pub fn parse(text: &str) -> WsResult<Self> {
        serde_json::from_str(text).map_err(WebSocketError::from)
    }
}

/// Payload of an outbound heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatData {
    pub timestamp: i64,
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, never connected
    Idle,
    /// Token retrieval or transport handshake in progress
    Connecting,
    /// Session open; sends go straight to the transport
    Open,
    /// Local close requested, transport teardown pending
    Closing,
    /// No session (after a close, a failed attempt, or destroy)
    Closed,
}

impl ConnectionState {
    /// Whether a session is open
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether a connect attempt would be coalesced into the current one
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Details of a session close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseInfo {
    /// Create close details
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// A close caused by a transport failure (no close frame)
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason, false)
    }
}

// ============================================================================
// EVENTS (Client → Consumer)
// ============================================================================

/// Lifecycle events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// A session opened
    Connected,
    /// A session closed
    Disconnected {
        code: u16,
        reason: String,
        was_clean: bool,
    },
    /// A reconnect attempt is scheduled
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnect attempts exhausted; an explicit `connect()` is required
    MaxReconnectReached { attempts: u32 },
    /// The credential was rejected or unavailable; no reconnect scheduled
    AuthRejected { reason: String },
    /// A contained internal failure
    Error { error: WebSocketError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_serialization() {
        let frame = WsFrame::new("ping_test", json!({"n": 1}));
        let text = frame.to_json().unwrap();
        assert_eq!(text, r#"{"action":"ping_test","data":{"n":1}}"#);
    }

    #[test]
    fn test_heartbeat_frame_shape() {
        let frame = WsFrame::heartbeat(1_700_000_000_000);
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["action"], "heartbeat");
        assert_eq!(value["data"]["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_parse_missing_data_defaults_to_null() {
        let frame = WsFrame::parse(r#"{"action":"heartbeat_ack"}"#).unwrap();
        assert!(frame.is_heartbeat_ack());
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn test_parse_rejects_missing_action() {
        assert!(WsFrame::parse(r#"{"data":1}"#).is_err());
        assert!(WsFrame::parse("not json").is_err());
    }

    #[test]
    fn test_connection_state_helpers() {
        assert!(ConnectionState::Open.is_open());
        assert!(ConnectionState::Connecting.is_active());
        assert!(!ConnectionState::Closed.is_active());
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
