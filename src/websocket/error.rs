//! WebSocket-specific error types for the relay client.

use thiserror::Error;

use crate::auth::AuthError;

/// WebSocket-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebSocketError {
    /// Transport could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed (transport-level failure or remote close)
    #[error("Connection closed: code {code}, reason: {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// The server refused the upgrade with an HTTP status
    #[error("Handshake rejected with HTTP status {status}")]
    HandshakeRejected { status: u16 },

    /// The server rejected the credential (reserved close code)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The token source produced no usable token
    #[error("Auth token unavailable: {0}")]
    TokenUnavailable(String),

    /// Inbound frame was not a valid `{action, data}` object
    #[error("Failed to parse message: {0}")]
    MessageParseError(String),

    /// No heartbeat acknowledgement within the configured timeout
    #[error("Heartbeat timeout: no ack received within {timeout_ms}ms")]
    HeartbeatTimeout { timeout_ms: u64 },

    /// WebSocket protocol error
    #[error("WebSocket protocol error: {0}")]
    Protocol(String),

    /// Send failed
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Not connected
    #[error("Not connected to WebSocket server")]
    NotConnected,

    /// Invalid URL
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// The client was destroyed
    #[error("Client destroyed")]
    Destroyed,
}

impl WebSocketError {
    /// Whether this error originates from credential problems rather than
    /// the network. Callers use this to prompt re-authentication.
    ///
    /// A handshake refused with 401 or 403 counts as a credential failure.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            WebSocketError::AuthenticationFailed(_)
                | WebSocketError::TokenUnavailable(_)
                | WebSocketError::HandshakeRejected {
                    status: 401 | 403
                }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WebSocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed => WebSocketError::ConnectionClosed {
                code: 1000,
                reason: "Connection closed normally".to_string(),
            },
            Error::AlreadyClosed => WebSocketError::NotConnected,
            Error::Io(e) => WebSocketError::Io(e.to_string()),
            Error::Protocol(e) => WebSocketError::Protocol(e.to_string()),
            Error::Url(e) => WebSocketError::InvalidUrl(e.to_string()),
            Error::Http(resp) => WebSocketError::HandshakeRejected {
                status: resp.status().as_u16(),
            },
            Error::HttpFormat(e) => WebSocketError::ConnectionFailed(e.to_string()),
            other => WebSocketError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WebSocketError {
    fn from(err: serde_json::Error) -> Self {
        WebSocketError::MessageParseError(err.to_string())
    }
}

impl From<AuthError> for WebSocketError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenUnavailable => {
                WebSocketError::TokenUnavailable("token source returned no token".to_string())
            }
            AuthError::Rejected(msg) => WebSocketError::AuthenticationFailed(msg),
            AuthError::ProviderFailed(msg) => WebSocketError::TokenUnavailable(msg),
        }
    }
}

/// Result type alias for WebSocket operations
pub type WsResult<T> = Result<T, WebSocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_classified() {
        assert!(WebSocketError::from(AuthError::TokenUnavailable).is_auth());
        assert!(WebSocketError::from(AuthError::Rejected("expired".into())).is_auth());
        assert!(WebSocketError::HandshakeRejected { status: 401 }.is_auth());
        assert!(WebSocketError::HandshakeRejected { status: 403 }.is_auth());
        assert!(!WebSocketError::HandshakeRejected { status: 502 }.is_auth());
        assert!(!WebSocketError::Timeout.is_auth());
        assert!(!WebSocketError::HeartbeatTimeout { timeout_ms: 10 }.is_auth());
    }

    #[test]
    fn test_json_error_maps_to_parse_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(
            WebSocketError::from(err),
            WebSocketError::MessageParseError(_)
        ));
    }

    #[test]
    fn test_tungstenite_already_closed_is_not_connected() {
        let err = tokio_tungstenite::tungstenite::Error::AlreadyClosed;
        assert_eq!(WebSocketError::from(err), WebSocketError::NotConnected);
    }
}
