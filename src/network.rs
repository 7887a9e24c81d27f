//! Network URL constants for the relay client.

/// Default WebSocket base URL.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080";

/// Default connection path appended to the base URL.
pub const DEFAULT_WS_PATH: &str = "/ws";
