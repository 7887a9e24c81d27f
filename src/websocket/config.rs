//! Client configuration.
//!
//! All options have defaults. Overrides can come from code or from
//! `RELAY_WS_*` environment variables (optionally via a `.env` file).

use std::time::Duration;

use crate::network::{DEFAULT_WS_PATH, DEFAULT_WS_URL};
use crate::websocket::error::{WebSocketError, WsResult};

/// Upper bound for every `*_ms` option (one day).
pub const MAX_DURATION_MS: u64 = 86_400_000;

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Base URL (`ws://`, `wss://`, `http://` or `https://`)
    pub base_url: String,
    /// Connection path segment appended to the base URL
    pub path: String,
    /// Base delay for jittered reconnect backoff (ms)
    pub reconnect_interval_ms: u64,
    /// Consecutive automatic reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Interval between heartbeat pings (ms)
    pub heartbeat_interval_ms: u64,
    /// Time allowed for a heartbeat ack before the session is force-closed (ms).
    /// Must exceed `heartbeat_interval_ms`.
    pub heartbeat_timeout_ms: u64,
    /// Coalesced resend count at which a queued message is dropped
    pub max_message_retries: u32,
    /// Age at which a queued message is dropped (ms)
    pub queue_expiry_ms: u64,
    /// Maximum number of queued messages; the oldest entry is evicted past this
    pub max_queue_len: usize,
    /// Timeout for the transport handshake (ms)
    pub connect_timeout_ms: u64,
    /// Close code that signals credential rejection and suppresses reconnect.
    ///
    /// tungstenite cannot deliver 401 inside a close frame (it arrives as
    /// 1002), so the default only matches through a handshake refused with
    /// HTTP 401. Servers that reject by close frame should use a private
    /// code in the 4000-4999 range.
    pub auth_reject_code: u16,
    /// Close code used when a heartbeat timeout forces the session closed
    pub heartbeat_close_code: u16,
    /// Connect as soon as the client is created through a registry
    pub auto_connect: bool,
    /// Capacity of the lifecycle event channel. Default: 1000
    pub event_channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WS_URL.to_string(),
            path: DEFAULT_WS_PATH.to_string(),
            reconnect_interval_ms: 3_000,
            max_reconnect_attempts: 5,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            max_message_retries: 3,
            queue_expiry_ms: 60_000,
            max_queue_len: 1_000,
            connect_timeout_ms: 30_000,
            auth_reject_code: 401,
            heartbeat_close_code: 4000,
            auto_connect: true,
            event_channel_capacity: 1_000,
        }
    }
}

impl WebSocketConfig {
    /// Config for `base_url` + `path` with all other options defaulted.
    pub fn new(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Loads overrides from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file, then
    /// reads `RELAY_WS_URL`, `RELAY_WS_PATH`, `RELAY_WS_RECONNECT_INTERVAL_MS`,
    /// `RELAY_WS_MAX_RECONNECT_ATTEMPTS`, `RELAY_WS_HEARTBEAT_INTERVAL_MS`,
    /// `RELAY_WS_HEARTBEAT_TIMEOUT_MS`, `RELAY_WS_MAX_MESSAGE_RETRIES` and
    /// `RELAY_WS_QUEUE_EXPIRY_MS`. Unset or unparsable values keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`WebSocketError::InvalidConfig`] if the result fails
    /// [`validate`](Self::validate).
    pub fn from_env() -> WsResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            base_url: std::env::var("RELAY_WS_URL").unwrap_or(defaults.base_url),
            path: std::env::var("RELAY_WS_PATH").unwrap_or(defaults.path),
            reconnect_interval_ms: parse_env(
                "RELAY_WS_RECONNECT_INTERVAL_MS",
                defaults.reconnect_interval_ms,
            ),
            max_reconnect_attempts: parse_env(
                "RELAY_WS_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            heartbeat_interval_ms: parse_env(
                "RELAY_WS_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval_ms,
            ),
            heartbeat_timeout_ms: parse_env(
                "RELAY_WS_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout_ms,
            ),
            max_message_retries: parse_env(
                "RELAY_WS_MAX_MESSAGE_RETRIES",
                defaults.max_message_retries,
            ),
            queue_expiry_ms: parse_env("RELAY_WS_QUEUE_EXPIRY_MS", defaults.queue_expiry_ms),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Check option consistency.
    ///
    /// # Errors
    ///
    /// Returns [`WebSocketError::InvalidConfig`] for an empty base URL, a zero
    /// heartbeat or reconnect interval, a heartbeat timeout that does not
    /// exceed the interval, a duration above [`MAX_DURATION_MS`], zero
    /// message retries, or zero queue/channel capacities.
    pub fn validate(&self) -> WsResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(WebSocketError::InvalidConfig(
                "base_url cannot be empty".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(WebSocketError::InvalidConfig(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(WebSocketError::InvalidConfig(
                "reconnect_interval_ms must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("queue_expiry_ms", self.queue_expiry_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(WebSocketError::InvalidConfig(format!(
                    "{} ({}) exceeds {}",
                    name, value, MAX_DURATION_MS
                )));
            }
        }
        if self.max_message_retries == 0 {
            return Err(WebSocketError::InvalidConfig(
                "max_message_retries must be positive".to_string(),
            ));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(WebSocketError::InvalidConfig(format!(
                "heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.max_queue_len == 0 || self.event_channel_capacity == 0 {
            return Err(WebSocketError::InvalidConfig(
                "max_queue_len and event_channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn queue_expiry(&self) -> Duration {
        Duration::from_millis(self.queue_expiry_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
