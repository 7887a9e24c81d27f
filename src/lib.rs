//! # relay-link
//!
//! A resilient real-time messaging client. One logical connection to a
//! WebSocket server that survives drops and credential changes, detects
//! dead links with heartbeats, and buffers outbound messages during outages.
//!
//! ## Modules
//!
//! - [`websocket`]: the client, its configuration, and the components it is built from
//! - [`auth`]: token sources supplying the connection credential
//! - [`network`]: default endpoint constants
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay_link::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WebSocketError> {
//!     let registry = ClientRegistry::new();
//!     let client = registry.get_instance(
//!         "market-data",
//!         WebSocketConfig::new("wss://relay.example.com", "/ws"),
//!         TokenSource::from_fn(|| Ok(std::env::var("RELAY_TOKEN").unwrap_or_default())),
//!     )?;
//!
//!     client.on("price_update", |data| println!("{}", data));
//!     client.send("subscribe", serde_json::json!({ "symbol": "BTC" }));
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     registry.destroy_all();
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

/// Network URL constants.
pub mod network;

/// Credential supply for connection attempts.
pub mod auth;

/// WebSocket client for real-time messaging.
pub mod websocket;

// ============================================================================
// PRELUDE
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use relay_link::prelude::*;
/// ```
pub mod prelude {
    // Network constants
    pub use crate::network::{DEFAULT_WS_PATH, DEFAULT_WS_URL};

    // Auth module exports
    pub use crate::auth::{AuthError, AuthResult, TokenSource};

    // WebSocket module exports
    pub use crate::websocket::{
        ClientRegistry, WebSocketClient, WebSocketConfig, WebSocketError, WsResult,
        ConnectionState, WsEvent, WsFrame, EventStream, HandlerId,
    };
}
