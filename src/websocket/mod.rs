//! WebSocket client module.
//!
//! Layers, bottom up:
//! - [`session`]: one physical connection (URL building, transport, raw sink)
//! - [`heartbeat`], [`reconnect`], [`queue`]: liveness, retry policy, outbound buffering
//! - [`handlers`]: inbound decoding and handler dispatch
//! - [`machine`]: the transport-free state machine composing the above
//! - [`client`]: the public facade and its driver task
//! - [`registry`]: one client per endpoint key
//!
//! Frames in both directions are JSON objects `{"action": ..., "data": ...}`.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod machine;
pub mod queue;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod types;

pub use client::{EventStream, WebSocketClient};
pub use config::{WebSocketConfig, MAX_DURATION_MS};
pub use error::{WebSocketError, WsResult};
pub use handlers::{ErrorHandlerFn, HandlerId, Inbound, MessageHandlerFn, MessageRouter};
pub use heartbeat::{HeartbeatMonitor, HeartbeatPhase, HeartbeatState};
pub use machine::{ClientCore, CoreEvent, Effect, TimerKind};
pub use queue::{DrainReport, EnqueueOutcome, OutboundQueue, QueuedMessage};
pub use reconnect::{ReconnectDecision, ReconnectScheduler};
pub use registry::ClientRegistry;
pub use session::{build_url, ConnectionSession, FrameSink, SessionEvent, SessionEventKind, SessionSink};
pub use types::{
    CloseInfo, ConnectionState, HeartbeatData, WsEvent, WsFrame, CATCH_ALL_ACTION,
    HEARTBEAT_ACK_ACTION, HEARTBEAT_ACTION,
};
