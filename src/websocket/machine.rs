//! Client state machine.
//!
//! [`ClientCore`] composes the heartbeat monitor, reconnect scheduler and
//! outbound queue around a single [`FrameSink`]. It never performs I/O or
//! sleeps: every input arrives as a [`CoreEvent`] through
//! [`ClientCore::handle`], together with the current instant, and every
//! side effect the caller must carry out comes back as an [`Effect`].
//!
//! Each connect attempt gets a fresh generation number. Session events
//! carry the generation they belong to, so a late close or frame from a
//! replaced session is ignored instead of tearing down its successor.

use std::fmt;

use serde_json::Value;
use tokio::time::Instant;

use crate::websocket::config::WebSocketConfig;
use crate::websocket::error::WebSocketError;
use crate::websocket::handlers::{Inbound, MessageRouter};
use crate::websocket::heartbeat::{HeartbeatMonitor, HeartbeatPhase};
use crate::websocket::queue::OutboundQueue;
use crate::websocket::reconnect::{ReconnectDecision, ReconnectScheduler};
use crate::websocket::session::FrameSink;
use crate::websocket::types::{CloseInfo, ConnectionState, WsEvent, WsFrame, CLOSE_NORMAL};

/// Scheduled work owned by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Next heartbeat ping is due
    Ping,
    /// Outstanding ping has gone unacknowledged too long
    AckTimeout,
    /// Backoff before the next reconnect attempt elapsed
    Reconnect,
}

/// Input to the state machine.
pub enum CoreEvent {
    /// Transport for attempt `generation` is open
    Opened {
        generation: u64,
        sink: Box<dyn FrameSink>,
    },
    /// Attempt `generation` failed before a session existed
    ConnectFailed {
        generation: u64,
        error: WebSocketError,
    },
    /// Session `generation` closed
    Closed { generation: u64, info: CloseInfo },
    /// Text frame received on session `generation`
    Frame { generation: u64, text: String },
    TimerFired(TimerKind),
}

impl fmt::Debug for CoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened { generation, .. } => {
                f.debug_struct("Opened").field("generation", generation).finish()
            }
            Self::ConnectFailed { generation, error } => f
                .debug_struct("ConnectFailed")
                .field("generation", generation)
                .field("error", error)
                .finish(),
            Self::Closed { generation, info } => f
                .debug_struct("Closed")
                .field("generation", generation)
                .field("info", info)
                .finish(),
            Self::Frame { generation, text } => f
                .debug_struct("Frame")
                .field("generation", generation)
                .field("len", &text.len())
                .finish(),
            Self::TimerFired(kind) => f.debug_tuple("TimerFired").field(kind).finish(),
        }
    }
}

/// Work the driver performs after releasing the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch a token and open a transport for `generation`
    StartConnect { generation: u64 },
    /// Deliver a frame to user handlers
    Dispatch(WsFrame),
    /// Publish a lifecycle event
    Notify(WsEvent),
}

/// Transport-free client state.
pub struct ClientCore {
    state: ConnectionState,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectScheduler,
    queue: OutboundQueue,
    sink: Option<Box<dyn FrameSink>>,
    generation: u64,
    destroyed: bool,
    auth_rejected: bool,
    heartbeat_close_code: u16,
}

impl ClientCore {
    pub fn new(config: &WebSocketConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            heartbeat: HeartbeatMonitor::from_config(config),
            reconnect: ReconnectScheduler::from_config(config),
            queue: OutboundQueue::from_config(config),
            sink: None,
            generation: 0,
            destroyed: false,
            auth_rejected: false,
            heartbeat_close_code: config.heartbeat_close_code,
        }
    }

    /// Process one event.
    pub fn handle(&mut self, event: CoreEvent, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            CoreEvent::Opened { generation, sink } => {
                self.on_opened(generation, sink, now, &mut effects)
            }
            CoreEvent::ConnectFailed { generation, error } => {
                self.on_connect_failed(generation, error, now, &mut effects)
            }
            CoreEvent::Closed { generation, info } => {
                if self.is_current(generation) {
                    self.on_closed(info, now, &mut effects);
                }
            }
            CoreEvent::Frame { generation, text } => {
                if self.is_current(generation) {
                    self.on_frame(&text, now, &mut effects);
                }
            }
            CoreEvent::TimerFired(kind) => self.on_timer(kind, now, &mut effects),
        }
        effects
    }

    /// Explicit connect. Coalesced while a session is open or being
    /// established; otherwise resets the attempt budget and cancels any
    /// pending reconnect before starting a new attempt.
    pub fn connect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.destroyed {
            tracing::warn!("connect() called on destroyed client; ignoring");
            return effects;
        }
        if self.state.is_active() {
            tracing::debug!("connect() while {}; ignoring", self.state);
            return effects;
        }
        self.reconnect.reset();
        self.auth_rejected = false;
        self.begin_attempt(&mut effects);
        effects
    }

    /// Send immediately if open, otherwise queue. Returns whether the frame
    /// reached the transport.
    pub fn send(&mut self, action: &str, data: Value, now: Instant) -> bool {
        if self.destroyed {
            tracing::warn!("send('{}') on destroyed client; dropping", action);
            return false;
        }

        if self.state.is_open() {
            if let Some(sink) = self.sink.as_mut() {
                match WsFrame::new(action, data.clone()).to_json() {
                    Ok(text) => {
                        if sink.send_raw(text) {
                            return true;
                        }
                        tracing::debug!("Session refused '{}', queueing", action);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to encode '{}': {}", action, e);
                        return false;
                    }
                }
            }
        }

        self.queue.enqueue(action, data, now);
        false
    }

    /// Terminal shutdown. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.heartbeat.stop();
        self.reconnect.cancel();
        self.queue.clear();
        if let Some(mut sink) = self.sink.take() {
            sink.close(CLOSE_NORMAL, "Client destroyed");
        }
        // Anything still in flight belongs to a dead generation now
        self.generation += 1;
        self.state = ConnectionState::Closed;
        tracing::info!("Client destroyed");
    }

    /// Earliest armed timer, if any.
    pub fn next_deadline(&self) -> Option<(TimerKind, Instant)> {
        [
            self.heartbeat.next_ping_at().map(|at| (TimerKind::Ping, at)),
            self.heartbeat.ack_deadline().map(|at| (TimerKind::AckTimeout, at)),
            self.reconnect.deadline().map(|at| (TimerKind::Reconnect, at)),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(_, at)| *at)
    }

    pub fn status(&self) -> ConnectionState {
        self.state
    }

    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Whether the most recent failure was a credential problem.
    pub fn is_auth_rejected(&self) -> bool {
        self.auth_rejected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempts()
    }

    pub fn heartbeat_phase(&self) -> HeartbeatPhase {
        self.heartbeat.phase()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.destroyed && generation == self.generation
    }

    fn begin_attempt(&mut self, effects: &mut Vec<Effect>) {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        tracing::info!("Connecting (attempt generation {})", self.generation);
        effects.push(Effect::StartConnect {
            generation: self.generation,
        });
    }

    fn on_opened(
        &mut self,
        generation: u64,
        mut sink: Box<dyn FrameSink>,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if !self.is_current(generation) || self.state != ConnectionState::Connecting {
            tracing::debug!("Discarding stale session {}", generation);
            sink.close(CLOSE_NORMAL, "Superseded");
            return;
        }

        self.reconnect.reset();
        self.auth_rejected = false;
        self.heartbeat.start(now);

        // Drain before going Open so nothing sent afterwards overtakes the backlog
        let report = self.queue.drain(now, |msg| match msg.to_frame().to_json() {
            Ok(text) => sink.send_raw(text),
            Err(_) => false,
        });
        if report.remaining > 0 {
            tracing::warn!(
                "Session closed mid-drain; {} message(s) stay queued",
                report.remaining
            );
        }

        self.sink = Some(sink);
        self.state = ConnectionState::Open;
        tracing::info!("Connected");
        effects.push(Effect::Notify(WsEvent::Connected));
    }

    fn on_connect_failed(
        &mut self,
        generation: u64,
        error: WebSocketError,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if !self.is_current(generation) {
            return;
        }
        tracing::error!("Connect attempt failed: {}", error);

        match error {
            WebSocketError::InvalidUrl(_) | WebSocketError::InvalidConfig(_) => {
                self.reconnect.cancel();
                self.state = ConnectionState::Closed;
                effects.push(Effect::Notify(WsEvent::Error { error }));
            }
            ref e if e.is_auth() => {
                self.reconnect.cancel();
                self.auth_rejected = true;
                self.state = ConnectionState::Closed;
                effects.push(Effect::Notify(WsEvent::Error {
                    error: error.clone(),
                }));
                effects.push(Effect::Notify(WsEvent::AuthRejected {
                    reason: error.to_string(),
                }));
            }
            WebSocketError::HandshakeRejected { status } => {
                let info = CloseInfo::new(status, error.to_string(), false);
                effects.push(Effect::Notify(WsEvent::Error { error }));
                self.on_closed(info, now, effects);
            }
            other => {
                let info = CloseInfo::abnormal(other.to_string());
                effects.push(Effect::Notify(WsEvent::Error { error: other }));
                self.on_closed(info, now, effects);
            }
        }
    }

    fn on_closed(&mut self, info: CloseInfo, now: Instant, effects: &mut Vec<Effect>) {
        self.heartbeat.stop();
        self.sink = None;
        self.state = ConnectionState::Closed;
        tracing::info!("Disconnected: code {}, reason: {}", info.code, info.reason);

        effects.push(Effect::Notify(WsEvent::Disconnected {
            code: info.code,
            reason: info.reason.clone(),
            was_clean: info.was_clean,
        }));

        match self.reconnect.evaluate(&info, self.destroyed, now) {
            ReconnectDecision::Scheduled { attempt, delay } => {
                tracing::info!("Reconnecting in {:?} (attempt {})", delay, attempt);
                effects.push(Effect::Notify(WsEvent::Reconnecting {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                }));
            }
            ReconnectDecision::Exhausted { attempts } => {
                tracing::warn!("Giving up after {} reconnect attempts", attempts);
                effects.push(Effect::Notify(WsEvent::MaxReconnectReached { attempts }));
            }
            ReconnectDecision::AuthRejected => {
                tracing::warn!("Credential rejected (code {}); not reconnecting", info.code);
                self.auth_rejected = true;
                effects.push(Effect::Notify(WsEvent::AuthRejected {
                    reason: info.reason,
                }));
            }
            ReconnectDecision::Suppressed | ReconnectDecision::AlreadyScheduled => {}
        }
    }

    fn on_frame(&mut self, text: &str, now: Instant, effects: &mut Vec<Effect>) {
        match MessageRouter::decode(text) {
            Ok(Inbound::HeartbeatAck) => {
                if !self.heartbeat.on_ack(now) {
                    tracing::debug!("Unsolicited heartbeat ack");
                }
            }
            Ok(Inbound::Message(frame)) => effects.push(Effect::Dispatch(frame)),
            Err(error) => {
                tracing::warn!("Dropping malformed frame: {}", error);
                effects.push(Effect::Notify(WsEvent::Error { error }));
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind, now: Instant, effects: &mut Vec<Effect>) {
        if self.destroyed {
            return;
        }
        match kind {
            TimerKind::Ping => {
                let due = self.heartbeat.next_ping_at().is_some_and(|at| now >= at);
                if !due || !self.heartbeat.on_ping_due(now) {
                    return;
                }
                let Some(sink) = self.sink.as_mut() else {
                    return;
                };
                let ping = WsFrame::heartbeat(chrono::Utc::now().timestamp_millis());
                match ping.to_json() {
                    Ok(text) => {
                        if sink.send_raw(text) {
                            self.heartbeat.ping_sent(now);
                        } else {
                            tracing::debug!("Heartbeat not sent; session no longer open");
                        }
                    }
                    Err(e) => tracing::warn!("Failed to encode heartbeat: {}", e),
                }
            }
            TimerKind::AckTimeout => {
                if !self.heartbeat.check_timeout(now) {
                    return;
                }
                let timeout_ms = self.heartbeat.timeout().as_millis() as u64;
                tracing::warn!("No heartbeat ack within {}ms; closing session", timeout_ms);

                self.state = ConnectionState::Closing;
                if let Some(mut sink) = self.sink.take() {
                    sink.close(self.heartbeat_close_code, "Heartbeat timeout");
                }
                // The transport's own close event would be a duplicate
                self.generation += 1;

                effects.push(Effect::Notify(WsEvent::Error {
                    error: WebSocketError::HeartbeatTimeout { timeout_ms },
                }));
                let info = CloseInfo::new(self.heartbeat_close_code, "Heartbeat timeout", false);
                self.on_closed(info, now, effects);
            }
            TimerKind::Reconnect => {
                if self.reconnect.fire(now) && !self.state.is_active() {
                    self.begin_attempt(effects);
                }
            }
        }
    }
}

impl fmt::Debug for ClientCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCore")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("queued", &self.queue.len())
            .field("reconnect_attempts", &self.reconnect.attempts())
            .field("destroyed", &self.destroyed)
            .field("auth_rejected", &self.auth_rejected)
            .finish()
    }
}
