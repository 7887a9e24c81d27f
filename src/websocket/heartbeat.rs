//! Heartbeat liveness monitor.
//!
//! ```text
//! Inactive --start--> Armed --ping due--> AwaitingAck --ack--> Armed
//!                                          AwaitingAck --timeout--> Inactive
//! ```
//!
//! The monitor owns no timers. It exposes the instants at which the next
//! ping is due and at which the outstanding ping expires; the driver sleeps
//! until those and calls back in. Leaving a phase clears its deadline, so a
//! stopped monitor never leaves a timer armed.

use std::time::Duration;

use tokio::time::Instant;

use crate::websocket::config::WebSocketConfig;

/// Monitor phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPhase {
    Inactive,
    Armed,
    AwaitingAck,
}

/// Snapshot of liveness bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub last_ack_at: Option<Instant>,
    pub pending_ping_at: Option<Instant>,
}

/// Periodic ping / ack-timeout tracker for one session at a time.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    phase: HeartbeatPhase,
    next_ping_at: Option<Instant>,
    pending_ping_at: Option<Instant>,
    last_ack_at: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            phase: HeartbeatPhase::Inactive,
            next_ping_at: None,
            pending_ping_at: None,
            last_ack_at: None,
        }
    }

    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self::new(config.heartbeat_interval(), config.heartbeat_timeout())
    }

    /// Arm for a freshly opened session.
    pub fn start(&mut self, now: Instant) {
        self.phase = HeartbeatPhase::Armed;
        self.next_ping_at = Some(now + self.interval);
        self.pending_ping_at = None;
        self.last_ack_at = Some(now);
    }

    /// Disarm; clears every deadline.
    pub fn stop(&mut self) {
        self.phase = HeartbeatPhase::Inactive;
        self.next_ping_at = None;
        self.pending_ping_at = None;
    }

    /// The ping timer fired. Reschedules the next tick and returns whether a
    /// ping should go out now (never while one is outstanding).
    pub fn on_ping_due(&mut self, now: Instant) -> bool {
        match self.phase {
            HeartbeatPhase::Inactive => false,
            HeartbeatPhase::AwaitingAck => {
                self.next_ping_at = Some(now + self.interval);
                tracing::debug!("Heartbeat still awaiting ack, skipping ping");
                false
            }
            HeartbeatPhase::Armed => {
                self.next_ping_at = Some(now + self.interval);
                true
            }
        }
    }

    /// A ping was written to the transport.
    pub fn ping_sent(&mut self, now: Instant) {
        if self.phase == HeartbeatPhase::Armed {
            self.phase = HeartbeatPhase::AwaitingAck;
            self.pending_ping_at = Some(now);
        }
    }

    /// An ack arrived. Returns `false` if no ping was outstanding.
    pub fn on_ack(&mut self, now: Instant) -> bool {
        if self.phase == HeartbeatPhase::Inactive {
            return false;
        }
        self.last_ack_at = Some(now);
        let was_pending = self.pending_ping_at.take().is_some();
        self.phase = HeartbeatPhase::Armed;
        was_pending
    }

    /// Whether the outstanding ping has expired. Returns `true` exactly once
    /// per expired ping and deactivates the monitor.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        match self.ack_deadline() {
            Some(deadline) if now >= deadline => {
                self.stop();
                true
            }
            _ => false,
        }
    }

    pub fn phase(&self) -> HeartbeatPhase {
        self.phase
    }

    pub fn state(&self) -> HeartbeatState {
        HeartbeatState {
            last_ack_at: self.last_ack_at,
            pending_ping_at: self.pending_ping_at,
        }
    }

    pub fn next_ping_at(&self) -> Option<Instant> {
        self.next_ping_at
    }

    /// When the outstanding ping expires, if one is outstanding.
    pub fn ack_deadline(&self) -> Option<Instant> {
        self.pending_ping_at.map(|sent| sent + self.timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
