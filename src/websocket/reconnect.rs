//! Reconnection policy.
//!
//! Decides, for every session close, whether and when to try again.
//! Delays use linear jitter, `base * (1 + U[0,1))`, so that many clients
//! dropped at the same moment do not reconnect in lockstep.

use std::time::Duration;

use tokio::time::Instant;

use crate::websocket::config::WebSocketConfig;
use crate::websocket::types::CloseInfo;

/// Outcome of evaluating a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// A reconnect fires after `delay`
    Scheduled { attempt: u32, delay: Duration },
    /// Attempt budget spent; wait for an explicit connect
    Exhausted { attempts: u32 },
    /// Credential rejected; never retried automatically
    AuthRejected,
    /// The client was destroyed
    Suppressed,
    /// A reconnect is already pending
    AlreadyScheduled,
}

/// Attempt counter and single pending reconnect deadline.
#[derive(Debug)]
pub struct ReconnectScheduler {
    base_delay: Duration,
    max_attempts: u32,
    auth_reject_code: u16,
    attempts: u32,
    last_attempt_at: Option<Instant>,
    pending: Option<Instant>,
}

impl ReconnectScheduler {
    pub fn new(base_delay: Duration, max_attempts: u32, auth_reject_code: u16) -> Self {
        Self {
            base_delay,
            max_attempts,
            auth_reject_code,
            attempts: 0,
            last_attempt_at: None,
            pending: None,
        }
    }

    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self::new(
            config.reconnect_interval(),
            config.max_reconnect_attempts,
            config.auth_reject_code,
        )
    }

    /// Evaluate a close and, if allowed, schedule the next attempt.
    pub fn evaluate(&mut self, close: &CloseInfo, destroyed: bool, now: Instant) -> ReconnectDecision {
        if destroyed {
            self.cancel();
            return ReconnectDecision::Suppressed;
        }

        if close.code == self.auth_reject_code {
            self.cancel();
            return ReconnectDecision::AuthRejected;
        }

        if self.pending.is_some() {
            return ReconnectDecision::AlreadyScheduled;
        }

        if self.attempts >= self.max_attempts {
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.last_attempt_at = Some(now);
        let delay = jittered_delay(self.base_delay, rand::random::<f64>());
        self.pending = Some(now + delay);

        ReconnectDecision::Scheduled {
            attempt: self.attempts,
            delay,
        }
    }

    /// Consume the pending reconnect if its deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(deadline) if now >= deadline => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Drop any pending reconnect without touching the attempt count.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Back to zero attempts, nothing pending. Called on every successful
    /// open and on explicit connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.pending = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt_at(&self) -> Option<Instant> {
        self.last_attempt_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// `base * (1 + jitter)` with `jitter` clamped to `[0, 1]`.
pub fn jittered_delay(base: Duration, jitter: f64) -> Duration {
    base.mul_f64(1.0 + jitter.clamp(0.0, 1.0))
}
