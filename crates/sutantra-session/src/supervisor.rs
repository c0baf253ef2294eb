//! # Reconnection Supervisor
//!
//! Decides when the session should reopen its transport. Pure state; the
//! session task owns the timers and performs the actual reconnect.
//!
//! ```text
//!   Idle ──connected──▶ Connected ──unexpected close──▶ Reconnecting ──connected──▶ Connected
//!                           │                               │
//!                       disconnect                    max_attempts hit
//!                           ▼                               ▼
//!                        Stopped                          GiveUp
//! ```
//!
//! A local `disconnect()` moves to `Stopped` from any state and nothing is
//! retried until the caller connects again.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ReconnectConfig;

/// Delay between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Fixed(Duration),
    /// `base * 2^(failures-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl RetryPolicy {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(d) => d,
            RetryPolicy::Exponential { base, max } => {
                let shift = failures.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No connection attempted yet, or reconnection is disabled.
    Idle,
    Connected,
    Reconnecting,
    GiveUp,
    /// Explicit disconnect.
    Stopped,
}

/// What to do after a failed connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { at: Instant, attempt: u32 },
    GiveUp,
    Stop,
}

#[derive(Debug)]
pub struct Supervisor {
    state: SupervisorState,
    enabled: bool,
    policy: RetryPolicy,
    max_attempts: Option<u32>,
    failures: u32,
    next_attempt: Option<Instant>,
}

impl Supervisor {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            state: SupervisorState::Idle,
            enabled: config.enabled,
            policy: config.policy,
            max_attempts: config.max_attempts,
            failures: 0,
            next_attempt: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        self.state == SupervisorState::Stopped
    }

    /// Caller asked to connect: forget any earlier stop or give-up.
    pub fn arm(&mut self) {
        self.state = SupervisorState::Idle;
        self.failures = 0;
        self.next_attempt = None;
    }

    pub fn on_connected(&mut self) {
        if self.state == SupervisorState::Stopped {
            return;
        }
        self.state = SupervisorState::Connected;
        self.failures = 0;
        self.next_attempt = None;
    }

    /// The transport went away without us asking. Returns when to retry.
    pub fn on_unexpected_close(&mut self, now: Instant) -> Option<Instant> {
        if !self.enabled || matches!(self.state, SupervisorState::Stopped | SupervisorState::GiveUp) {
            return None;
        }
        self.state = SupervisorState::Reconnecting;
        self.next_attempt = Some(now);
        self.next_attempt
    }

    /// A connect cycle (transport open + handshake) failed.
    pub fn on_attempt_failed(&mut self, now: Instant) -> RetryDecision {
        if self.state == SupervisorState::Stopped {
            return RetryDecision::Stop;
        }
        if !self.enabled {
            self.state = SupervisorState::Idle;
            return RetryDecision::Stop;
        }
        self.failures = self.failures.saturating_add(1);
        if let Some(max) = self.max_attempts {
            if self.failures >= max {
                self.state = SupervisorState::GiveUp;
                self.next_attempt = None;
                return RetryDecision::GiveUp;
            }
        }
        let at = now + self.policy.delay(self.failures);
        self.state = SupervisorState::Reconnecting;
        self.next_attempt = Some(at);
        RetryDecision::Retry {
            at,
            attempt: self.failures + 1,
        }
    }

    pub fn next_attempt(&self) -> Option<Instant> {
        self.next_attempt
    }

    /// Consume a due attempt. Returns the attempt number (1-based).
    pub fn take_due(&mut self, now: Instant) -> Option<u32> {
        match self.next_attempt {
            Some(at) if at <= now && self.state == SupervisorState::Reconnecting => {
                self.next_attempt = None;
                Some(self.failures + 1)
            }
            _ => None,
        }
    }

    /// Explicit disconnect. Idempotent.
    pub fn stop(&mut self) {
        self.state = SupervisorState::Stopped;
        self.next_attempt = None;
    }
}
