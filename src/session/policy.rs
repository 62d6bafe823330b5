//! Reconnect scheduling policy.
//!
//! The default reproduces the long-standing behavior of the chat room: one
//! retry every five seconds, forever. Deployments that want to spare the
//! server during an outage can cap attempts or switch to doubling delays.

use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Every attempt waits `base_delay`.
    Fixed,
    /// Attempt `n` waits `base_delay * 2^(n-1)`, capped at `max_delay`.
    Exponential { max_delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay: DEFAULT_RECONNECT_DELAY, max_attempts: None, backoff: Backoff::Fixed }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` once the
    /// attempt budget is spent.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && attempt > max
        {
            return None;
        }
        match self.backoff {
            Backoff::Fixed => Some(self.base_delay),
            Backoff::Exponential { max_delay } => {
                let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
                Some(self.base_delay.saturating_mul(factor).min(max_delay))
            }
        }
    }
}

#[cfg(test)]
#[path = "policy_test.rs"]
mod tests;
