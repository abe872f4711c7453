//! Reconnection policies.
//!
//! The connection manager asks its [`ReconnectPolicy`] what to do after a
//! link is lost or cannot be opened. The default is to stay down.

use std::fmt::Debug;
use std::time::Duration;

/// Decides whether and when to retry after a lost or failed link.
pub trait ReconnectPolicy: Debug + Send + Sync + 'static {
    /// Delay before attempt number `attempt` (1-based), or `None` to give up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Never reconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Doubling backoff: `min(base * 2^(attempt - 1), max)`, up to
/// `max_attempts` tries.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Retries before giving up.
    pub max_attempts: u32,
}

impl ExponentialBackoff {
    /// Creates a backoff policy.
    #[must_use]
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.max))
    }
}
