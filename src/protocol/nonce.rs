//! Anti-replay nonces.
//!
//! The server rejects any command whose nonce is not greater than the last
//! one it saw for the same key, so [`NonceClock::next`] must be strictly
//! increasing for the lifetime of the process. Wall-clock milliseconds are
//! the default source; if the clock stalls or steps backwards the clock
//! issues `last + 1` instead.

use std::str::FromStr;

use chrono::Utc;

/// Where fresh nonces come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonceSource {
    /// Milliseconds since the Unix epoch.
    #[default]
    WallClock,
    /// A plain counter.
    Counter,
}

impl FromStr for NonceSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clock" | "wallclock" | "wall_clock" => Ok(Self::WallClock),
            "counter" => Ok(Self::Counter),
            other => Err(format!("unknown nonce source `{other}`")),
        }
    }
}

/// Strictly increasing nonce generator.
///
/// Not internally synchronized: the dispatcher owns it behind the same lock
/// that serializes signing and transmission.
#[derive(Debug, Clone)]
pub struct NonceClock {
    source: NonceSource,
    last: Option<u64>,
}

impl NonceClock {
    /// Creates a wall-clock nonce source.
    #[must_use]
    pub const fn wall_clock() -> Self {
        Self {
            source: NonceSource::WallClock,
            last: None,
        }
    }

    /// Creates a counter whose first value is `start`.
    #[must_use]
    pub const fn counter(start: u64) -> Self {
        Self {
            source: NonceSource::Counter,
            last: start.checked_sub(1),
        }
    }

    /// Creates a clock for the configured source. Counters start at 1.
    #[must_use]
    pub const fn from_source(source: NonceSource) -> Self {
        match source {
            NonceSource::WallClock => Self::wall_clock(),
            NonceSource::Counter => Self::counter(1),
        }
    }

    /// Returns the next nonce, strictly greater than every previous one.
    pub fn next(&mut self) -> u64 {
        let floor = self.last.map_or(0, |last| last.saturating_add(1));
        let candidate = match self.source {
            NonceSource::WallClock => now_millis(),
            NonceSource::Counter => floor,
        };
        let nonce = candidate.max(floor);
        self.last = Some(nonce);
        nonce
    }

    /// Returns the most recently issued nonce, if any.
    #[must_use]
    pub const fn last(&self) -> Option<u64> {
        self.last
    }
}

impl Default for NonceClock {
    fn default() -> Self {
        Self::wall_clock()
    }
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
