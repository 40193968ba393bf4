//! Dashboard configuration.

use kpi_core::Period;
use std::time::Duration;

/// How long a cached aggregate stays valid.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on a single territory fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts per territory fetch, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Base delay between attempts; attempt `n` waits `n` times this.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Tunables for [`KpiDashboard`](crate::KpiDashboard).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DashboardConfig {
    /// Maximum age of a cached aggregate.
    pub cache_ttl: Duration,
    /// Timeout for one territory fetch.
    pub fetch_timeout: Duration,
    /// Attempts per territory fetch; never less than one.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub retry_backoff: Duration,
    /// Period selected when a session starts.
    pub default_period: Period,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            default_period: Period::Today,
        }
    }
}

impl DashboardConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the per-territory fetch timeout.
    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the number of attempts per territory fetch, clamped to at least one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay between attempts.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the period selected at session start.
    #[must_use]
    pub const fn with_default_period(mut self, period: Period) -> Self {
        self.default_period = period;
        self
    }
}
