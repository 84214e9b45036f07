//! Configuration for the sync engine.

use crate::conflict::ConflictPolicy;
use std::time::Duration;
use treesync_protocol::PROTOCOL_VERSION;

/// Configuration for sync cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Account / share name sent with every request.
    pub share: String,
    /// Protocol version.
    pub protocol_version: u16,
    /// Maximum number of entities per download.
    pub batch_size: u32,
    /// Hard cap on applicator passes per run.
    pub max_apply_passes: usize,
    /// Hard cap on build/resolve iterations per cycle.
    pub max_conflict_iterations: usize,
    /// Maximum cycles run by one `sync()` while the server has more changes.
    pub max_cycles_per_sync: u32,
    /// How conflicts are resolved.
    pub conflict_policy: ConflictPolicy,
    /// Whether the client receives server notifications.
    pub notifications_enabled: bool,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for `share`.
    pub fn new(share: impl Into<String>) -> Self {
        Self {
            share: share.into(),
            protocol_version: PROTOCOL_VERSION,
            batch_size: 100,
            max_apply_passes: 1_000,
            max_conflict_iterations: 8,
            max_cycles_per_sync: 16,
            conflict_policy: ConflictPolicy::ServerWins,
            notifications_enabled: false,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the download batch size.
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the applicator pass cap.
    pub fn with_max_apply_passes(mut self, passes: usize) -> Self {
        self.max_apply_passes = passes;
        self
    }

    /// Sets the conflict iteration cap.
    pub fn with_max_conflict_iterations(mut self, iterations: usize) -> Self {
        self.max_conflict_iterations = iterations;
        self
    }

    /// Sets the per-sync cycle cap.
    pub fn with_max_cycles_per_sync(mut self, cycles: u32) -> Self {
        self.max_cycles_per_sync = cycles;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets whether notifications are enabled.
    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Backoff between failed sync cycles.
///
/// Retry `n` waits up to `base_delay * factor^(n - 1)`, capped at
/// `max_delay`. With `spread` set the wait falls in the upper half of that
/// window at a point fixed by the client's seed, so clients that failed on
/// the same server error come back at different times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts made by `sync_with_retry`, the first one included.
    pub max_attempts: u32,
    /// Window for the first retry.
    pub base_delay: Duration,
    /// Upper bound for any window.
    pub max_delay: Duration,
    /// Growth of the window per retry.
    pub factor: u32,
    /// Whether to spread retries across the window.
    pub spread: bool,
}

impl RetryConfig {
    /// Creates a policy making up to `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
            factor: 2,
            spread: true,
        }
    }

    /// A single attempt and no waiting.
    pub fn once() -> Self {
        Self {
            base_delay: Duration::ZERO,
            spread: false,
            ..Self::new(1)
        }
    }

    /// Sets the first retry window.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the window cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor;
        self
    }

    /// Sets whether retries are spread.
    pub fn with_spread(mut self, spread: bool) -> Self {
        self.spread = spread;
        self
    }

    /// The backoff window for retry `attempt`; zero before the first failure.
    pub fn window(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let scale = self
            .factor
            .max(1)
            .checked_pow(attempt - 1)
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(scale).min(self.max_delay)
    }

    /// The wait before retry `attempt` for the client identified by `seed`.
    pub fn delay_for_attempt(&self, attempt: u32, seed: u128) -> Duration {
        let window = self.window(attempt);
        if !self.spread || window.is_zero() {
            return window;
        }
        let half = window / 2;
        let mixed = ((seed as u64) ^ ((seed >> 64) as u64) ^ u64::from(attempt))
            .wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let fraction = (mixed >> 11) as f64 / (1u64 << 53) as f64;
        half + half.mul_f64(fraction)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
