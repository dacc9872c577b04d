//! Adaptive polling schedule.
//!
//! Decides how long the scheduler sleeps between synchronization passes.
//! Two inputs drive it:
//! - idleness: time since the last externally signaled activity, which
//!   doubles the base interval every idle period up to a cap
//! - error backoff: doubled on every failed pass, reset on success
//!
//! The larger of the two wins.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler tuning, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval while the user is active (default: 5s).
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    /// Length of one idle period (default: 30s).
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,
    /// Upper bound of the idle-driven interval (default: 60s).
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Error delay after a successful pass (default: 1s).
    #[serde(default = "default_initial_retry_ms")]
    pub initial_retry_ms: u64,
    /// Upper bound of the error delay (default: 30s).
    #[serde(default = "default_max_retry_ms")]
    pub max_retry_ms: u64,
}

fn default_base_interval_ms() -> u64 {
    5_000
}

fn default_idle_threshold_ms() -> u64 {
    30_000
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_initial_retry_ms() -> u64 {
    1_000
}

fn default_max_retry_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            idle_threshold_ms: default_idle_threshold_ms(),
            max_interval_ms: default_max_interval_ms(),
            initial_retry_ms: default_initial_retry_ms(),
            max_retry_ms: default_max_retry_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Interval driven by idleness alone.
    pub fn idle_interval(&self, idle: Duration) -> Duration {
        let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
        if idle_ms < self.idle_threshold_ms || self.idle_threshold_ms == 0 {
            return Duration::from_millis(self.base_interval_ms);
        }

        let periods = (idle_ms / self.idle_threshold_ms).min(63) as u32;
        let factor = 1u64 << periods;
        let base = self
            .base_interval_ms
            .saturating_mul(factor)
            .min(self.max_interval_ms);
        Duration::from_millis(base)
    }

    /// Next sleep given idleness and the current error delay.
    pub fn next_interval(&self, idle: Duration, error_delay: Duration) -> Duration {
        self.idle_interval(idle).max(error_delay)
    }
}

/// Error-driven backoff: doubles per failure, resets on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl ErrorBackoff {
    /// Create a backoff starting at the configured initial delay.
    pub fn new(config: &SchedulerConfig) -> Self {
        let initial = Duration::from_millis(config.initial_retry_ms);
        Self {
            current: initial,
            initial,
            max: Duration::from_millis(config.max_retry_ms),
        }
    }

    /// Current error delay.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a successful pass.
    pub fn on_success(&mut self) {
        self.current = self.initial;
    }

    /// Record a failed pass and return the new delay.
    pub fn on_failure(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    // ===========================================
    // Interval law
    // ===========================================

    #[test]
    fn active_user_polls_at_base_interval() {
        let config = SchedulerConfig::default();
        assert_eq!(config.next_interval(ms(0), ms(1_000)), ms(5_000));
        assert_eq!(config.next_interval(ms(29_999), ms(1_000)), ms(5_000));
    }

    #[test]
    fn one_idle_period_doubles_interval() {
        let config = SchedulerConfig::default();
        assert_eq!(config.next_interval(ms(35_000), ms(1_000)), ms(10_000));
        assert_eq!(config.next_interval(ms(30_000), ms(1_000)), ms(10_000));
    }

    #[test]
    fn long_idleness_is_capped() {
        let config = SchedulerConfig::default();
        assert_eq!(config.next_interval(ms(125_000), ms(1_000)), ms(60_000));
        assert_eq!(config.next_interval(ms(86_400_000), ms(1_000)), ms(60_000));
    }

    #[test]
    fn error_delay_dominates_when_larger() {
        let config = SchedulerConfig::default();
        assert_eq!(config.next_interval(ms(0), ms(20_000)), ms(20_000));
    }

    #[test]
    fn huge_idle_does_not_overflow() {
        let config = SchedulerConfig::default();
        assert_eq!(
            config.idle_interval(Duration::from_secs(u64::MAX / 2)),
            ms(60_000)
        );
    }

    // ===========================================
    // Error backoff
    // ===========================================

    #[test]
    fn consecutive_failures_double_delay() {
        let mut backoff = ErrorBackoff::new(&SchedulerConfig::default());
        assert_eq!(backoff.current(), ms(1_000));

        assert_eq!(backoff.on_failure(), ms(2_000));
        assert_eq!(backoff.on_failure(), ms(4_000));
        assert_eq!(backoff.on_failure(), ms(8_000));
    }

    #[test]
    fn failure_delay_is_capped() {
        let mut backoff = ErrorBackoff::new(&SchedulerConfig::default());
        for _ in 0..10 {
            backoff.on_failure();
        }
        assert_eq!(backoff.current(), ms(30_000));
        assert_eq!(backoff.on_failure(), ms(30_000));
    }

    #[test]
    fn success_resets_delay() {
        let mut backoff = ErrorBackoff::new(&SchedulerConfig::default());
        backoff.on_failure();
        backoff.on_failure();

        backoff.on_success();
        assert_eq!(backoff.current(), ms(1_000));
    }
}
