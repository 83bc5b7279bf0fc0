//! Connection retry policy with exponential backoff

use crate::config::Config;
use crate::error::Error;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Connection attempts per run, the first one included
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0), applied below the ceiling
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter: 0.0,
        }
    }
}

impl From<&Config> for RetryConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms.max(config.retry_delay_ms),
            ..Default::default()
        }
    }
}

impl RetryConfig {
    /// Whether another attempt may follow `attempts_made` failed ones
    pub fn should_retry(&self, error: &Error, attempts_made: u32) -> bool {
        error.is_retryable() && attempts_made < self.max_attempts
    }

    /// Delay before the attempt following the `failures`-th failure (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        calculate_delay(self, failures.saturating_sub(1))
    }
}

/// Calculate delay with exponential backoff: base * 2^attempt, capped
pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let exponential = config.base_delay_ms.saturating_mul(factor);
    let capped = std::cmp::min(exponential, config.max_delay_ms);

    let jitter_range = (capped as f64 * config.jitter.clamp(0.0, 1.0)) as u64;
    let jitter = if jitter_range > 0 {
        rand_jitter(jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped.saturating_add(jitter).min(config.max_delay_ms))
}

/// Cheap clock-derived jitter
fn rand_jitter(max: u64) -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos % max
}
