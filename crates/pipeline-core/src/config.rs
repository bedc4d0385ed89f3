//! Pipeline configuration, read from the environment with documented
//! defaults, grouped the way §6's tunables are grouped in the design.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Memory-adaptive fan-out concurrency for batched operations (image prep,
/// motion-clip submission, template rendering).
#[derive(Debug, Clone, Copy)]
pub struct BatchingConfig {
    pub default_batch_size: usize,
    pub min_batch_size: usize,
    pub memory_warn_frac: f64,
    pub memory_critical_frac: f64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 5,
            min_batch_size: 1,
            memory_warn_frac: 0.70,
            memory_critical_frac: 0.80,
        }
    }
}

impl BatchingConfig {
    pub fn from_env() -> Self {
        Self {
            default_batch_size: env_or("BATCH_SIZE_DEFAULT", 5),
            min_batch_size: env_or("BATCH_SIZE_MIN", 1),
            memory_warn_frac: env_or("MEMORY_WARN_FRAC", 0.70),
            memory_critical_frac: env_or("MEMORY_CRIT_FRAC", 0.80),
        }
    }
}

/// Exponential-backoff-with-jitter parameters shared by every retry
/// envelope in the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub max_motion_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_motion_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        Self {
            max_retries: env_or("MAX_RETRIES", 3),
            max_motion_retries: env_or("MAX_MOTION_RETRIES", 3),
            initial_delay: Duration::from_millis(env_or("INITIAL_RETRY_DELAY_MS", 1000)),
            max_delay: Duration::from_millis(30_000),
        }
    }

    /// `delay(attempt) = min(initial * 2^(attempt-1) * (0.5 + rand), max)`.
    /// `attempt` is 1-based.
    pub fn delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
        let jittered = base * (0.5 + jitter);
        let capped = jittered.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Asset cache TTL tiers and the per-validation-result memoization window.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub ttl_normal: Duration,
    pub ttl_frequent: Duration,
    pub frequent_threshold: u32,
    pub validation_cache_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_normal: Duration::from_millis(24 * 60 * 60 * 1000),
            ttl_frequent: Duration::from_millis(7 * 24 * 60 * 60 * 1000),
            frequent_threshold: 5,
            validation_cache_ttl: Duration::from_millis(5 * 60 * 1000),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            ttl_normal: Duration::from_millis(env_or("CACHE_TTL_NORMAL_MS", 24 * 60 * 60 * 1000)),
            ttl_frequent: Duration::from_millis(env_or("CACHE_TTL_FREQUENT_MS", 7 * 24 * 60 * 60 * 1000)),
            frequent_threshold: env_or("CACHE_FREQUENT_THRESHOLD", 5),
            validation_cache_ttl: Duration::from_millis(env_or("VALIDATION_CACHE_TTL_MS", 5 * 60 * 1000)),
        }
    }
}

/// `ListingLock` lease and acquisition-retry parameters.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    pub lock_timeout: Duration,
    pub max_acquire_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(30 * 60 * 1000),
            max_acquire_attempts: 3,
        }
    }
}

impl LockConfig {
    pub fn from_env() -> Self {
        Self {
            lock_timeout: Duration::from_millis(env_or("LOCK_TIMEOUT_MS", 30 * 60 * 1000)),
            max_acquire_attempts: env_or("LOCK_MAX_ACQUIRE_ATTEMPTS", 3),
        }
    }
}

/// Aggregate configuration for one `Pipeline` instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    pub batching: BatchingConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub lock: LockConfig,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            batching: BatchingConfig::from_env(),
            retry: RetryConfig::from_env(),
            cache: CacheConfig::from_env(),
            lock: LockConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.batching.default_batch_size, 5);
        assert_eq!(config.batching.min_batch_size, 1);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.cache.frequent_threshold, 5);
        assert_eq!(config.lock.lock_timeout, Duration::from_secs(30 * 60));
    }

    #[test]
    fn jitter_backoff_caps_at_max_delay() {
        let retry = RetryConfig::default();
        let delay = retry.delay_for_attempt(10, 0.5);
        assert_eq!(delay, retry.max_delay);
    }

    #[test]
    fn jitter_backoff_doubles_per_attempt_before_capping() {
        let retry = RetryConfig::default();
        let low = retry.delay_for_attempt(1, 0.0);
        let high = retry.delay_for_attempt(2, 0.0);
        assert_eq!(low.as_millis(), 500);
        assert_eq!(high.as_millis(), 1000);
    }
}
