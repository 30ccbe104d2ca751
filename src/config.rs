//! Configuration types for retry, catalog, transport, and parallel execution.
//!
//! All configs deserialize with serde and carry sensible defaults so callers
//! can construct them with struct-update syntax from `Default`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controls how the retry engine orders the (model, region) target sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Exhaust all regions for the first model before falling back to the next.
    #[default]
    ModelFirst,
    /// Exhaust all models in the first region before switching regions.
    RegionFirst,
}

/// Retry and failover behavior for a single converse call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of chargeable attempts across all targets.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Base delay used instead of `base_delay_ms` when the error was a throttle.
    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,

    /// Whether incompatible features (guardrails, tool use, ...) may be
    /// disabled and the same target retried.
    #[serde(default = "default_true")]
    pub enable_feature_fallback: bool,

    /// Ordering of the outer target sequence.
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            throttle_delay_ms: default_throttle_delay_ms(),
            enable_feature_fallback: true,
            retry_strategy: RetryStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff delay for a given attempt (0-indexed).
    ///
    /// Throttling errors use `throttle_delay_ms` as the base. Jitter is
    /// +/- 20% of the capped delay.
    pub fn delay_for_attempt(&self, attempt: u32, throttled: bool) -> Duration {
        let base = if throttled {
            self.throttle_delay_ms as f64
        } else {
            self.base_delay_ms as f64
        };
        let raw = base * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay_ms as f64);

        let jitter_range = capped * 0.2;
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_throttle_delay_ms() -> u64 {
    2_000
}

fn default_true() -> bool {
    true
}

/// Transport-level limits applied to the underlying HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Read timeout for a single transport call in seconds.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum idle connections kept per host.
    #[serde(default = "default_max_pool_connections")]
    pub max_pool_connections: usize,

    /// Transport-internal retry attempts (below the failover engine).
    #[serde(default = "default_transport_retries")]
    pub retries_max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_pool_connections: default_max_pool_connections(),
            retries_max_attempts: default_transport_retries(),
        }
    }
}

fn default_read_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_pool_connections() -> usize {
    10
}

fn default_transport_retries() -> u32 {
    1
}

/// Catalog caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Persist the catalog to a JSON file (primary then fallback directory).
    #[default]
    File,
    /// Keep the catalog in memory for the process lifetime.
    Memory,
    /// Never cache; always fetch fresh.
    None,
}

/// Catalog construction and caching behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Caching strategy.
    #[serde(default)]
    pub cache_mode: CacheMode,

    /// Primary cache directory. Defaults to a per-user data directory.
    #[serde(default)]
    pub cache_directory: Option<PathBuf>,

    /// Maximum cache age before a stored catalog is considered expired.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: f64,

    /// Cap on generated aliases per catalog entry.
    #[serde(default = "default_max_aliases")]
    pub max_aliases_per_model: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            cache_mode: CacheMode::default(),
            cache_directory: None,
            max_age_hours: default_max_age_hours(),
            max_aliases_per_model: default_max_aliases(),
        }
    }
}

impl CatalogConfig {
    /// Validate the configuration, returning a message for the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_age_hours <= 0.0 {
            return Err(format!(
                "max_age_hours must be positive, got {}",
                self.max_age_hours
            ));
        }
        if self.max_aliases_per_model == 0 {
            return Err("max_aliases_per_model must be at least 1".to_string());
        }
        Ok(())
    }
}

fn default_max_age_hours() -> f64 {
    24.0
}

fn default_max_aliases() -> usize {
    10
}

/// How requests are spread across regions in a parallel batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Rotate through regions with a moving cursor. Deterministic.
    #[default]
    RoundRobin,
    /// Uniform sample without replacement per request.
    Random,
    /// Pick the regions with the smallest current load counters.
    LeastLoaded,
}

/// Policy controlling whether a parallel batch aborts on failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureHandlingStrategy {
    /// Never cancel; the batch succeeds if any request succeeded.
    #[default]
    ContinueOnFailure,
    /// Cancel pending work on the first failed request.
    StopOnFirstFailure,
    /// Cancel pending work once the failure rate exceeds the threshold.
    StopOnThreshold,
}

/// Parallel execution behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Per-request timeout in seconds; expiry classifies as transient.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_seconds: u64,

    /// Failure policy for the whole batch.
    #[serde(default)]
    pub failure_handling_strategy: FailureHandlingStrategy,

    /// Failure-rate threshold for [`FailureHandlingStrategy::StopOnThreshold`].
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Region assignment strategy.
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,

    /// Minimum max-min load gap before the optimizer rebalances an assignment.
    #[serde(default = "default_load_variance_threshold")]
    pub load_variance_threshold: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            request_timeout_seconds: default_request_timeout_secs(),
            failure_handling_strategy: FailureHandlingStrategy::default(),
            failure_threshold: default_failure_threshold(),
            load_balancing_strategy: LoadBalancingStrategy::default(),
            load_variance_threshold: default_load_variance_threshold(),
        }
    }
}

impl ParallelConfig {
    /// Validate the configuration, returning a message for the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_requests == 0 {
            return Err("max_concurrent_requests must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(format!(
                "failure_threshold must be within [0, 1], got {}",
                self.failure_threshold
            ));
        }
        Ok(())
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_failure_threshold() -> f64 {
    0.5
}

fn default_load_variance_threshold() -> usize {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 10_000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.throttle_delay_ms, 2_000);
        assert!(config.enable_feature_fallback);
        assert_eq!(config.retry_strategy, RetryStrategy::ModelFirst);
    }

    #[test]
    fn test_delay_exponential_growth() {
        let config = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 100_000,
            backoff_multiplier: 2.0,
            ..Default::default()
        };

        // Jitter is +/- 20%, so check the window around each expected value.
        for (attempt, expected) in [(0u32, 100.0f64), (1, 200.0), (2, 400.0), (3, 800.0)] {
            let ms = config.delay_for_attempt(attempt, false).as_millis() as f64;
            assert!(
                (expected * 0.79..=expected * 1.21).contains(&ms),
                "attempt {attempt}: {ms}ms outside jitter window of {expected}ms"
            );
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            backoff_multiplier: 10.0,
            ..Default::default()
        };

        let ms = config.delay_for_attempt(5, false).as_millis();
        assert!(ms <= 6_000, "delay {ms}ms exceeds cap plus jitter");
    }

    #[test]
    fn test_throttle_uses_throttle_base() {
        let config = RetryConfig {
            base_delay_ms: 100,
            throttle_delay_ms: 2_000,
            max_delay_ms: 100_000,
            ..Default::default()
        };

        let ms = config.delay_for_attempt(0, true).as_millis() as f64;
        assert!(
            (1_600.0..=2_400.0).contains(&ms),
            "throttle delay {ms}ms outside expected window"
        );
    }

    #[test]
    fn test_catalog_config_rejects_non_positive_age() {
        let config = CatalogConfig {
            max_age_hours: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CatalogConfig {
            max_age_hours: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parallel_config_validation() {
        assert!(ParallelConfig::default().validate().is_ok());

        let config = ParallelConfig {
            max_concurrent_requests: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ParallelConfig {
            failure_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_serde_round_trip() {
        let json = serde_json::to_string(&RetryStrategy::RegionFirst).unwrap();
        assert_eq!(json, "\"region_first\"");
        let back: RetryStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RetryStrategy::RegionFirst);

        let json = serde_json::to_string(&LoadBalancingStrategy::LeastLoaded).unwrap();
        assert_eq!(json, "\"least_loaded\"");

        let json = serde_json::to_string(&FailureHandlingStrategy::StopOnFirstFailure).unwrap();
        assert_eq!(json, "\"stop_on_first_failure\"");
    }
}
