//! Shared configuration types for the CMMS query platform
//!
//! Resilience, cache, and pipeline tuning lives here so the service, the
//! database layer, and the admin hot-update endpoint all speak the same
//! shapes. Defaults carry the production values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection acquire timeout in seconds
    pub acquire_timeout_seconds: u64,
    /// Idle timeout for pooled connections in seconds
    pub idle_timeout_seconds: u64,
    /// Maximum lifetime of a connection in seconds
    pub max_lifetime_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/cmms".to_string(),
            max_connections: 20,
            min_connections: 5,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            max_lifetime_seconds: 3600,
        }
    }
}

impl DatabaseConfig {
    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_seconds)
    }
}

/// Retry policy for one dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Base delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt
    pub exponential_base: f64,
    /// Maximum random jitter added to each delay in milliseconds
    pub jitter_ms: u64,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Error substrings/codes that qualify as retryable
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter_ms: 250,
            timeout_ms: 30_000,
            retryable_errors: vec![
                "429".to_string(),
                "502".to_string(),
                "503".to_string(),
                "timeout".to_string(),
                "ECONNRESET".to_string(),
                "ETIMEDOUT".to_string(),
                "network".to_string(),
            ],
        }
    }
}

impl RetryConfig {
    /// Get per-attempt timeout as Duration
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff delay before retry number `attempt` (1-based), without jitter.
    /// Jitter is added by the executor so this stays deterministic for tests.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.exponential_base.powi(attempt.saturating_sub(1) as i32);
        let raw = (self.base_delay_ms as f64 * exp).round() as u64;
        Duration::from_millis(raw.min(self.max_delay_ms))
    }
}

/// Circuit breaker thresholds for one dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring window required to open
    pub failure_threshold: u32,
    /// Time the circuit stays open before probing in milliseconds
    pub recovery_timeout_ms: u64,
    /// Successes in half-open required to close
    pub success_threshold: u32,
    /// Sliding window for failure counting in milliseconds
    pub monitoring_window_ms: u64,
    /// Minimum requests in the window before the circuit may open
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            success_threshold: 3,
            monitoring_window_ms: 60_000,
            volume_threshold: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Get recovery timeout as Duration
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// Get monitoring window as Duration
    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }
}

/// Sliding-window rate limit for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Maximum queued requests once the window is exhausted
    pub queue_limit: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 60_000,
            queue_limit: 50,
        }
    }
}

impl RateLimitConfig {
    /// Get window length as Duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Per-service overrides; `None` blocks fall back to the defaults.
/// This is also the payload shape of the admin hot-update call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceResilienceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Resilience configuration: defaults plus per-service overrides,
/// keyed by dependency name ("llm-text-to-sql", "database", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub default_retry: RetryConfig,
    pub default_circuit_breaker: CircuitBreakerConfig,
    pub default_rate_limit: RateLimitConfig,
    #[serde(default)]
    pub services: HashMap<String, ServiceResilienceConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        let mut services = HashMap::new();
        // The LLM tolerates slow recovery; probe it gently.
        services.insert(
            "llm-text-to-sql".to_string(),
            ServiceResilienceConfig {
                retry: Some(RetryConfig {
                    max_attempts: 3,
                    timeout_ms: 60_000,
                    ..RetryConfig::default()
                }),
                circuit_breaker: Some(CircuitBreakerConfig {
                    recovery_timeout_ms: 60_000,
                    ..CircuitBreakerConfig::default()
                }),
                rate_limit: Some(RateLimitConfig {
                    max_requests: 10,
                    window_ms: 60_000,
                    queue_limit: 50,
                }),
            },
        );
        // The database fails fast and recovers fast.
        services.insert(
            "database".to_string(),
            ServiceResilienceConfig {
                retry: Some(RetryConfig {
                    max_attempts: 2,
                    base_delay_ms: 200,
                    timeout_ms: 10_000,
                    ..RetryConfig::default()
                }),
                circuit_breaker: Some(CircuitBreakerConfig {
                    failure_threshold: 8,
                    recovery_timeout_ms: 10_000,
                    volume_threshold: 20,
                    ..CircuitBreakerConfig::default()
                }),
                rate_limit: None,
            },
        );
        Self {
            default_retry: RetryConfig::default(),
            default_circuit_breaker: CircuitBreakerConfig::default(),
            default_rate_limit: RateLimitConfig::default(),
            services,
        }
    }
}

impl ResilienceConfig {
    /// Effective retry policy for a service.
    pub fn retry_for(&self, service: &str) -> RetryConfig {
        self.services
            .get(service)
            .and_then(|s| s.retry.clone())
            .unwrap_or_else(|| self.default_retry.clone())
    }

    /// Effective circuit breaker thresholds for a dependency.
    pub fn circuit_breaker_for(&self, service: &str) -> CircuitBreakerConfig {
        self.services
            .get(service)
            .and_then(|s| s.circuit_breaker.clone())
            .unwrap_or_else(|| self.default_circuit_breaker.clone())
    }

    /// Effective rate limit for a service. A service record that explicitly
    /// carries no rate limit block runs unlimited; unknown services get the
    /// default limit.
    pub fn rate_limit_for(&self, service: &str) -> Option<RateLimitConfig> {
        match self.services.get(service) {
            Some(entry) => entry.rate_limit.clone(),
            None => Some(self.default_rate_limit.clone()),
        }
    }

    /// Merge a partial update into the per-service record. Blocks present
    /// in the update replace the stored blocks; absent blocks are kept.
    pub fn apply_update(&mut self, service: &str, update: ServiceResilienceConfig) {
        let entry = self.services.entry(service.to_string()).or_default();
        if let Some(retry) = update.retry {
            entry.retry = Some(retry);
        }
        if let Some(breaker) = update.circuit_breaker {
            entry.circuit_breaker = Some(breaker);
        }
        if let Some(rate) = update.rate_limit {
            entry.rate_limit = Some(rate);
        }
    }
}

/// Cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default entry TTL in seconds when no pattern rule applies
    pub default_ttl_seconds: u64,
    /// LRU capacity per namespace
    pub max_entries_per_namespace: usize,
    /// Background sweep interval in seconds
    pub sweep_interval_seconds: u64,
    /// Reference-data (equipment/system id) refresh interval in seconds
    pub master_data_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            max_entries_per_namespace: 500,
            sweep_interval_seconds: 60,
            master_data_ttl_seconds: 900,
        }
    }
}

impl CacheConfig {
    /// Get default TTL as Duration
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Get sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Get reference-data refresh interval as Duration
    pub fn master_data_ttl(&self) -> Duration {
        Duration::from_secs(self.master_data_ttl_seconds)
    }
}

/// Pipeline tuning: confidence weighting, matching thresholds, and
/// execution caps. The weights and thresholds are empirical values kept
/// configurable rather than hardcoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Weight of entity-resolution confidence in the overall score
    pub entity_weight: f32,
    /// Weight of context-building confidence in the overall score
    pub context_weight: f32,
    /// Weight of validation confidence in the overall score
    pub validation_weight: f32,
    /// Normalized similarity threshold for fuzzy id matching
    pub fuzzy_match_threshold: f32,
    /// Intent-detection confidence at or above which the pattern path
    /// answers without the LLM
    pub pattern_route_threshold: f32,
    /// Hard cap on rows returned by any execution
    pub max_result_rows: u32,
    /// LIMIT appended to generated SQL that lacks one
    pub default_limit: u32,
    /// Few-shot examples included in the generation prompt
    pub few_shot_count: usize,
    /// When false, the pipeline stops after validation (no data fetch)
    pub execute_queries: bool,
    /// Maximum queries accepted by the batch endpoint
    pub max_batch_size: usize,
    /// Recent failures remembered per caller
    pub failure_memory_size: usize,
    /// Word-overlap similarity above which a failure counts as repeated
    pub repeat_failure_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            entity_weight: 0.4,
            context_weight: 0.3,
            validation_weight: 0.3,
            fuzzy_match_threshold: 0.7,
            pattern_route_threshold: 0.7,
            max_result_rows: 100,
            default_limit: 100,
            few_shot_count: 3,
            execute_queries: true,
            max_batch_size: 20,
            failure_memory_size: 20,
            repeat_failure_threshold: 0.7,
        }
    }
}

impl PipelineConfig {
    /// Confidence weights normalized to sum to 1.0. Guards against a
    /// misconfigured all-zero weighting.
    pub fn normalized_weights(&self) -> (f32, f32, f32) {
        let sum = self.entity_weight + self.context_weight + self.validation_weight;
        if sum <= f32::EPSILON {
            return (0.4, 0.3, 0.3);
        }
        (
            self.entity_weight / sum,
            self.context_weight / sum,
            self.validation_weight / sum,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_backoff_schedule() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_retry_backoff_caps_at_max_delay() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 3000,
            exponential_base: 2.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff_delay(10), Duration::from_millis(3000));
    }

    #[test]
    fn test_circuit_breaker_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.volume_threshold, 10);
        assert_eq!(config.recovery_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_resilience_service_overrides() {
        let config = ResilienceConfig::default();
        let llm_retry = config.retry_for("llm-text-to-sql");
        assert_eq!(llm_retry.timeout_ms, 60_000);
        // Unknown services fall back to the defaults.
        let other = config.retry_for("does-not-exist");
        assert_eq!(other.max_attempts, config.default_retry.max_attempts);
    }

    #[test]
    fn test_rate_limit_lookup() {
        let config = ResilienceConfig::default();
        // The database record deliberately carries no limit.
        assert!(config.rate_limit_for("database").is_none());
        assert!(config.rate_limit_for("llm-text-to-sql").is_some());
        assert!(config.rate_limit_for("does-not-exist").is_some());
    }

    #[test]
    fn test_resilience_partial_merge() {
        let mut config = ResilienceConfig::default();
        let before_breaker = config.circuit_breaker_for("llm-text-to-sql");
        config.apply_update(
            "llm-text-to-sql",
            ServiceResilienceConfig {
                retry: Some(RetryConfig {
                    max_attempts: 5,
                    ..RetryConfig::default()
                }),
                circuit_breaker: None,
                rate_limit: None,
            },
        );
        assert_eq!(config.retry_for("llm-text-to-sql").max_attempts, 5);
        // Untouched blocks survive the merge.
        assert_eq!(
            config.circuit_breaker_for("llm-text-to-sql").recovery_timeout_ms,
            before_breaker.recovery_timeout_ms
        );
    }

    #[test]
    fn test_pipeline_weight_normalization() {
        let config = PipelineConfig::default();
        let (e, c, v) = config.normalized_weights();
        assert!((e + c + v - 1.0).abs() < 1e-6);
        assert!((e - 0.4).abs() < 1e-6);

        let degenerate = PipelineConfig {
            entity_weight: 0.0,
            context_weight: 0.0,
            validation_weight: 0.0,
            ..PipelineConfig::default()
        };
        let (e, c, v) = degenerate.normalized_weights();
        assert!((e + c + v - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_serde_serialization() {
        let config = ResilienceConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ResilienceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            config.default_retry.max_attempts,
            deserialized.default_retry.max_attempts
        );
        assert!(deserialized.services.contains_key("llm-text-to-sql"));
    }
}
