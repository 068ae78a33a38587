//! Resilience layer: retry, circuit breaking, and rate limiting for the
//! service's external dependencies.
//!
//! [`ResilienceManager`] is the single entry point. Callers hand it an async
//! operation plus a service name and get back a [`RetryOutcome`] that always
//! carries the full attempt history; the manager handles queueing, circuit
//! checks, retries, and timeouts behind that one call.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState, TransitionNotifier,
};
pub use rate_limiter::{RateLimitStatus, RateLimiter, QUEUE_MAX_WAIT_MS};
pub use retry::{AttemptRecord, RetryExecutor, RetryOutcome};

use crate::error::AppError;
use chrono::{DateTime, Utc};
use cmms_shared::{
    RequestPriority, ResilienceConfig, RetryConfig, ServiceResilienceConfig,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;

/// Dependency name for the text-to-SQL model provider.
pub const LLM_SERVICE: &str = "llm-text-to-sql";
/// Dependency name for the CMMS database.
pub const DATABASE_SERVICE: &str = "database";

/// Effective policy and live state for one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceResilienceStatus {
    pub service: String,
    pub retry: RetryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitStatus>,
}

/// Full resilience picture, served by `GET /v1/admin/resilience`.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceSnapshot {
    pub generated_at: DateTime<Utc>,
    pub services: Vec<ServiceResilienceStatus>,
}

pub struct ResilienceManager {
    config: RwLock<ResilienceConfig>,
    breakers: CircuitBreakerRegistry,
    limiter: RateLimiter,
}

impl ResilienceManager {
    pub fn new(config: ResilienceConfig) -> Self {
        let notifier: TransitionNotifier = Arc::new(|service, from, to| {
            warn!(service, from = %from, to = %to, "circuit breaker state change");
        });
        Self {
            config: RwLock::new(config),
            breakers: CircuitBreakerRegistry::with_notifier(notifier),
            limiter: RateLimiter::new(),
        }
    }

    /// Run `operation` against `service` under the service's full policy:
    /// rate-limit admission first, then retries with circuit checks.
    ///
    /// The returned outcome is a record, not an error: rate-limit rejections
    /// come back with zero attempts, every executed attempt is logged, and
    /// the final error (if any) rides along for the caller to shape.
    pub async fn execute<T, F, Fut>(
        &self,
        service: &str,
        priority: RequestPriority,
        operation_name: &str,
        operation: F,
    ) -> RetryOutcome<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let (retry_config, breaker_config, rate_limit) = {
            let config = self.config.read().unwrap();
            (
                config.retry_for(service),
                config.circuit_breaker_for(service),
                config.rate_limit_for(service),
            )
        };

        if let Some(limits) = rate_limit {
            let admitted = self
                .limiter
                .acquire(
                    service,
                    &limits,
                    priority,
                    Duration::from_millis(QUEUE_MAX_WAIT_MS),
                )
                .await;
            if let Err(err) = admitted {
                return RetryOutcome::rejected(err);
            }
        }

        let breaker = self.breakers.breaker(service, &breaker_config);
        RetryExecutor::with_breaker(retry_config, breaker)
            .execute(operation_name, operation)
            .await
    }

    /// Snapshot every known dependency: configured services plus any the
    /// breaker registry or limiter has seen.
    pub fn snapshot(&self) -> ResilienceSnapshot {
        let config = self.config.read().unwrap().clone();
        let mut names: BTreeSet<String> = config.services.keys().cloned().collect();
        for stats in self.breakers.stats() {
            names.insert(stats.service);
        }
        for status in self.limiter.status_all() {
            names.insert(status.service);
        }

        let services = names
            .into_iter()
            .map(|service| self.service_status(&config, &service))
            .collect();

        ResilienceSnapshot {
            generated_at: Utc::now(),
            services,
        }
    }

    /// Hot-apply a partial policy update for one service and return the new
    /// effective status. A new circuit breaker block resets that breaker's
    /// state; retry changes take effect on the next call.
    pub fn apply_update(
        &self,
        service: &str,
        update: ServiceResilienceConfig,
    ) -> ServiceResilienceStatus {
        let breaker_changed = update.circuit_breaker.is_some();
        let rate_changed = update.rate_limit.is_some();
        let config = {
            let mut config = self.config.write().unwrap();
            config.apply_update(service, update);
            config.clone()
        };
        if breaker_changed {
            self.breakers
                .replace(service, &config.circuit_breaker_for(service));
        }
        if rate_changed {
            if let Some(limits) = config.rate_limit_for(service) {
                self.limiter.update_config(service, limits);
            }
        }
        self.service_status(&config, service)
    }

    /// Wake queued requests whose window slot or deadline arrived. Driven by
    /// the 1s background tick in main.
    pub fn drain_queues(&self) {
        self.limiter.drain();
    }

    fn service_status(
        &self,
        config: &ResilienceConfig,
        service: &str,
    ) -> ServiceResilienceStatus {
        let circuit_breaker = self.breakers.get(service).map(|b| b.stats());
        // Show the configured limit even before the first request hits it.
        let rate_limit = self.limiter.status(service).or_else(|| {
            config.rate_limit_for(service).map(|limits| RateLimitStatus {
                service: service.to_string(),
                active_requests: 0,
                max_requests: limits.max_requests,
                window_ms: limits.window_ms,
                queue_depth: 0,
                queue_limit: limits.queue_limit,
                total_admitted: 0,
                total_queue_full: 0,
                total_timed_out: 0,
                estimated_wait_ms: 0,
            })
        });
        ServiceResilienceStatus {
            service: service.to_string(),
            retry: config.retry_for(service),
            circuit_breaker,
            rate_limit,
        }
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmms_shared::RateLimitConfig;

    #[tokio::test]
    async fn test_execute_success_records_one_attempt() {
        let manager = ResilienceManager::default();
        let outcome = manager
            .execute(DATABASE_SERVICE, RequestPriority::Medium, "fetch", |_| async {
                Ok::<i32, AppError>(42)
            })
            .await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.result, Some(42));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_execute_rate_limit_rejection_has_no_attempts() {
        let mut config = ResilienceConfig::default();
        config.apply_update(
            "probe",
            ServiceResilienceConfig {
                rate_limit: Some(RateLimitConfig {
                    max_requests: 1,
                    window_ms: 60_000,
                    queue_limit: 0,
                }),
                ..ServiceResilienceConfig::default()
            },
        );
        let manager = ResilienceManager::new(config);

        let first = manager
            .execute("probe", RequestPriority::Medium, "op", |_| async {
                Ok::<(), AppError>(())
            })
            .await;
        assert!(first.succeeded());

        // Window full and nothing may queue.
        let second = manager
            .execute("probe", RequestPriority::Medium, "op", |_| async {
                Ok::<(), AppError>(())
            })
            .await;
        assert!(!second.succeeded());
        assert_eq!(second.attempts, 0);
        assert!(matches!(second.error, Some(AppError::QueueFull(_))));
    }

    #[tokio::test]
    async fn test_snapshot_covers_configured_services() {
        let manager = ResilienceManager::default();
        manager
            .execute(DATABASE_SERVICE, RequestPriority::Medium, "fetch", |_| async {
                Ok::<(), AppError>(())
            })
            .await;

        let snapshot = manager.snapshot();
        let names: Vec<&str> = snapshot.services.iter().map(|s| s.service.as_str()).collect();
        assert!(names.contains(&LLM_SERVICE));
        assert!(names.contains(&DATABASE_SERVICE));

        let database = snapshot
            .services
            .iter()
            .find(|s| s.service == DATABASE_SERVICE)
            .unwrap();
        // The database ran through its breaker but carries no rate limit.
        assert!(database.circuit_breaker.is_some());
        assert!(database.rate_limit.is_none());

        let llm = snapshot
            .services
            .iter()
            .find(|s| s.service == LLM_SERVICE)
            .unwrap();
        assert!(llm.rate_limit.is_some());
    }

    #[tokio::test]
    async fn test_apply_update_resets_breaker_state() {
        let manager = ResilienceManager::default();
        let failing = manager
            .execute(DATABASE_SERVICE, RequestPriority::Medium, "fetch", |_| async {
                Err::<(), _>(AppError::ValidationError("bad input".to_string()))
            })
            .await;
        assert!(!failing.succeeded());

        let before = manager.snapshot();
        let breaker = before
            .services
            .iter()
            .find(|s| s.service == DATABASE_SERVICE)
            .and_then(|s| s.circuit_breaker.as_ref())
            .unwrap();
        assert_eq!(breaker.total_calls, 1);

        let status = manager.apply_update(
            DATABASE_SERVICE,
            ServiceResilienceConfig {
                circuit_breaker: Some(Default::default()),
                ..ServiceResilienceConfig::default()
            },
        );
        let fresh = status.circuit_breaker.unwrap();
        assert_eq!(fresh.total_calls, 0);
    }

    #[tokio::test]
    async fn test_apply_update_changes_retry_policy() {
        let manager = ResilienceManager::default();
        let status = manager.apply_update(
            LLM_SERVICE,
            ServiceResilienceConfig {
                retry: Some(RetryConfig {
                    max_attempts: 7,
                    ..RetryConfig::default()
                }),
                ..ServiceResilienceConfig::default()
            },
        );
        assert_eq!(status.retry.max_attempts, 7);
        assert_eq!(
            manager
                .snapshot()
                .services
                .iter()
                .find(|s| s.service == LLM_SERVICE)
                .unwrap()
                .retry
                .max_attempts,
            7
        );
    }
}
