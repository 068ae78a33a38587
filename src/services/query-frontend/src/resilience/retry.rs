//! Retry executor with exponential backoff and jitter.
//!
//! The executor never returns a bare error to the caller: every run produces
//! a [`RetryOutcome`] describing what happened on each attempt, so the
//! pipeline can degrade instead of aborting. Delay before retry `n` is
//! `min(base * exponential_base^(n-1) + random(0..=jitter), max)`.

use crate::error::{AppError, Result};
use crate::resilience::circuit_breaker::CircuitBreaker;
use cmms_shared::RetryConfig;
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One attempt in the log of a retry run.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    /// Backoff slept before this attempt started.
    pub delay_before_ms: u64,
    pub duration_ms: u64,
    /// "success" or the error code that ended the attempt.
    pub outcome: String,
}

/// Result record of a full retry run.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Option<T>,
    pub error: Option<AppError>,
    pub attempts: u32,
    pub total_time_ms: u64,
    pub attempt_log: Vec<AttemptRecord>,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }

    /// Outcome for a request rejected before any attempt ran (rate limiting).
    pub fn rejected(error: AppError) -> Self {
        Self {
            result: None,
            error: Some(error),
            attempts: 0,
            total_time_ms: 0,
            attempt_log: Vec::new(),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self.result {
            Some(value) => Ok(value),
            None => Err(self.error.unwrap_or_else(|| {
                AppError::InternalServerError(
                    "retry run finished with neither result nor error".to_string(),
                )
            })),
        }
    }
}

pub struct RetryExecutor {
    config: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            breaker: None,
        }
    }

    pub fn with_breaker(config: RetryConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            config,
            breaker: Some(breaker),
        }
    }

    /// Run `operation` with retries. The closure receives the 1-based attempt
    /// number. Each attempt is bounded by the per-attempt timeout and checked
    /// against the circuit breaker first; an open circuit ends the run.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, operation: F) -> RetryOutcome<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt_log = Vec::new();
        let mut last_error: Option<AppError> = None;
        let mut attempts_made = 0;
        let mut delay_before_ms = 0u64;

        for attempt in 1..=max_attempts {
            if let Some(breaker) = &self.breaker {
                match breaker.try_acquire() {
                    Ok(_) => {}
                    Err(open) => {
                        warn!(
                            operation = operation_name,
                            attempt, "circuit open, ending retry run"
                        );
                        attempt_log.push(AttemptRecord {
                            attempt,
                            delay_before_ms,
                            duration_ms: 0,
                            outcome: open.error_code().to_string(),
                        });
                        last_error = Some(open);
                        break;
                    }
                }
            }

            attempts_made = attempt;
            let attempt_started = Instant::now();
            let result = match tokio::time::timeout(self.config.attempt_timeout(), operation(attempt))
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(AppError::TimeoutError(format!(
                    "{} attempt {} exceeded {}ms",
                    operation_name, attempt, self.config.timeout_ms
                ))),
            };
            let duration_ms = attempt_started.elapsed().as_millis() as u64;

            match result {
                Ok(value) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success(duration_ms);
                    }
                    attempt_log.push(AttemptRecord {
                        attempt,
                        delay_before_ms,
                        duration_ms,
                        outcome: "success".to_string(),
                    });
                    debug!(
                        operation = operation_name,
                        attempt, duration_ms, "operation succeeded"
                    );
                    return RetryOutcome {
                        result: Some(value),
                        error: None,
                        attempts: attempt,
                        total_time_ms: started.elapsed().as_millis() as u64,
                        attempt_log,
                    };
                }
                Err(error) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_failure(duration_ms);
                    }
                    attempt_log.push(AttemptRecord {
                        attempt,
                        delay_before_ms,
                        duration_ms,
                        outcome: error.error_code().to_string(),
                    });

                    let retryable = self.is_retryable(&error);
                    let exhausted = attempt >= max_attempts;
                    if exhausted || !retryable {
                        warn!(
                            operation = operation_name,
                            attempt,
                            retryable,
                            error = %error,
                            "operation failed, not retrying"
                        );
                        last_error = Some(error);
                        break;
                    }

                    let jitter = if self.config.jitter_ms > 0 {
                        rand::thread_rng().gen_range(0..=self.config.jitter_ms)
                    } else {
                        0
                    };
                    delay_before_ms = (self.config.backoff_delay(attempt).as_millis() as u64
                        + jitter)
                        .min(self.config.max_delay_ms);
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay_before_ms,
                        error = %error,
                        "operation failed, retrying"
                    );
                    last_error = Some(error);
                    tokio::time::sleep(Duration::from_millis(delay_before_ms)).await;
                }
            }
        }

        RetryOutcome {
            result: None,
            error: last_error,
            attempts: attempts_made,
            total_time_ms: started.elapsed().as_millis() as u64,
            attempt_log,
        }
    }

    /// Retryable means the error category allows it or the configured
    /// substring patterns match. Open circuits are never retried; the next
    /// probe window is what decides recovery.
    pub fn is_retryable(&self, error: &AppError) -> bool {
        if matches!(error, AppError::CircuitOpen(_)) {
            return false;
        }
        if error.is_retryable() {
            return true;
        }
        let message = error.to_string();
        self.config
            .retryable_errors
            .iter()
            .any(|pattern| message.contains(pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmms_shared::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_ms: 0,
            timeout_ms: 5_000,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::new(fast_config(3));
        let outcome = executor.execute("op", |_| async { Ok::<_, AppError>(7) }).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.attempt_log.len(), 1);
        assert_eq!(outcome.attempt_log[0].outcome, "success");
        assert_eq!(outcome.into_result().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = AtomicU32::new(0);
        let outcome = executor
            .execute("op", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AppError::NetworkError("connection reset".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.attempt_log.len(), 3);
        assert!(outcome.attempt_log[1].delay_before_ms >= 1);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let executor = RetryExecutor::new(fast_config(5));
        let calls = AtomicU32::new(0);
        let outcome = executor
            .execute("op", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AppError::ConfigurationError("no key".to_string())) }
            })
            .await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome.error,
            Some(AppError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let executor = RetryExecutor::new(fast_config(2));
        let outcome = executor
            .execute("op", |_| async {
                Err::<(), _>(AppError::ServiceUnavailable("503".to_string()))
            })
            .await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.attempt_log.len(), 2);
        assert!(outcome.into_result().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let config = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_ms: 0,
            timeout_ms: 50,
            ..RetryConfig::default()
        };
        let executor = RetryExecutor::new(config);
        let outcome = executor
            .execute("op", |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, AppError>(1)
            })
            .await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 2);
        assert!(matches!(outcome.error, Some(AppError::TimeoutError(_))));
    }

    #[tokio::test]
    async fn test_open_circuit_ends_run() {
        let breaker = Arc::new(CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig {
                failure_threshold: 1,
                volume_threshold: 1,
                recovery_timeout_ms: 60_000,
                ..CircuitBreakerConfig::default()
            },
        ));
        let executor = RetryExecutor::with_breaker(fast_config(5), breaker.clone());
        let calls = AtomicU32::new(0);
        let outcome = executor
            .execute("op", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AppError::NetworkError("down".to_string())) }
            })
            .await;
        // First failure opens the breaker; the second attempt is blocked.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.attempt_log.len(), 2);
        assert!(matches!(outcome.error, Some(AppError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn test_retryable_classification() {
        let executor = RetryExecutor::new(RetryConfig::default());
        assert!(executor.is_retryable(&AppError::NetworkError("down".to_string())));
        assert!(executor.is_retryable(&AppError::RateLimitExceeded("429".to_string())));
        // Pattern match on the message even when the category says no.
        assert!(executor.is_retryable(&AppError::InternalServerError(
            "socket ECONNRESET".to_string()
        )));
        assert!(!executor.is_retryable(&AppError::ConfigurationError("no key".to_string())));
        assert!(!executor.is_retryable(&AppError::CircuitOpen("llm".to_string())));
    }
}
