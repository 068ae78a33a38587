//! Per-dependency circuit breakers.
//!
//! A breaker opens only when the monitoring window has seen enough traffic
//! (`volume_threshold`) AND enough of it failed (`failure_threshold`). After
//! `recovery_timeout_ms` the circuit moves to half-open and admits probe
//! requests; `success_threshold` consecutive probe successes close it again,
//! while any probe failure reopens it immediately.

use crate::error::AppError;
use cmms_shared::CircuitBreakerConfig;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Number of recent calls kept for latency statistics.
const LATENCY_SAMPLE_SIZE: usize = 100;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing, requests are blocked
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Called on every state transition with (service, from, to).
pub type TransitionNotifier = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

struct CallSample {
    at: Instant,
    success: bool,
}

struct CircuitInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    calls: VecDeque<CallSample>,
    latencies_ms: VecDeque<u64>,
    consecutive_failures: u32,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    state_changes: u64,
    last_transition: Instant,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            half_open_successes: 0,
            calls: VecDeque::new(),
            latencies_ms: VecDeque::new(),
            consecutive_failures: 0,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            state_changes: 0,
            last_transition: Instant::now(),
        }
    }

    fn purge(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        let window = config.monitoring_window();
        while let Some(sample) = self.calls.front() {
            if now.duration_since(sample.at) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_failures(&self) -> u32 {
        self.calls.iter().filter(|c| !c.success).count() as u32
    }

    fn record(&mut self, now: Instant, success: bool, latency_ms: u64) {
        self.calls.push_back(CallSample { at: now, success });
        self.latencies_ms.push_back(latency_ms);
        while self.latencies_ms.len() > LATENCY_SAMPLE_SIZE {
            self.latencies_ms.pop_front();
        }
        self.total_calls += 1;
        if success {
            self.total_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.total_failures += 1;
            self.consecutive_failures += 1;
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) -> (CircuitState, CircuitState) {
        let from = self.state;
        self.state = to;
        self.state_changes += 1;
        self.last_transition = now;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.half_open_successes = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes = 0;
            }
            CircuitState::Closed => {
                self.opened_at = None;
                self.half_open_successes = 0;
                self.consecutive_failures = 0;
                self.calls.clear();
            }
        }
        (from, to)
    }
}

/// Point-in-time view of one breaker, served by the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub service: String,
    pub state: CircuitState,
    pub window_calls: u32,
    pub window_failures: u32,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub state_changes: u64,
    pub seconds_in_state: u64,
    /// Mean latency over the last 100 recorded calls.
    pub average_latency_ms: f64,
    /// Slowest of the last 100 recorded calls.
    pub max_latency_ms: u64,
    /// Time until the next half-open probe, when open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_remaining_ms: Option<u64>,
}

pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
    notifier: Option<TransitionNotifier>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(CircuitInner::new()),
            notifier: None,
        }
    }

    pub fn with_notifier(
        service: impl Into<String>,
        config: CircuitBreakerConfig,
        notifier: TransitionNotifier,
    ) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(CircuitInner::new()),
            notifier: Some(notifier),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission to make a call. Open circuits reject until the recovery
    /// timeout elapses, at which point the breaker flips to half-open and
    /// admits the request as a probe.
    pub fn try_acquire(&self) -> Result<CircuitState, AppError> {
        let transition;
        let outcome;
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            match inner.state {
                CircuitState::Closed => return Ok(CircuitState::Closed),
                CircuitState::HalfOpen => return Ok(CircuitState::HalfOpen),
                CircuitState::Open => {
                    let opened_at = inner.opened_at.unwrap_or(now);
                    if now.duration_since(opened_at) >= self.config.recovery_timeout() {
                        transition = Some(inner.transition(CircuitState::HalfOpen, now));
                        outcome = Ok(CircuitState::HalfOpen);
                    } else {
                        let remaining = self
                            .config
                            .recovery_timeout()
                            .saturating_sub(now.duration_since(opened_at));
                        return Err(AppError::CircuitOpen(format!(
                            "{} unavailable, next probe in {}ms",
                            self.service,
                            remaining.as_millis()
                        )));
                    }
                }
            }
        }
        self.notify(transition);
        outcome
    }

    /// Record a successful call.
    pub fn record_success(&self, latency_ms: u64) {
        let transition;
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            inner.purge(&self.config, now);
            inner.record(now, true, latency_ms);
            transition = match inner.state {
                CircuitState::HalfOpen => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.success_threshold {
                        Some(inner.transition(CircuitState::Closed, now))
                    } else {
                        None
                    }
                }
                _ => None,
            };
        }
        self.notify(transition);
    }

    /// Record a failed call. In half-open any failure reopens the circuit; in
    /// closed the window thresholds decide.
    pub fn record_failure(&self, latency_ms: u64) {
        let transition;
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            inner.purge(&self.config, now);
            inner.record(now, false, latency_ms);
            transition = match inner.state {
                CircuitState::HalfOpen => Some(inner.transition(CircuitState::Open, now)),
                CircuitState::Closed => {
                    let window_calls = inner.calls.len() as u32;
                    let window_failures = inner.window_failures();
                    if window_calls >= self.config.volume_threshold
                        && window_failures >= self.config.failure_threshold
                    {
                        Some(inner.transition(CircuitState::Open, now))
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            };
        }
        self.notify(transition);
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Force the circuit back to closed, dropping window history.
    pub fn reset(&self) {
        let transition;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == CircuitState::Closed {
                return;
            }
            transition = Some(inner.transition(CircuitState::Closed, Instant::now()));
        }
        self.notify(transition);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.purge(&self.config, now);

        let (average_latency_ms, max_latency_ms) = if inner.latencies_ms.is_empty() {
            (0.0, 0)
        } else {
            let sum: u64 = inner.latencies_ms.iter().sum();
            let max = inner.latencies_ms.iter().copied().max().unwrap_or(0);
            (sum as f64 / inner.latencies_ms.len() as f64, max)
        };

        let open_remaining_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config
                    .recovery_timeout()
                    .saturating_sub(now.duration_since(opened_at))
                    .as_millis() as u64,
            ),
            _ => None,
        };

        CircuitBreakerStats {
            service: self.service.clone(),
            state: inner.state,
            window_calls: inner.calls.len() as u32,
            window_failures: inner.window_failures(),
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            state_changes: inner.state_changes,
            seconds_in_state: now.duration_since(inner.last_transition).as_secs(),
            average_latency_ms,
            max_latency_ms,
            open_remaining_ms,
        }
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let (Some((from, to)), Some(notifier)) = (transition, &self.notifier) {
            notifier(&self.service, from, to);
        }
    }
}

/// Lazily-populated map of breakers, one per dependency.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    notifier: Option<TransitionNotifier>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            notifier: None,
        }
    }

    pub fn with_notifier(notifier: TransitionNotifier) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            notifier: Some(notifier),
        }
    }

    /// Get the breaker for a service, creating it with `config` on first use.
    pub fn breaker(&self, service: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(self.build(service, config.clone())))
            .clone()
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().unwrap().get(service).cloned()
    }

    /// Swap in a breaker with new thresholds. State and history reset.
    pub fn replace(&self, service: &str, config: &CircuitBreakerConfig) {
        let mut breakers = self.breakers.lock().unwrap();
        breakers.insert(
            service.to_string(),
            Arc::new(self.build(service, config.clone())),
        );
    }

    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers = self.breakers.lock().unwrap();
        let mut all: Vec<CircuitBreakerStats> = breakers.values().map(|b| b.stats()).collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }

    fn build(&self, service: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        match &self.notifier {
            Some(notifier) => CircuitBreaker::with_notifier(service, config, notifier.clone()),
            None => CircuitBreaker::new(service, config),
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 60_000,
            success_threshold: 2,
            monitoring_window_ms: 60_000,
            volume_threshold: 5,
        }
    }

    #[test]
    fn test_stays_closed_below_volume_threshold() {
        let breaker = CircuitBreaker::new("llm", test_config());
        // Four failures exceed the failure threshold but not the volume one.
        for _ in 0..4 {
            breaker.record_failure(10);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_opens_when_both_thresholds_met() {
        let breaker = CircuitBreaker::new("llm", test_config());
        breaker.record_success(5);
        breaker.record_success(5);
        breaker.record_failure(10);
        breaker.record_failure(10);
        assert_eq!(breaker.state(), CircuitState::Closed);
        // Fifth call in the window, third failure: both thresholds met.
        breaker.record_failure(10);
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.try_acquire().unwrap_err();
        assert!(matches!(err, AppError::CircuitOpen(_)));
    }

    #[test]
    fn test_half_open_probe_and_close() {
        let config = CircuitBreakerConfig {
            recovery_timeout_ms: 0,
            ..test_config()
        };
        let breaker = CircuitBreaker::new("llm", config);
        for _ in 0..5 {
            breaker.record_failure(10);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Zero recovery timeout: the next acquire flips to half-open.
        assert_eq!(breaker.try_acquire().unwrap(), CircuitState::HalfOpen);
        breaker.record_success(5);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success(5);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let config = CircuitBreakerConfig {
            recovery_timeout_ms: 0,
            ..test_config()
        };
        let breaker = CircuitBreaker::new("llm", config);
        for _ in 0..5 {
            breaker.record_failure(10);
        }
        assert_eq!(breaker.try_acquire().unwrap(), CircuitState::HalfOpen);
        breaker.record_failure(10);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_transition_notifications() {
        let seen: Arc<Mutex<Vec<(CircuitState, CircuitState)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let breaker = CircuitBreaker::with_notifier(
            "llm",
            test_config(),
            Arc::new(move |_service, from, to| {
                sink.lock().unwrap().push((from, to));
            }),
        );
        for _ in 0..5 {
            breaker.record_failure(10);
        }
        let transitions = seen.lock().unwrap();
        assert_eq!(
            transitions.as_slice(),
            &[(CircuitState::Closed, CircuitState::Open)]
        );
    }

    #[test]
    fn test_latency_stats() {
        let breaker = CircuitBreaker::new("llm", test_config());
        breaker.record_success(10);
        breaker.record_success(20);
        breaker.record_failure(30);
        let stats = breaker.stats();
        assert_eq!(stats.window_calls, 3);
        assert_eq!(stats.window_failures, 1);
        assert!((stats.average_latency_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(stats.max_latency_ms, 30);
        assert_eq!(stats.total_calls, 3);
    }

    #[test]
    fn test_registry_reuses_and_replaces() {
        let registry = CircuitBreakerRegistry::new();
        let config = test_config();
        let first = registry.breaker("llm", &config);
        first.record_failure(10);
        let again = registry.breaker("llm", &config);
        assert_eq!(again.stats().total_calls, 1);

        registry.replace("llm", &config);
        let fresh = registry.get("llm").unwrap();
        assert_eq!(fresh.stats().total_calls, 0);
    }
}
