//! Sliding-window rate limiter with a priority queue.
//!
//! Each service gets a window of admission timestamps. When the window is
//! full, callers wait in a queue ordered high > medium > low with FIFO order
//! inside a tier. A periodic [`RateLimiter::drain`] pass (driven by a 1s
//! background tick) expires timed-out waiters and admits whoever fits as the
//! window slides.

use crate::error::AppError;
use cmms_shared::{RateLimitConfig, RequestPriority};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// Longest a request may sit in the queue before it is rejected.
pub const QUEUE_MAX_WAIT_MS: u64 = 30_000;

struct QueuedRequest {
    priority: RequestPriority,
    enqueued_at: Instant,
    deadline: Instant,
    responder: oneshot::Sender<Result<(), AppError>>,
}

struct ServiceWindow {
    config: RateLimitConfig,
    admitted: VecDeque<Instant>,
    queue: VecDeque<QueuedRequest>,
    total_admitted: u64,
    total_queue_full: u64,
    total_timed_out: u64,
}

impl ServiceWindow {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            admitted: VecDeque::new(),
            queue: VecDeque::new(),
            total_admitted: 0,
            total_queue_full: 0,
            total_timed_out: 0,
        }
    }

    fn purge(&mut self, now: Instant) {
        let window = self.config.window();
        while let Some(at) = self.admitted.front() {
            if now.duration_since(*at) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_capacity(&self) -> bool {
        (self.admitted.len() as u32) < self.config.max_requests
    }

    /// Rough wait estimate for a request at `queue_position`: time for the
    /// oldest admission to leave the window, plus one window per full batch
    /// of queued requests ahead.
    fn estimated_wait_ms(&self, now: Instant, queue_position: usize) -> u64 {
        let head_wait = self
            .admitted
            .front()
            .map(|at| {
                self.config
                    .window()
                    .saturating_sub(now.duration_since(*at))
                    .as_millis() as u64
            })
            .unwrap_or(0);
        let batches = queue_position as u64 / self.config.max_requests.max(1) as u64;
        head_wait + batches * self.config.window_ms
    }
}

/// Snapshot of one service's limiter, served by the admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub service: String,
    pub active_requests: u32,
    pub max_requests: u32,
    pub window_ms: u64,
    pub queue_depth: usize,
    pub queue_limit: usize,
    pub total_admitted: u64,
    pub total_queue_full: u64,
    pub total_timed_out: u64,
    /// What a new arrival would wait right now.
    pub estimated_wait_ms: u64,
}

pub struct RateLimiter {
    services: Mutex<HashMap<String, ServiceWindow>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a request for `service` or wait for a queue slot.
    ///
    /// Returns immediately when the window has room. Otherwise the caller is
    /// queued by priority and parked until a drain pass admits it, the queue
    /// rejects it as full, or its wait deadline passes.
    pub async fn acquire(
        &self,
        service: &str,
        config: &RateLimitConfig,
        priority: RequestPriority,
        max_wait: Duration,
    ) -> Result<(), AppError> {
        let receiver = {
            let mut services = self.services.lock().unwrap();
            let window = services
                .entry(service.to_string())
                .or_insert_with(|| ServiceWindow::new(config.clone()));
            window.config = config.clone();

            let now = Instant::now();
            window.purge(now);

            if window.has_capacity() {
                window.admitted.push_back(now);
                window.total_admitted += 1;
                return Ok(());
            }

            if window.queue.len() >= window.config.queue_limit {
                window.total_queue_full += 1;
                let wait = window.estimated_wait_ms(now, window.queue.len());
                return Err(AppError::QueueFull(format!(
                    "{}: {} requests already waiting, estimated wait {}ms",
                    service,
                    window.queue.len(),
                    wait
                )));
            }

            let (sender, receiver) = oneshot::channel();
            let request = QueuedRequest {
                priority,
                enqueued_at: now,
                deadline: now + max_wait,
                responder: sender,
            };
            // Behind every equal-or-higher priority, ahead of lower ones.
            let insert_at = window
                .queue
                .iter()
                .position(|queued| queued.priority.rank() < priority.rank())
                .unwrap_or(window.queue.len());
            window.queue.insert(insert_at, request);
            debug!(
                service,
                position = insert_at,
                depth = window.queue.len(),
                "request queued by rate limiter"
            );
            receiver
        };

        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::InternalServerError(
                "rate limiter dropped a queued request".to_string(),
            )),
        }
    }

    /// Expire overdue waiters and admit queued requests into freed slots.
    pub fn drain(&self) {
        let mut completions: Vec<(oneshot::Sender<Result<(), AppError>>, Result<(), AppError>)> =
            Vec::new();
        {
            let mut services = self.services.lock().unwrap();
            let now = Instant::now();
            for (service, window) in services.iter_mut() {
                window.purge(now);

                let mut index = 0;
                while index < window.queue.len() {
                    if window.queue[index].deadline <= now {
                        if let Some(expired) = window.queue.remove(index) {
                            window.total_timed_out += 1;
                            let waited = now.duration_since(expired.enqueued_at).as_millis();
                            completions.push((
                                expired.responder,
                                Err(AppError::QueueTimeout(format!(
                                    "{}: gave up after {}ms in queue",
                                    service, waited
                                ))),
                            ));
                        }
                    } else {
                        index += 1;
                    }
                }

                while window.has_capacity() {
                    match window.queue.pop_front() {
                        Some(request) => {
                            window.admitted.push_back(now);
                            window.total_admitted += 1;
                            completions.push((request.responder, Ok(())));
                        }
                        None => break,
                    }
                }
            }
        }
        // Wake waiters outside the lock; a waiter may have gone away.
        for (responder, outcome) in completions {
            let _ = responder.send(outcome);
        }
    }

    pub fn status(&self, service: &str) -> Option<RateLimitStatus> {
        let mut services = self.services.lock().unwrap();
        let window = services.get_mut(service)?;
        let now = Instant::now();
        window.purge(now);
        Some(build_status(service, window, now))
    }

    pub fn status_all(&self) -> Vec<RateLimitStatus> {
        let mut services = self.services.lock().unwrap();
        let now = Instant::now();
        let mut all: Vec<RateLimitStatus> = services
            .iter_mut()
            .map(|(service, window)| {
                window.purge(now);
                build_status(service, window, now)
            })
            .collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }

    /// Apply new limits to a service. Queued requests keep waiting and are
    /// re-evaluated against the new window on the next drain.
    pub fn update_config(&self, service: &str, config: RateLimitConfig) {
        let mut services = self.services.lock().unwrap();
        services
            .entry(service.to_string())
            .and_modify(|window| window.config = config.clone())
            .or_insert_with(|| ServiceWindow::new(config));
    }

    #[cfg(test)]
    fn queued_priorities(&self, service: &str) -> Vec<RequestPriority> {
        let services = self.services.lock().unwrap();
        services
            .get(service)
            .map(|w| w.queue.iter().map(|q| q.priority).collect())
            .unwrap_or_default()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn build_status(service: &str, window: &ServiceWindow, now: Instant) -> RateLimitStatus {
    let estimated_wait_ms = if window.has_capacity() {
        0
    } else {
        window.estimated_wait_ms(now, window.queue.len())
    };
    RateLimitStatus {
        service: service.to_string(),
        active_requests: window.admitted.len() as u32,
        max_requests: window.config.max_requests,
        window_ms: window.config.window_ms,
        queue_depth: window.queue.len(),
        queue_limit: window.config.queue_limit,
        total_admitted: window.total_admitted,
        total_queue_full: window.total_queue_full,
        total_timed_out: window.total_timed_out,
        estimated_wait_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(max_requests: u32, window_ms: u64, queue_limit: usize) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            window_ms,
            queue_limit,
        }
    }

    #[tokio::test]
    async fn test_admits_under_limit() {
        let limiter = RateLimiter::new();
        let cfg = config(3, 60_000, 5);
        for _ in 0..3 {
            limiter
                .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(1))
                .await
                .unwrap();
        }
        let status = limiter.status("llm").unwrap();
        assert_eq!(status.active_requests, 3);
        assert_eq!(status.queue_depth, 0);
    }

    #[tokio::test]
    async fn test_queue_full_rejection() {
        let limiter = Arc::new(RateLimiter::new());
        let cfg = config(1, 60_000, 1);
        limiter
            .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
            .await
            .unwrap();

        // Occupies the single queue slot.
        let queued = {
            let limiter = limiter.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move {
                limiter
                    .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rejected = limiter
            .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
            .await;
        assert!(matches!(rejected, Err(AppError::QueueFull(_))));

        let status = limiter.status("llm").unwrap();
        assert_eq!(status.queue_depth, 1);
        assert_eq!(status.total_queue_full, 1);
        queued.abort();
    }

    #[tokio::test]
    async fn test_priority_ordering_in_queue() {
        let limiter = Arc::new(RateLimiter::new());
        let cfg = config(1, 60_000, 10);
        limiter
            .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for priority in [
            RequestPriority::Low,
            RequestPriority::Medium,
            RequestPriority::High,
            RequestPriority::Medium,
        ] {
            let limiter = limiter.clone();
            let cfg = cfg.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .acquire("llm", &cfg, priority, Duration::from_secs(5))
                    .await
            }));
            // Let each task reach the queue before spawning the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(
            limiter.queued_priorities("llm"),
            vec![
                RequestPriority::High,
                RequestPriority::Medium,
                RequestPriority::Medium,
                RequestPriority::Low,
            ]
        );
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_drain_admits_when_window_slides() {
        let limiter = Arc::new(RateLimiter::new());
        let cfg = config(1, 30, 5);
        limiter
            .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
            .await
            .unwrap();

        let queued = {
            let limiter = limiter.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move {
                limiter
                    .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;

        limiter.drain();
        let outcome = queued.await.unwrap();
        assert!(outcome.is_ok());
        assert_eq!(limiter.status("llm").unwrap().total_admitted, 2);
    }

    #[tokio::test]
    async fn test_queued_request_times_out() {
        let limiter = Arc::new(RateLimiter::new());
        let cfg = config(1, 60_000, 5);
        limiter
            .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
            .await
            .unwrap();

        let queued = {
            let limiter = limiter.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move {
                limiter
                    .acquire("llm", &cfg, RequestPriority::Low, Duration::ZERO)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        limiter.drain();
        let outcome = queued.await.unwrap();
        assert!(matches!(outcome, Err(AppError::QueueTimeout(_))));
        assert_eq!(limiter.status("llm").unwrap().total_timed_out, 1);
    }

    #[tokio::test]
    async fn test_fifo_within_tier() {
        let limiter = Arc::new(RateLimiter::new());
        let cfg = config(1, 30, 5);
        limiter
            .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
            .await
            .unwrap();

        let first = {
            let limiter = limiter.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move {
                limiter
                    .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let limiter = limiter.clone();
            let cfg = cfg.clone();
            tokio::spawn(async move {
                limiter
                    .acquire("llm", &cfg, RequestPriority::Medium, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // One slot frees up: the earlier arrival wins.
        limiter.drain();
        let outcome = first.await.unwrap();
        assert!(outcome.is_ok());
        assert!(!second.is_finished());
        second.abort();
    }
}
