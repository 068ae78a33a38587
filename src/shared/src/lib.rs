//! Shared types and configuration for the CMMS query platform

pub mod config;
pub mod types;

pub use config::{
    CacheConfig, CircuitBreakerConfig, DatabaseConfig, PipelineConfig, RateLimitConfig,
    ResilienceConfig, RetryConfig, ServiceResilienceConfig,
};

pub use types::*;
