//! # Query Frontend Service
//!
//! Natural-language query frontend for the CMMS maintenance database.
//! English and Japanese questions are answered either by a pattern-matched
//! structured plan or by the full text-to-SQL pipeline: entity resolution
//! against master data, intent detection, few-shot prompt assembly, model
//! generation with template and canned fallbacks, validation with rewriting,
//! and guarded execution against PostgreSQL. Calls to the model and the
//! database run behind per-dependency retry, circuit breaking, and
//! priority-aware rate limiting.

pub mod cache;
pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod examples_bank;
pub mod generator;
pub mod intent;
pub mod llm;
pub mod orchestrator;
pub mod processor;
pub mod resilience;
pub mod validator;

pub use cache::QueryCache;
pub use config::Config;
pub use entities::{EntityResolver, MasterDataCache};
pub use error::{AppError, Result};
pub use generator::SqlGenerator;
pub use intent::IntentDetector;
pub use llm::LLMClient;
pub use orchestrator::QueryOrchestrator;
pub use processor::QueryProcessor;
pub use resilience::{ResilienceManager, DATABASE_SERVICE, LLM_SERVICE};
pub use validator::SqlValidator;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_classes() {
        let error = AppError::BadRequest("no query".to_string());
        assert_eq!(error.error_code(), "BAD_REQUEST");
        assert!(error.is_client_error());
        assert!(!error.is_retryable());

        let error = AppError::CircuitOpen("llm-text-to-sql".to_string());
        assert_eq!(error.error_code(), "CIRCUIT_OPEN");
        assert!(error.is_retryable());
    }

    #[test]
    fn test_default_resilience_covers_both_dependencies() {
        let snapshot = ResilienceManager::default().snapshot();
        let names: Vec<&str> = snapshot
            .services
            .iter()
            .map(|s| s.service.as_str())
            .collect();
        assert!(names.contains(&LLM_SERVICE));
        assert!(names.contains(&DATABASE_SERVICE));
    }
}
