use crate::error::{AppError, Result};

use cmms_shared::{CacheConfig, DatabaseConfig, PipelineConfig, ResilienceConfig};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub llm: LLMConfig,
    pub database: DatabaseConfig,
    pub resilience: ResilienceConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: String,
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub fallback_provider: Option<String>,
    pub fallback_model: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // Load environment-specific defaults
        let (default_host, default_port, default_log_level) = match environment.as_str() {
            "production" => ("0.0.0.0", 8090, "info"),
            "staging" => ("0.0.0.0", 8090, "debug"),
            _ => ("127.0.0.1", 8090, "debug"),
        };

        Ok(Config {
            host: env::var("QUERY_FRONTEND_HOST").unwrap_or_else(|_| default_host.to_string()),
            port: env::var("QUERY_FRONTEND_PORT")
                .unwrap_or_else(|_| default_port.to_string())
                .parse()
                .map_err(|e| AppError::ConfigurationError(format!("Invalid port: {}", e)))?,
            environment,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level.to_string()),
            llm: LLMConfig::from_env()?,
            database: database_config_from_env()?,
            resilience: resilience_config_from_env()?,
            cache: cache_config_from_env()?,
            pipeline: pipeline_config_from_env()?,
            request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid request_timeout_seconds: {}", e))
                })?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn validate(&self) -> Result<()> {
        // Validate host
        if self.host.is_empty() {
            return Err(AppError::ConfigurationError(
                "Host cannot be empty".to_string(),
            ));
        }

        // Validate port
        if self.port == 0 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid port: {}",
                self.port
            )));
        }

        // Validate LLM configuration
        self.llm.validate()?;

        // Validate database configuration
        if self.database.url.is_empty() {
            return Err(AppError::ConfigurationError(
                "Database URL cannot be empty".to_string(),
            ));
        }
        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(AppError::ConfigurationError(
                "Database URL must be a PostgreSQL connection string".to_string(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigurationError(
                "min_connections cannot be greater than max_connections".to_string(),
            ));
        }

        // Validate pipeline constraints
        let p = &self.pipeline;
        for (name, value) in [
            ("entity_weight", p.entity_weight),
            ("context_weight", p.context_weight),
            ("validation_weight", p.validation_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::ConfigurationError(format!(
                    "Invalid {}: {} (must be 0.0-1.0)",
                    name, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&p.fuzzy_match_threshold) {
            return Err(AppError::ConfigurationError(format!(
                "Invalid fuzzy_match_threshold: {} (must be 0.0-1.0)",
                p.fuzzy_match_threshold
            )));
        }
        if p.max_result_rows == 0 {
            return Err(AppError::ConfigurationError(
                "max_result_rows must be at least 1".to_string(),
            ));
        }
        if p.max_batch_size == 0 || p.max_batch_size > 100 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid max_batch_size: {} (must be 1-100)",
                p.max_batch_size
            )));
        }

        Ok(())
    }
}

impl LLMConfig {
    pub fn from_env() -> Result<Self> {
        let provider = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());

        let (default_api_url, default_model) = match provider.as_str() {
            "openai" => (
                "https://api.openai.com/v1/chat/completions",
                "gpt-4-1106-preview",
            ),
            "anthropic" => (
                "https://api.anthropic.com/v1/messages",
                "claude-3-5-sonnet-20241022",
            ),
            "ollama" => ("http://localhost:11434/api/chat", "llama2"),
            "azure" => ("", "gpt-4"), // URL will be set from AZURE_OPENAI_ENDPOINT
            "gemini" => (
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent",
                "gemini-2.0-flash",
            ),
            _ => {
                return Err(AppError::ConfigurationError(format!(
                    "Unsupported LLM provider: {}",
                    provider
                )))
            }
        };

        // A missing key is not a startup failure: SQL generation degrades to
        // template and fallback tiers, and the error surfaces per request.
        let api_key = env::var("LLM_API_KEY").unwrap_or_default();

        let api_url = if provider == "azure" {
            let endpoint = env::var("AZURE_OPENAI_ENDPOINT").map_err(|_| {
                AppError::ConfigurationError(
                    "AZURE_OPENAI_ENDPOINT is required for Azure provider".to_string(),
                )
            })?;
            let deployment = env::var("AZURE_OPENAI_DEPLOYMENT").map_err(|_| {
                AppError::ConfigurationError(
                    "AZURE_OPENAI_DEPLOYMENT is required for Azure provider".to_string(),
                )
            })?;
            let api_version =
                env::var("AZURE_OPENAI_API_VERSION").unwrap_or_else(|_| "2024-02-01".to_string());
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint, deployment, api_version
            )
        } else {
            env::var("LLM_API_URL").unwrap_or_else(|_| default_api_url.to_string())
        };

        Ok(LLMConfig {
            provider,
            api_key,
            api_url,
            model: env::var("LLM_MODEL").unwrap_or_else(|_| default_model.to_string()),
            max_tokens: env::var("LLM_MAX_TOKENS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid LLM_MAX_TOKENS: {}", e))
                })?,
            temperature: env::var("LLM_TEMPERATURE")
                .unwrap_or_else(|_| "0.1".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid LLM_TEMPERATURE: {}", e))
                })?,
            timeout_seconds: env::var("LLM_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|e| {
                    AppError::ConfigurationError(format!("Invalid LLM_TIMEOUT_SECONDS: {}", e))
                })?,
            fallback_provider: env::var("LLM_FALLBACK_PROVIDER").ok(),
            fallback_model: env::var("LLM_FALLBACK_MODEL").ok(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.is_empty() {
            return Err(AppError::ConfigurationError(
                "LLM API URL cannot be empty".to_string(),
            ));
        }

        if self.model.is_empty() {
            return Err(AppError::ConfigurationError(
                "LLM model cannot be empty".to_string(),
            ));
        }

        if self.max_tokens == 0 || self.max_tokens > 128000 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid max_tokens: {} (must be 1-128000)",
                self.max_tokens
            )));
        }

        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(AppError::ConfigurationError(format!(
                "Invalid temperature: {} (must be 0.0-2.0)",
                self.temperature
            )));
        }

        if !["openai", "anthropic", "ollama", "azure", "gemini"].contains(&self.provider.as_str()) {
            return Err(AppError::ConfigurationError(format!(
                "Unsupported provider: {}",
                self.provider
            )));
        }

        Ok(())
    }

    /// Local providers run without credentials; everything else needs a key.
    pub fn has_credentials(&self) -> bool {
        self.provider == "ollama" || !self.api_key.is_empty()
    }

    pub fn get_fallback_config(&self) -> Option<LLMConfig> {
        if let (Some(fallback_provider), Some(fallback_model)) =
            (&self.fallback_provider, &self.fallback_model)
        {
            let fallback_url = match fallback_provider.as_str() {
                "openai" => "https://api.openai.com/v1/chat/completions",
                "anthropic" => "https://api.anthropic.com/v1/messages",
                "ollama" => "http://localhost:11434/api/chat",
                "gemini" => "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent",
                _ => return None,
            };

            Some(LLMConfig {
                provider: fallback_provider.clone(),
                api_key: self.api_key.clone(), // Assume same API key
                api_url: fallback_url.to_string(),
                model: fallback_model.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                timeout_seconds: self.timeout_seconds,
                fallback_provider: None,
                fallback_model: None,
            })
        } else {
            None
        }
    }
}

fn database_config_from_env() -> Result<DatabaseConfig> {
    let database_url = env::var("DATABASE_URL").map_err(|_| {
        AppError::ConfigurationError("DATABASE_URL environment variable is required".to_string())
    })?;

    let mut config = DatabaseConfig {
        url: database_url,
        ..DatabaseConfig::default()
    };
    override_from_env("DB_MAX_CONNECTIONS", &mut config.max_connections)?;
    override_from_env("DB_MIN_CONNECTIONS", &mut config.min_connections)?;
    override_from_env("DB_ACQUIRE_TIMEOUT_SECONDS", &mut config.acquire_timeout_seconds)?;
    override_from_env("DB_IDLE_TIMEOUT_SECONDS", &mut config.idle_timeout_seconds)?;
    override_from_env("DB_MAX_LIFETIME_SECONDS", &mut config.max_lifetime_seconds)?;
    Ok(config)
}

fn resilience_config_from_env() -> Result<ResilienceConfig> {
    let mut config = ResilienceConfig::default();

    if let Some(llm) = config.services.get_mut(crate::resilience::LLM_SERVICE) {
        if let Some(retry) = llm.retry.as_mut() {
            override_from_env("LLM_RETRY_MAX_ATTEMPTS", &mut retry.max_attempts)?;
            override_from_env("LLM_RETRY_BASE_DELAY_MS", &mut retry.base_delay_ms)?;
            override_from_env("LLM_RETRY_MAX_DELAY_MS", &mut retry.max_delay_ms)?;
            override_from_env("LLM_RETRY_TIMEOUT_MS", &mut retry.timeout_ms)?;
        }
        if let Some(breaker) = llm.circuit_breaker.as_mut() {
            override_from_env("LLM_CIRCUIT_FAILURE_THRESHOLD", &mut breaker.failure_threshold)?;
            override_from_env("LLM_CIRCUIT_RECOVERY_TIMEOUT_MS", &mut breaker.recovery_timeout_ms)?;
            override_from_env("LLM_CIRCUIT_VOLUME_THRESHOLD", &mut breaker.volume_threshold)?;
        }
        if let Some(rate) = llm.rate_limit.as_mut() {
            override_from_env("LLM_RATE_LIMIT_MAX_REQUESTS", &mut rate.max_requests)?;
            override_from_env("LLM_RATE_LIMIT_WINDOW_MS", &mut rate.window_ms)?;
            override_from_env("LLM_RATE_LIMIT_QUEUE_LIMIT", &mut rate.queue_limit)?;
        }
    }

    Ok(config)
}

fn cache_config_from_env() -> Result<CacheConfig> {
    let mut config = CacheConfig::default();
    override_from_env("CACHE_DEFAULT_TTL_SECONDS", &mut config.default_ttl_seconds)?;
    override_from_env("CACHE_MAX_ENTRIES", &mut config.max_entries_per_namespace)?;
    override_from_env("CACHE_SWEEP_INTERVAL_SECONDS", &mut config.sweep_interval_seconds)?;
    override_from_env("MASTER_DATA_TTL_SECONDS", &mut config.master_data_ttl_seconds)?;
    Ok(config)
}

fn pipeline_config_from_env() -> Result<PipelineConfig> {
    let mut config = PipelineConfig::default();
    override_from_env("PIPELINE_ENTITY_WEIGHT", &mut config.entity_weight)?;
    override_from_env("PIPELINE_CONTEXT_WEIGHT", &mut config.context_weight)?;
    override_from_env("PIPELINE_VALIDATION_WEIGHT", &mut config.validation_weight)?;
    override_from_env("FUZZY_MATCH_THRESHOLD", &mut config.fuzzy_match_threshold)?;
    override_from_env("PATTERN_ROUTE_THRESHOLD", &mut config.pattern_route_threshold)?;
    override_from_env("MAX_RESULT_ROWS", &mut config.max_result_rows)?;
    override_from_env("DEFAULT_QUERY_LIMIT", &mut config.default_limit)?;
    override_from_env("FEW_SHOT_COUNT", &mut config.few_shot_count)?;
    override_from_env("EXECUTE_QUERIES", &mut config.execute_queries)?;
    override_from_env("MAX_BATCH_SIZE", &mut config.max_batch_size)?;
    Ok(config)
}

/// Overwrite `target` when the environment variable is set; a set-but-invalid
/// value is a configuration error, not a silent fallback.
fn override_from_env<T>(var: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = env::var(var) {
        *target = raw
            .parse()
            .map_err(|e| AppError::ConfigurationError(format!("Invalid {}: {}", var, e)))?;
    }
    Ok(())
}

// Development configuration defaults
impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 8090,
            environment: "development".to_string(),
            log_level: "debug".to_string(),
            llm: LLMConfig::default(),
            database: DatabaseConfig::default(),
            resilience: ResilienceConfig::default(),
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            request_timeout_seconds: 120,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        LLMConfig {
            provider: "openai".to_string(),
            api_key: "".to_string(),
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4-1106-preview".to_string(),
            max_tokens: 2000,
            temperature: 0.1,
            timeout_seconds: 60,
            fallback_provider: None,
            fallback_model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::default().is_development());
        assert!(!Config::default().is_production());
    }

    #[test]
    fn test_validate_rejects_out_of_range_weights() {
        let mut config = Config::default();
        config.pipeline.entity_weight = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.fuzzy_match_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_database_url() {
        let mut config = Config::default();
        config.database.url = "mysql://localhost/cmms".to_string();
        assert!(config.validate().is_err());

        config.database.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_pool_bounds() {
        let mut config = Config::default();
        config.database.min_connections = 50;
        config.database.max_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_batch() {
        let mut config = Config::default();
        config.pipeline.max_batch_size = 500;
        assert!(config.validate().is_err());

        config.pipeline.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_llm_validate_bounds() {
        assert!(LLMConfig::default().validate().is_ok());

        let hot = LLMConfig {
            temperature: 3.0,
            ..LLMConfig::default()
        };
        assert!(hot.validate().is_err());

        let unknown = LLMConfig {
            provider: "mystery".to_string(),
            ..LLMConfig::default()
        };
        assert!(unknown.validate().is_err());

        let zero_tokens = LLMConfig {
            max_tokens: 0,
            ..LLMConfig::default()
        };
        assert!(zero_tokens.validate().is_err());
    }

    #[test]
    fn test_has_credentials_per_provider() {
        assert!(!LLMConfig::default().has_credentials());

        let keyed = LLMConfig {
            api_key: "sk-test".to_string(),
            ..LLMConfig::default()
        };
        assert!(keyed.has_credentials());

        let ollama = LLMConfig {
            provider: "ollama".to_string(),
            ..LLMConfig::default()
        };
        assert!(ollama.has_credentials());
    }

    #[test]
    fn test_fallback_config_inherits_tuning() {
        let config = LLMConfig {
            api_key: "sk-test".to_string(),
            fallback_provider: Some("anthropic".to_string()),
            fallback_model: Some("claude-3-haiku-20240307".to_string()),
            ..LLMConfig::default()
        };
        let fallback = config.get_fallback_config().unwrap();
        assert_eq!(fallback.provider, "anthropic");
        assert_eq!(fallback.model, "claude-3-haiku-20240307");
        assert!(fallback.api_url.contains("anthropic.com"));
        assert_eq!(fallback.api_key, "sk-test");
        assert_eq!(fallback.max_tokens, config.max_tokens);
        assert!(fallback.fallback_provider.is_none());

        // No fallback configured, and azure cannot be one: its URL is
        // deployment-specific.
        assert!(LLMConfig::default().get_fallback_config().is_none());
        let azure = LLMConfig {
            fallback_provider: Some("azure".to_string()),
            fallback_model: Some("gpt-4".to_string()),
            ..LLMConfig::default()
        };
        assert!(azure.get_fallback_config().is_none());
    }

    #[test]
    fn test_override_from_env_parses_and_rejects() {
        let mut value: u32 = 5;
        override_from_env("QUERY_FRONTEND_TEST_UNSET", &mut value).unwrap();
        assert_eq!(value, 5);

        env::set_var("QUERY_FRONTEND_TEST_U32", "17");
        override_from_env("QUERY_FRONTEND_TEST_U32", &mut value).unwrap();
        assert_eq!(value, 17);
        env::remove_var("QUERY_FRONTEND_TEST_U32");

        env::set_var("QUERY_FRONTEND_TEST_BAD", "not-a-number");
        let result = override_from_env("QUERY_FRONTEND_TEST_BAD", &mut value);
        assert!(matches!(result, Err(AppError::ConfigurationError(_))));
        env::remove_var("QUERY_FRONTEND_TEST_BAD");
    }
}
