//! Query request/response types and the error taxonomy.

use serde::{Deserialize, Serialize};

use crate::types::entities::EntityResolution;
use crate::types::validation::ValidationResult;

/// Detected intent of a natural-language query.
///
/// `Error` never comes out of intent detection; it marks responses built
/// by the failure path so downstream consumers keep a single code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    EquipmentStatus,
    EquipmentList,
    MaintenanceHistory,
    MaintenanceSchedule,
    RiskAssessment,
    ParameterMonitoring,
    Unknown,
    Error,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::EquipmentStatus => "equipment_status",
            QueryIntent::EquipmentList => "equipment_list",
            QueryIntent::MaintenanceHistory => "maintenance_history",
            QueryIntent::MaintenanceSchedule => "maintenance_schedule",
            QueryIntent::RiskAssessment => "risk_assessment",
            QueryIntent::ParameterMonitoring => "parameter_monitoring",
            QueryIntent::Unknown => "unknown",
            QueryIntent::Error => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryIntent::Error)
    }
}

/// Which tier or service produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    PatternMatch,
    LlmSql,
    TemplateSql,
    FallbackSql,
    Cache,
    Error,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::PatternMatch => "pattern_match",
            ResponseSource::LlmSql => "llm_sql",
            ResponseSource::TemplateSql => "template_sql",
            ResponseSource::FallbackSql => "fallback_sql",
            ResponseSource::Cache => "cache",
            ResponseSource::Error => "error",
        }
    }
}

/// Language of the incoming query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    Japanese,
}

/// Priority tier for rate-limited execution. High drains before medium,
/// medium before low; FIFO within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    High,
    Medium,
    Low,
}

impl RequestPriority {
    /// Numeric rank, larger drains first.
    pub fn rank(&self) -> u8 {
        match self {
            RequestPriority::High => 2,
            RequestPriority::Medium => 1,
            RequestPriority::Low => 0,
        }
    }
}

impl Default for RequestPriority {
    fn default() -> Self {
        RequestPriority::Medium
    }
}

/// Incoming natural-language query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub priority: Option<RequestPriority>,
    /// Identifies the caller for repeated-failure tracking. Optional;
    /// anonymous callers share one bucket.
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub max_results: Option<u32>,
}

/// The uniform response shape. Failures use the same shape with
/// `intent: error`, `confidence: 0`, empty `results`, and populated
/// `recommendations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub intent: QueryIntent,
    pub confidence: f32,
    pub results: Vec<serde_json::Value>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
    pub execution_time_ms: u64,
    pub source: ResponseSource,
}

/// Request into the text-to-SQL pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToSqlRequest {
    pub query: String,
    #[serde(default)]
    pub language: Option<Language>,
    /// When false, the pipeline stops after validation and returns no
    /// execution result.
    #[serde(default = "default_execute")]
    pub execute: bool,
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default)]
    pub caller_id: Option<String>,
}

fn default_execute() -> bool {
    true
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum StepOutcome {
    Success(String),
    Failure(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success(_))
    }
}

/// Per-stage telemetry recorded by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub step: String,
    pub description: String,
    pub duration_ms: u64,
    pub outcome: StepOutcome,
}

/// Rows returned by the structured execution path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
    pub truncated: bool,
}

/// Full text-to-SQL pipeline output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToSqlResponse {
    pub sql: String,
    pub confidence: f32,
    pub explanation: String,
    pub entities: Vec<EntityResolution>,
    pub validation: ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    pub alternatives: Vec<String>,
    pub processing_time_ms: u64,
    pub steps: Vec<ProcessingStep>,
    pub source: ResponseSource,
}

/// Failure taxonomy for user-facing classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    ApiConfig,
    RateLimit,
    Network,
    ServerError,
    Database,
    Parsing,
    Auth,
    Unknown,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::ServerError
                | ErrorCategory::Parsing
        )
    }

    /// Whether the user can do something about it (wait, retry, rephrase).
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Parsing
                | ErrorCategory::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ApiConfig => "API_CONFIG",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::ServerError => "SERVER_ERROR",
            ErrorCategory::Database => "DATABASE",
            ErrorCategory::Parsing => "PARSING",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }
}
