//! Shared type definitions for the CMMS query platform
//!
//! Every service-facing shape lives here: query intents and responses,
//! extracted entities, and SQL validation findings. Keeping them in one
//! crate keeps the frontend, the database layer, and tests agreeing on
//! wire formats.

pub mod entities;
pub mod query;
pub mod validation;

pub use entities::{
    EntityExtraction, EntityKind, EntityResolution, EntitySpan, ResolvedValue, UnresolvedEntity,
};
pub use query::{
    ErrorCategory, ExecutionResult, Language, ProcessingStep, QueryIntent, QueryRequest,
    QueryResponse, RequestPriority, ResponseSource, StepOutcome, TextToSqlRequest,
    TextToSqlResponse,
};
pub use validation::{
    FindingType, Severity, ValidationError, ValidationResult, ValidationWarning,
};
