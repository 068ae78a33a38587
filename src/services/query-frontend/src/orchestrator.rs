//! Text-to-SQL pipeline orchestration.
//!
//! One call runs the whole pipeline: entity extraction, intent detection,
//! context assembly, generation, validation, and execution, with each stage
//! timed and recorded as a [`ProcessingStep`]. Execution prefers the
//! parameterized structured path; the guarded raw-SQL path is the fallback
//! when no structured plan fits the question. The pipeline itself never
//! fails; stage failures are recorded in the step log and the response
//! degrades instead.

use crate::context::ContextBuilder;
use crate::entities::EntityResolver;
use crate::error::AppError;
use crate::generator::{GeneratedSql, SqlGenerator};
use crate::intent::IntentDetector;
use crate::resilience::{ResilienceManager, DATABASE_SERVICE};
use crate::validator::SqlValidator;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use cmms_database::{CmmsRepository, QueryGuard, SchemaCatalog, StructuredQuery};
use cmms_shared::{
    EntityExtraction, EntityKind, ExecutionResult, PipelineConfig, ProcessingStep, QueryIntent,
    RequestPriority, ResolvedValue, StepOutcome, TextToSqlRequest, TextToSqlResponse,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct QueryOrchestrator {
    resolver: Arc<EntityResolver>,
    intent: IntentDetector,
    context_builder: ContextBuilder,
    generator: Arc<SqlGenerator>,
    validator: SqlValidator,
    resilience: Arc<ResilienceManager>,
    repository: Option<CmmsRepository>,
    guard: Option<QueryGuard>,
    pipeline: PipelineConfig,
}

impl QueryOrchestrator {
    pub fn new(
        resolver: Arc<EntityResolver>,
        generator: Arc<SqlGenerator>,
        validator: SqlValidator,
        resilience: Arc<ResilienceManager>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            resolver,
            intent: IntentDetector::new(),
            context_builder: ContextBuilder::new(SchemaCatalog::new()),
            generator,
            validator,
            resilience,
            repository: None,
            guard: None,
            pipeline,
        }
    }

    /// Attach the database. Without it the pipeline still generates and
    /// validates, but every execution attempt fails into the step log.
    pub fn with_database(mut self, repository: CmmsRepository, guard: QueryGuard) -> Self {
        self.repository = Some(repository);
        self.guard = Some(guard);
        self
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    /// Requested row cap, clamped to the configured hard limit.
    pub fn max_rows_for(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.pipeline.max_result_rows)
            .clamp(1, self.pipeline.max_result_rows)
    }

    /// Run the full pipeline for one request.
    pub async fn run(
        &self,
        request: &TextToSqlRequest,
        priority: RequestPriority,
    ) -> TextToSqlResponse {
        let mut tracker = StepTracker::new();
        let max_rows = self.max_rows_for(request.max_results);

        let step = Instant::now();
        let extraction = self.resolver.extract(&request.query).await;
        tracker.record(
            "entity_extraction",
            "Extract and resolve entities",
            step,
            StepOutcome::Success(format!(
                "{} resolved, {} unresolved",
                extraction.entities.len(),
                extraction.unresolved.len()
            )),
        );

        let step = Instant::now();
        let detection = self.intent.detect(&request.query);
        let intent = detection.intent;
        tracker.record(
            "intent_detection",
            "Classify the question",
            step,
            StepOutcome::Success(format!(
                "{} ({:.2})",
                intent.as_str(),
                detection.confidence
            )),
        );

        let step = Instant::now();
        let context = self.context_builder.build(intent, &extraction);
        tracker.record(
            "context_building",
            "Assemble schema grounding",
            step,
            StepOutcome::Success(format!("{} focus tables", context.focus_tables.len())),
        );

        let step = Instant::now();
        let generated = self
            .generator
            .generate(&request.query, intent, &extraction, &context, priority)
            .await;
        tracker.record(
            "sql_generation",
            "Generate the SQL statement",
            step,
            StepOutcome::Success(generated.source.as_str().to_string()),
        );

        let step = Instant::now();
        let mut validation = self
            .validator
            .validate(&generated.sql, self.guard.as_ref())
            .await;
        // Surface resolver "did you mean" hints alongside the validator's own.
        validation
            .suggestions
            .extend(extraction.suggestions.iter().cloned());
        let outcome = if validation.is_valid {
            StepOutcome::Success(format!("{} warnings", validation.warnings.len()))
        } else {
            StepOutcome::Failure(format!("{} errors", validation.errors.len()))
        };
        tracker.record(
            "validation",
            "Validate and rewrite the statement",
            step,
            outcome,
        );

        let mut execution = None;
        if request.execute && self.pipeline.execute_queries && validation.is_valid {
            let step = Instant::now();
            let plan = build_plan(intent, &extraction);
            let effective_sql = validation
                .rewritten_query
                .clone()
                .unwrap_or_else(|| generated.sql.clone());
            match self
                .execute_statement(plan.as_ref(), &effective_sql, max_rows, priority)
                .await
            {
                Ok(result) => {
                    tracker.record(
                        "execution",
                        "Run the query",
                        step,
                        StepOutcome::Success(format!(
                            "{} rows{}",
                            result.row_count,
                            if result.truncated { " (truncated)" } else { "" }
                        )),
                    );
                    execution = Some(result);
                }
                Err(err) => {
                    tracker.record(
                        "execution",
                        "Run the query",
                        step,
                        StepOutcome::Failure(err.to_string()),
                    );
                }
            }
        }

        let alternatives = self.alternatives_for(&generated, intent, &extraction);

        let (entity_w, context_w, validation_w) = self.pipeline.normalized_weights();
        let confidence = (entity_w * extraction.confidence
            + context_w * context.confidence
            + validation_w * validation.confidence_score())
        .clamp(0.0, 1.0);

        info!(
            intent = intent.as_str(),
            source = generated.source.as_str(),
            confidence,
            valid = validation.is_valid,
            executed = execution.is_some(),
            "text-to-sql pipeline complete"
        );

        TextToSqlResponse {
            sql: generated.sql,
            confidence,
            explanation: generated.explanation,
            entities: extraction.entities,
            validation,
            execution,
            alternatives,
            processing_time_ms: tracker.elapsed_ms(),
            steps: tracker.into_steps(),
            source: generated.source,
        }
    }

    /// Run a structured plan under the database resilience policy. Also the
    /// fast path's executor, bypassing generation entirely.
    pub async fn run_plan(
        &self,
        plan: &StructuredQuery,
        max_rows: u32,
        priority: RequestPriority,
    ) -> Result<ExecutionResult, AppError> {
        let repository = self.repository.as_ref().ok_or_else(|| {
            AppError::ServiceUnavailable("database not configured".to_string())
        })?;
        let outcome = self
            .resilience
            .execute(DATABASE_SERVICE, priority, plan.label(), |_attempt| {
                let repository = repository.clone();
                let plan = plan.clone();
                async move { repository.run(&plan, max_rows).await.map_err(AppError::from) }
            })
            .await;
        outcome.into_result()
    }

    async fn execute_statement(
        &self,
        plan: Option<&StructuredQuery>,
        sql: &str,
        max_rows: u32,
        priority: RequestPriority,
    ) -> Result<ExecutionResult, AppError> {
        if self.repository.is_some() {
            if let Some(plan) = plan {
                return self.run_plan(plan, max_rows, priority).await;
            }
        }
        let guard = self.guard.as_ref().ok_or_else(|| {
            AppError::ServiceUnavailable("database not configured".to_string())
        })?;
        let outcome = self
            .resilience
            .execute(DATABASE_SERVICE, priority, "guarded_select", |_attempt| {
                let guard = guard.clone();
                let sql = sql.to_string();
                async move { guard.execute_select(&sql, max_rows).await.map_err(AppError::from) }
            })
            .await;
        outcome.into_result()
    }

    /// When the model answered, surface the deterministic template as an
    /// alternative reading of the same question.
    fn alternatives_for(
        &self,
        generated: &GeneratedSql,
        intent: QueryIntent,
        extraction: &EntityExtraction,
    ) -> Vec<String> {
        if generated.source != cmms_shared::ResponseSource::LlmSql {
            return Vec::new();
        }
        match self.generator.template_sql(intent, extraction) {
            Some(template) if template.sql != generated.sql => vec![template.sql],
            _ => Vec::new(),
        }
    }
}

/// Map the detected intent and resolved entities onto a parameterized
/// structured query. None means only generated SQL can answer.
pub fn build_plan(intent: QueryIntent, extraction: &EntityExtraction) -> Option<StructuredQuery> {
    let equipment_id = match resolved_of(extraction, EntityKind::Equipment) {
        Some(ResolvedValue::Equipment { equipment_id }) => Some(equipment_id.clone()),
        _ => None,
    };
    let system_id = match resolved_of(extraction, EntityKind::System) {
        Some(ResolvedValue::System { system_id }) => Some(system_id.clone()),
        _ => None,
    };
    let parameter_id = match resolved_of(extraction, EntityKind::Parameter) {
        Some(ResolvedValue::Parameter { parameter_id }) => Some(parameter_id.clone()),
        _ => None,
    };
    let type_code = match resolved_of(extraction, EntityKind::EquipmentType) {
        Some(ResolvedValue::EquipmentType { type_code, .. }) => Some(*type_code),
        _ => None,
    };
    let status = match resolved_of(extraction, EntityKind::Status) {
        Some(ResolvedValue::Status { canonical }) => Some(canonical.clone()),
        _ => None,
    };
    let location = match resolved_of(extraction, EntityKind::Location) {
        Some(ResolvedValue::Location { canonical }) => Some(canonical.clone()),
        _ => None,
    };
    let (since, until) = match resolved_of(extraction, EntityKind::TimePeriod) {
        Some(ResolvedValue::TimePeriod { start, end, .. }) => {
            (Some(start.date_naive()), Some(inclusive_until(end)))
        }
        _ => (None, None),
    };

    match intent {
        QueryIntent::EquipmentStatus => {
            if let Some(equipment_id) = equipment_id {
                return Some(StructuredQuery::EquipmentById { equipment_id });
            }
            if let Some(system_id) = system_id {
                return Some(StructuredQuery::EquipmentBySystem { system_id });
            }
            if let Some(type_code) = type_code {
                return Some(StructuredQuery::EquipmentByType { type_code });
            }
            if status.is_some() {
                return Some(StructuredQuery::EquipmentList { status, location });
            }
            None
        }
        QueryIntent::EquipmentList => {
            if let Some(type_code) = type_code {
                // A type filter combined with other filters needs generated
                // SQL; alone it has a dedicated plan.
                if status.is_none() && location.is_none() {
                    return Some(StructuredQuery::EquipmentByType { type_code });
                }
                return None;
            }
            Some(StructuredQuery::EquipmentList { status, location })
        }
        QueryIntent::MaintenanceHistory => Some(StructuredQuery::MaintenanceHistory {
            equipment_id,
            since,
            until,
        }),
        QueryIntent::RiskAssessment => Some(StructuredQuery::RiskAssessments { equipment_id }),
        QueryIntent::MaintenanceSchedule => Some(StructuredQuery::UpcomingSchedule {
            equipment_id,
            within_days: 30,
        }),
        QueryIntent::ParameterMonitoring => Some(StructuredQuery::LatestReadings {
            equipment_id,
            parameter_id,
        }),
        QueryIntent::Unknown | QueryIntent::Error => None,
    }
}

fn resolved_of<'a>(
    extraction: &'a EntityExtraction,
    kind: EntityKind,
) -> Option<&'a ResolvedValue> {
    extraction.first_of(kind).map(|e| &e.resolved)
}

/// Period ends are exclusive bounds; the repository's `until` is an
/// inclusive work_date. A midnight end means the previous day was the last
/// one in the period.
fn inclusive_until(end: &DateTime<Utc>) -> NaiveDate {
    let date = end.date_naive();
    if end.time() == NaiveTime::MIN {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

struct StepTracker {
    started: Instant,
    steps: Vec<ProcessingStep>,
}

impl StepTracker {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            steps: Vec::new(),
        }
    }

    fn record(&mut self, step: &str, description: &str, step_started: Instant, outcome: StepOutcome) {
        self.steps.push(ProcessingStep {
            step: step.to_string(),
            description: description.to_string(),
            duration_ms: step_started.elapsed().as_millis() as u64,
            outcome,
        });
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn into_steps(self) -> Vec<ProcessingStep> {
        self.steps
    }
}
