//! Tiered SQL generation.
//!
//! Generation never fails: the model tier (primary provider, then the
//! configured fallback model) is tried first under the resilience layer,
//! entity-driven templates cover the model being down or keyless, and a
//! per-intent canned statement is the floor. Every tier emits a statement
//! the validator and executor can treat identically; only the
//! [`ResponseSource`] tag tells them apart.

use crate::config::LLMConfig;
use crate::context::{ContextBuilder, QueryContext};
use crate::error::Result;
use crate::examples_bank::ExampleBank;
use crate::llm::{self, LLMClient};
use crate::resilience::{ResilienceManager, LLM_SERVICE};
use chrono::{DateTime, Utc};
use cmms_shared::{
    EntityExtraction, EntityKind, PipelineConfig, QueryIntent, RequestPriority, ResolvedValue,
    ResponseSource,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// One generated statement plus where it came from.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub explanation: String,
    pub source: ResponseSource,
}

pub struct SqlGenerator {
    primary: Arc<LLMClient>,
    fallback: Option<Arc<LLMClient>>,
    resilience: Arc<ResilienceManager>,
    context_builder: ContextBuilder,
    bank: ExampleBank,
    few_shot_count: usize,
    default_limit: u32,
}

impl SqlGenerator {
    pub fn new(
        llm_config: &LLMConfig,
        resilience: Arc<ResilienceManager>,
        context_builder: ContextBuilder,
        pipeline: &PipelineConfig,
    ) -> Result<Self> {
        let primary = Arc::new(LLMClient::new(llm_config)?);
        let fallback = match llm_config.get_fallback_config() {
            Some(config) => Some(Arc::new(LLMClient::new(&config)?)),
            None => None,
        };
        Ok(Self {
            primary,
            fallback,
            resilience,
            context_builder,
            bank: ExampleBank::new(),
            few_shot_count: pipeline.few_shot_count,
            default_limit: pipeline.default_limit,
        })
    }

    /// Produce SQL for the query, descending through the tiers until one
    /// answers.
    pub async fn generate(
        &self,
        query: &str,
        intent: QueryIntent,
        extraction: &EntityExtraction,
        context: &QueryContext,
        priority: RequestPriority,
    ) -> GeneratedSql {
        if let Some(generated) = self.model_sql(query, intent, context, priority).await {
            return generated;
        }
        if let Some(generated) = self.template_sql(intent, extraction) {
            debug!(intent = intent.as_str(), "answering from SQL template");
            return generated;
        }
        debug!(intent = intent.as_str(), "answering from fallback SQL");
        self.fallback_sql(intent)
    }

    async fn model_sql(
        &self,
        query: &str,
        intent: QueryIntent,
        context: &QueryContext,
        priority: RequestPriority,
    ) -> Option<GeneratedSql> {
        let system = self.system_prompt(context);
        let user = self.user_prompt(query, intent, context);

        if let Some(generated) = self
            .complete_with(&self.primary, priority, "llm_sql_primary", &system, &user)
            .await
        {
            return Some(generated);
        }
        let fallback = self.fallback.as_ref()?;
        debug!(
            provider = fallback.provider().name(),
            model = fallback.model(),
            "primary provider failed, trying fallback model"
        );
        self.complete_with(fallback, priority, "llm_sql_fallback", &system, &user)
            .await
    }

    async fn complete_with(
        &self,
        client: &Arc<LLMClient>,
        priority: RequestPriority,
        operation_name: &str,
        system: &str,
        user: &str,
    ) -> Option<GeneratedSql> {
        let outcome = self
            .resilience
            .execute(LLM_SERVICE, priority, operation_name, |_attempt| {
                let client = client.clone();
                let system = system.to_string();
                let user = user.to_string();
                async move { client.complete(&system, &user).await }
            })
            .await;

        match outcome.into_result() {
            Ok(completion) => match llm::extract_sql(&completion.content) {
                Ok(extraction) if !extraction.sql.is_empty() => Some(GeneratedSql {
                    sql: extraction.sql,
                    explanation: extraction.explanation.unwrap_or_else(|| {
                        "Statement generated by the language model".to_string()
                    }),
                    source: ResponseSource::LlmSql,
                }),
                Ok(_) => {
                    warn!(
                        provider = client.provider().name(),
                        "model returned an empty statement"
                    );
                    None
                }
                Err(err) => {
                    warn!(
                        provider = client.provider().name(),
                        error = %err,
                        "model response contained no usable SQL"
                    );
                    None
                }
            },
            Err(err) => {
                warn!(
                    provider = client.provider().name(),
                    error = %err,
                    "model SQL generation failed"
                );
                None
            }
        }
    }

    fn system_prompt(&self, context: &QueryContext) -> String {
        format!(
            "You translate plant maintenance questions (English or Japanese) into PostgreSQL.\n\n\
             {}\n\
             Rules:\n\
             - Reply with exactly one SELECT statement inside a ```sql fence.\n\
             - Read-only: never write data or call functions with side effects.\n\
             - Use only the tables and columns listed above.\n\
             - Include ORDER BY and LIMIT {} unless the question requires otherwise.",
            self.context_builder.grounding_block(context),
            self.default_limit,
        )
    }

    fn user_prompt(&self, query: &str, intent: QueryIntent, context: &QueryContext) -> String {
        let examples = self
            .bank
            .select(query, intent, &context.focus_tables, self.few_shot_count);
        format!("{}Q: {}\nSQL:", ExampleBank::render(&examples), query)
    }

    /// Build a statement from the intent and resolved entities alone. Returns
    /// None when the intent gives no table to aim at.
    pub fn template_sql(
        &self,
        intent: QueryIntent,
        extraction: &EntityExtraction,
    ) -> Option<GeneratedSql> {
        let limit = self.default_limit;
        let (sql, explanation) = match intent {
            QueryIntent::EquipmentStatus => self.status_template(extraction, limit)?,
            QueryIntent::EquipmentList => self.list_template(extraction, limit),
            QueryIntent::MaintenanceHistory => self.history_template(extraction, limit),
            QueryIntent::MaintenanceSchedule => self.schedule_template(extraction, limit),
            QueryIntent::RiskAssessment => self.risk_template(extraction, limit),
            QueryIntent::ParameterMonitoring => self.parameter_template(extraction, limit),
            QueryIntent::Unknown | QueryIntent::Error => return None,
        };
        Some(GeneratedSql {
            sql,
            explanation,
            source: ResponseSource::TemplateSql,
        })
    }

    fn status_template(
        &self,
        extraction: &EntityExtraction,
        limit: u32,
    ) -> Option<(String, String)> {
        let base = "SELECT equipment_id, equipment_name, status, location, system_id FROM equipment";
        if let Some(ResolvedValue::Equipment { equipment_id }) = resolved(extraction, EntityKind::Equipment) {
            return Some((
                format!(
                    "{} WHERE equipment_id = '{}' ORDER BY equipment_id LIMIT {}",
                    base,
                    escape(equipment_id),
                    limit
                ),
                format!("Current status of equipment {}", equipment_id),
            ));
        }
        if let Some(ResolvedValue::System { system_id }) = resolved(extraction, EntityKind::System) {
            return Some((
                format!(
                    "{} WHERE system_id = '{}' ORDER BY equipment_id LIMIT {}",
                    base,
                    escape(system_id),
                    limit
                ),
                format!("Status of all equipment in system {}", system_id),
            ));
        }
        if let Some(ResolvedValue::Status { canonical }) = resolved(extraction, EntityKind::Status) {
            return Some((
                format!(
                    "{} WHERE status = '{}' ORDER BY equipment_id LIMIT {}",
                    base,
                    escape(canonical),
                    limit
                ),
                format!("Equipment currently in status '{}'", canonical),
            ));
        }
        None
    }

    fn list_template(&self, extraction: &EntityExtraction, limit: u32) -> (String, String) {
        let mut clauses: Vec<String> = Vec::new();
        let mut described: Vec<String> = Vec::new();

        if let Some(ResolvedValue::EquipmentType { type_code, canonical }) =
            resolved(extraction, EntityKind::EquipmentType)
        {
            clauses.push(format!("e.equipment_type_id = {}", type_code));
            described.push(format!("type {}", canonical));
        }
        if let Some(ResolvedValue::Status { canonical }) = resolved(extraction, EntityKind::Status) {
            clauses.push(format!("e.status = '{}'", escape(canonical)));
            described.push(format!("status {}", canonical));
        }
        if let Some(ResolvedValue::Location { canonical }) =
            resolved(extraction, EntityKind::Location)
        {
            clauses.push(format!("e.location ILIKE '%{}%'", escape(canonical)));
            described.push(format!("location {}", canonical));
        }
        if let Some(ResolvedValue::System { system_id }) = resolved(extraction, EntityKind::System) {
            clauses.push(format!("e.system_id = '{}'", escape(system_id)));
            described.push(format!("system {}", system_id));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT e.equipment_id, e.equipment_name, t.type_name, e.location, e.status \
             FROM equipment e JOIN equipment_type_master t ON e.equipment_type_id = t.equipment_type_id\
             {} ORDER BY e.equipment_id LIMIT {}",
            where_clause, limit
        );
        let explanation = if described.is_empty() {
            "Equipment list".to_string()
        } else {
            format!("Equipment filtered by {}", described.join(", "))
        };
        (sql, explanation)
    }

    fn history_template(&self, extraction: &EntityExtraction, limit: u32) -> (String, String) {
        let mut clauses: Vec<String> = Vec::new();
        let mut described: Vec<String> = Vec::new();

        if let Some(ResolvedValue::Equipment { equipment_id }) =
            resolved(extraction, EntityKind::Equipment)
        {
            clauses.push(format!("equipment_id = '{}'", escape(equipment_id)));
            described.push(equipment_id.clone());
        }
        if let Some(ResolvedValue::TimePeriod { start, end, label }) =
            resolved(extraction, EntityKind::TimePeriod)
        {
            clauses.push(format!(
                "work_date >= '{}' AND work_date < '{}'",
                date_literal(start),
                date_literal(end)
            ));
            described.push(label.clone());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT equipment_id, work_date, work_type, work_description, technician, \
             duration_hours, cost FROM maintenance_history{} ORDER BY work_date DESC LIMIT {}",
            where_clause, limit
        );
        let explanation = if described.is_empty() {
            "Recent maintenance records".to_string()
        } else {
            format!("Maintenance records for {}", described.join(", "))
        };
        (sql, explanation)
    }

    fn schedule_template(&self, extraction: &EntityExtraction, limit: u32) -> (String, String) {
        let mut clauses: Vec<String> = vec![
            "scheduled_date >= CURRENT_DATE".to_string(),
            "scheduled_date < CURRENT_DATE + INTERVAL '30 days'".to_string(),
            "status IN ('planned', 'in_progress', 'overdue')".to_string(),
        ];
        let mut explanation = "Maintenance planned for the next 30 days".to_string();

        if let Some(ResolvedValue::Equipment { equipment_id }) =
            resolved(extraction, EntityKind::Equipment)
        {
            clauses.push(format!("equipment_id = '{}'", escape(equipment_id)));
            explanation = format!("Upcoming maintenance for {}", equipment_id);
        }

        let sql = format!(
            "SELECT equipment_id, scheduled_date, work_type, priority, assigned_to, status \
             FROM maintenance_schedule WHERE {} ORDER BY scheduled_date LIMIT {}",
            clauses.join(" AND "),
            limit
        );
        (sql, explanation)
    }

    fn risk_template(&self, extraction: &EntityExtraction, limit: u32) -> (String, String) {
        let (where_clause, explanation) = match resolved(extraction, EntityKind::Equipment) {
            Some(ResolvedValue::Equipment { equipment_id }) => (
                format!(" WHERE equipment_id = '{}'", escape(equipment_id)),
                format!("Risk assessments for {}", equipment_id),
            ),
            _ => (
                String::new(),
                "Highest-risk equipment first".to_string(),
            ),
        };
        let sql = format!(
            "SELECT equipment_id, assessment_date, severity, occurrence, detection, \
             risk_score, risk_level FROM equipment_risk_assessment{} \
             ORDER BY risk_score DESC LIMIT {}",
            where_clause, limit
        );
        (sql, explanation)
    }

    fn parameter_template(&self, extraction: &EntityExtraction, limit: u32) -> (String, String) {
        let mut clauses: Vec<String> = Vec::new();
        let mut described: Vec<String> = Vec::new();

        if let Some(ResolvedValue::Parameter { parameter_id }) =
            resolved(extraction, EntityKind::Parameter)
        {
            clauses.push(format!("d.parameter_id = '{}'", escape(parameter_id)));
            described.push(parameter_id.clone());
        }
        if let Some(ResolvedValue::Equipment { equipment_id }) =
            resolved(extraction, EntityKind::Equipment)
        {
            clauses.push(format!("m.equipment_id = '{}'", escape(equipment_id)));
            described.push(equipment_id.clone());
        }
        if let Some(ResolvedValue::TimePeriod { start, end, label }) =
            resolved(extraction, EntityKind::TimePeriod)
        {
            clauses.push(format!(
                "d.measured_at >= '{}' AND d.measured_at < '{}'",
                start.to_rfc3339(),
                end.to_rfc3339()
            ));
            described.push(label.clone());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT d.parameter_id, m.parameter_name, m.equipment_id, d.measured_at, d.value, \
             m.unit, d.quality FROM process_data d \
             JOIN parameter_master m ON d.parameter_id = m.parameter_id\
             {} ORDER BY d.measured_at DESC LIMIT {}",
            where_clause, limit
        );
        let explanation = if described.is_empty() {
            "Latest process measurements".to_string()
        } else {
            format!("Process measurements for {}", described.join(", "))
        };
        (sql, explanation)
    }

    /// Per-intent floor statement: safe, entity-free, always runnable.
    pub fn fallback_sql(&self, intent: QueryIntent) -> GeneratedSql {
        let (sql, explanation) = match intent {
            QueryIntent::MaintenanceHistory => (
                "SELECT equipment_id, work_date, work_type, work_description \
                 FROM maintenance_history ORDER BY work_date DESC LIMIT 20",
                "Most recent maintenance records",
            ),
            QueryIntent::MaintenanceSchedule => (
                "SELECT equipment_id, scheduled_date, work_type, priority, status \
                 FROM maintenance_schedule WHERE scheduled_date >= CURRENT_DATE \
                 ORDER BY scheduled_date LIMIT 20",
                "Upcoming scheduled maintenance",
            ),
            QueryIntent::RiskAssessment => (
                "SELECT equipment_id, risk_score, risk_level, assessment_date \
                 FROM equipment_risk_assessment ORDER BY risk_score DESC LIMIT 20",
                "Highest-risk equipment",
            ),
            QueryIntent::ParameterMonitoring => (
                "SELECT parameter_id, measured_at, value, quality \
                 FROM process_data ORDER BY measured_at DESC LIMIT 20",
                "Latest process measurements",
            ),
            QueryIntent::EquipmentStatus
            | QueryIntent::EquipmentList
            | QueryIntent::Unknown
            | QueryIntent::Error => (
                "SELECT equipment_id, equipment_name, status \
                 FROM equipment ORDER BY equipment_id LIMIT 20",
                "Equipment overview",
            ),
        };
        GeneratedSql {
            sql: sql.to_string(),
            explanation: explanation.to_string(),
            source: ResponseSource::FallbackSql,
        }
    }
}

fn resolved<'a>(
    extraction: &'a EntityExtraction,
    kind: EntityKind,
) -> Option<&'a ResolvedValue> {
    extraction.first_of(kind).map(|e| &e.resolved)
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

fn date_literal(at: &DateTime<Utc>) -> String {
    at.date_naive().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::SqlValidator;
    use chrono::TimeZone;
    use cmms_database::SchemaCatalog;
    use cmms_shared::{
        EntityResolution, EntitySpan, ResilienceConfig, RetryConfig, ServiceResilienceConfig,
    };
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator() -> SqlGenerator {
        // Keyless config: the model tier fails fast without touching the
        // network, exercising the template and fallback tiers.
        let llm_config = LLMConfig::default();
        SqlGenerator::new(
            &llm_config,
            Arc::new(ResilienceManager::default()),
            ContextBuilder::new(SchemaCatalog::new()),
            &PipelineConfig::default(),
        )
        .unwrap()
    }

    fn fast_resilience() -> Arc<ResilienceManager> {
        let mut config = ResilienceConfig::default();
        config.apply_update(
            LLM_SERVICE,
            ServiceResilienceConfig {
                retry: Some(RetryConfig {
                    max_attempts: 3,
                    base_delay_ms: 1,
                    max_delay_ms: 5,
                    jitter_ms: 0,
                    timeout_ms: 5_000,
                    ..RetryConfig::default()
                }),
                ..ServiceResilienceConfig::default()
            },
        );
        Arc::new(ResilienceManager::new(config))
    }

    fn extraction_with(values: Vec<ResolvedValue>) -> EntityExtraction {
        let entities = values
            .into_iter()
            .enumerate()
            .map(|(i, resolved)| EntityResolution {
                original: resolved.display(),
                resolved,
                confidence: 1.0,
                alternatives: vec![],
                span: EntitySpan {
                    start: i * 10,
                    end: i * 10 + 6,
                },
            })
            .collect();
        EntityExtraction {
            entities,
            unresolved: vec![],
            confidence: 1.0,
            suggestions: vec![],
        }
    }

    #[tokio::test]
    async fn test_model_tier_retries_then_answers() {
        let server = MockServer::start().await;
        // One 429, then a clean completion: the retry layer absorbs the
        // transient failure and the model tier still answers.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content":
                    "```sql\nSELECT equipment_id, status FROM equipment WHERE status = 'running' ORDER BY equipment_id LIMIT 100\n```"}}],
                "usage": {"prompt_tokens": 200, "completion_tokens": 30}
            })))
            .mount(&server)
            .await;

        let llm_config = LLMConfig {
            provider: "openai".to_string(),
            api_key: "test-key".to_string(),
            api_url: server.uri(),
            ..LLMConfig::default()
        };
        let generator = SqlGenerator::new(
            &llm_config,
            fast_resilience(),
            ContextBuilder::new(SchemaCatalog::new()),
            &PipelineConfig::default(),
        )
        .unwrap();

        let extraction = EntityExtraction::empty();
        let context = ContextBuilder::new(SchemaCatalog::new())
            .build(QueryIntent::EquipmentStatus, &extraction);
        let generated = generator
            .generate(
                "Which equipment is running?",
                QueryIntent::EquipmentStatus,
                &extraction,
                &context,
                RequestPriority::Medium,
            )
            .await;

        assert_eq!(generated.source, ResponseSource::LlmSql);
        assert!(generated.sql.contains("status = 'running'"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_model_exhaustion_descends_to_template() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        let llm_config = LLMConfig {
            provider: "openai".to_string(),
            api_key: "test-key".to_string(),
            api_url: server.uri(),
            ..LLMConfig::default()
        };
        let generator = SqlGenerator::new(
            &llm_config,
            fast_resilience(),
            ContextBuilder::new(SchemaCatalog::new()),
            &PipelineConfig::default(),
        )
        .unwrap();

        let extraction = extraction_with(vec![ResolvedValue::Equipment {
            equipment_id: "HX-101".to_string(),
        }]);
        let context = ContextBuilder::new(SchemaCatalog::new())
            .build(QueryIntent::EquipmentStatus, &extraction);
        let generated = generator
            .generate(
                "What is the status of HX-101?",
                QueryIntent::EquipmentStatus,
                &extraction,
                &context,
                RequestPriority::Medium,
            )
            .await;

        assert_eq!(generated.source, ResponseSource::TemplateSql);
        assert!(generated.sql.contains("WHERE equipment_id = 'HX-101'"));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_keyless_model_descends_to_template() {
        let generator = generator();
        let extraction = extraction_with(vec![ResolvedValue::Equipment {
            equipment_id: "HX-101".to_string(),
        }]);
        let context = ContextBuilder::new(SchemaCatalog::new())
            .build(QueryIntent::EquipmentStatus, &extraction);

        let generated = generator
            .generate(
                "What is the status of HX-101?",
                QueryIntent::EquipmentStatus,
                &extraction,
                &context,
                RequestPriority::Medium,
            )
            .await;

        assert_eq!(generated.source, ResponseSource::TemplateSql);
        assert!(generated.sql.contains("WHERE equipment_id = 'HX-101'"));
    }

    #[tokio::test]
    async fn test_unknown_intent_descends_to_fallback() {
        let generator = generator();
        let extraction = EntityExtraction::empty();
        let context =
            ContextBuilder::new(SchemaCatalog::new()).build(QueryIntent::Unknown, &extraction);

        let generated = generator
            .generate(
                "tell me something",
                QueryIntent::Unknown,
                &extraction,
                &context,
                RequestPriority::Medium,
            )
            .await;

        assert_eq!(generated.source, ResponseSource::FallbackSql);
        assert!(generated.sql.contains("FROM equipment"));
    }

    #[test]
    fn test_status_template_without_entities_is_none() {
        let generator = generator();
        assert!(generator
            .template_sql(QueryIntent::EquipmentStatus, &EntityExtraction::empty())
            .is_none());
    }

    #[test]
    fn test_list_template_combines_filters() {
        let generator = generator();
        let extraction = extraction_with(vec![
            ResolvedValue::EquipmentType {
                type_code: 2,
                canonical: "Pump".to_string(),
            },
            ResolvedValue::Status {
                canonical: "running".to_string(),
            },
        ]);
        let generated = generator
            .template_sql(QueryIntent::EquipmentList, &extraction)
            .unwrap();
        assert!(generated.sql.contains("e.equipment_type_id = 2"));
        assert!(generated.sql.contains("e.status = 'running'"));
        assert!(generated.sql.contains("JOIN equipment_type_master"));
    }

    #[test]
    fn test_history_template_uses_date_window() {
        let generator = generator();
        let extraction = extraction_with(vec![
            ResolvedValue::Equipment {
                equipment_id: "P-102".to_string(),
            },
            ResolvedValue::TimePeriod {
                start: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                label: "last month".to_string(),
            },
        ]);
        let generated = generator
            .template_sql(QueryIntent::MaintenanceHistory, &extraction)
            .unwrap();
        assert!(generated.sql.contains("equipment_id = 'P-102'"));
        assert!(generated
            .sql
            .contains("work_date >= '2024-02-01' AND work_date < '2024-03-01'"));
        assert!(generated.sql.contains("ORDER BY work_date DESC"));
    }

    #[test]
    fn test_template_escapes_single_quotes() {
        let generator = generator();
        let extraction = extraction_with(vec![ResolvedValue::Location {
            canonical: "O'Hara wing".to_string(),
        }]);
        let generated = generator
            .template_sql(QueryIntent::EquipmentList, &extraction)
            .unwrap();
        assert!(generated.sql.contains("O''Hara wing"));
    }

    #[test]
    fn test_schedule_template_defaults_to_next_30_days() {
        let generator = generator();
        let generated = generator
            .template_sql(QueryIntent::MaintenanceSchedule, &EntityExtraction::empty())
            .unwrap();
        assert!(generated.sql.contains("CURRENT_DATE + INTERVAL '30 days'"));
        assert!(generated.sql.contains("ORDER BY scheduled_date"));
    }

    #[test]
    fn test_every_template_and_fallback_passes_validation() {
        let generator = generator();
        let validator = SqlValidator::new(SchemaCatalog::new(), 100, 100);
        let extraction = extraction_with(vec![
            ResolvedValue::Equipment {
                equipment_id: "HX-101".to_string(),
            },
            ResolvedValue::Parameter {
                parameter_id: "TI-101-01".to_string(),
            },
        ]);

        let intents = [
            QueryIntent::EquipmentStatus,
            QueryIntent::EquipmentList,
            QueryIntent::MaintenanceHistory,
            QueryIntent::MaintenanceSchedule,
            QueryIntent::RiskAssessment,
            QueryIntent::ParameterMonitoring,
            QueryIntent::Unknown,
        ];
        for intent in intents {
            if let Some(generated) = generator.template_sql(intent, &extraction) {
                let result = validator.validate_static(&generated.sql);
                assert!(
                    result.is_valid,
                    "template for {:?} failed: {:?}",
                    intent, result.errors
                );
            }
            let fallback = generator.fallback_sql(intent);
            let result = validator.validate_static(&fallback.sql);
            assert!(
                result.is_valid,
                "fallback for {:?} failed: {:?}",
                intent, result.errors
            );
        }
    }
}
