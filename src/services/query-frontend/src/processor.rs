//! Natural-language query front door.
//!
//! [`QueryProcessor`] turns a [`QueryRequest`] into a [`QueryResponse`] and
//! never returns an error: failures come back as error-shaped responses with
//! recommendations the caller can act on. Confident keyword matches with a
//! complete entity picture skip the model entirely and run a structured plan;
//! everything else goes through the full text-to-SQL pipeline. Successful
//! answers are cached, and repeated failures from the same caller earn an
//! extra hint instead of the same terse error.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use cmms_shared::{
    ErrorCategory, Language, QueryIntent, QueryRequest, QueryResponse, ResponseSource, StepOutcome,
    TextToSqlRequest, TextToSqlResponse,
};

use crate::cache::{QueryCache, RESPONSES_NAMESPACE};
use crate::error::{bad_request, AppError};
use crate::intent::{detect_language, IntentDetector};
use crate::orchestrator::{build_plan, QueryOrchestrator};

pub struct QueryProcessor {
    orchestrator: Arc<QueryOrchestrator>,
    cache: Arc<QueryCache>,
    intent: IntentDetector,
    failures: FailureMemory,
}

impl QueryProcessor {
    pub fn new(orchestrator: Arc<QueryOrchestrator>, cache: Arc<QueryCache>) -> Self {
        let pipeline = orchestrator.pipeline();
        let failures = FailureMemory::new(
            pipeline.failure_memory_size,
            pipeline.repeat_failure_threshold,
        );
        Self {
            orchestrator,
            cache,
            intent: IntentDetector::new(),
            failures,
        }
    }

    /// Answer a natural-language question. Always produces a response; on
    /// failure the response carries `QueryIntent::Error`, zero confidence,
    /// and recommendations matched to the failure category.
    pub async fn process_query(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return self.failure(&request, started, &bad_request("query text is empty"));
        }
        let priority = request.priority.unwrap_or_default();
        let language = request
            .language
            .unwrap_or_else(|| detect_language(&query));

        let cache_key = QueryCache::key_for(&query);
        if let Some(value) = self.cache.get(RESPONSES_NAMESPACE, &cache_key) {
            if let Ok(mut cached) = serde_json::from_value::<QueryResponse>(value) {
                let original = cached.source.as_str();
                cached.summary = format!("{} (cached from {original})", cached.summary);
                cached.source = ResponseSource::Cache;
                cached.execution_time_ms = started.elapsed().as_millis() as u64;
                debug!(query = %query, "served from response cache");
                return cached;
            }
        }

        let detection = self.intent.detect(&query);
        let pipeline = self.orchestrator.pipeline();

        // Fast path: a confident keyword match whose entities all resolved
        // maps straight onto a parameterized plan, no model involved.
        if pipeline.execute_queries && detection.confidence >= pipeline.pattern_route_threshold {
            let extraction = self.orchestrator.resolver().extract(&query).await;
            if extraction.unresolved.is_empty() {
                if let Some(plan) = build_plan(detection.intent, &extraction) {
                    let max_rows = self.orchestrator.max_rows_for(request.max_results);
                    debug!(plan = plan.label(), "routing through structured plan");
                    match self.orchestrator.run_plan(&plan, max_rows, priority).await {
                        Ok(execution) => {
                            let summary = summarize(
                                &execution.rows,
                                execution.truncated,
                                language,
                                detection.intent,
                            );
                            let response = QueryResponse {
                                query: query.clone(),
                                intent: detection.intent,
                                confidence: detection.confidence * extraction.confidence,
                                results: execution.rows,
                                summary,
                                recommendations: None,
                                execution_time_ms: started.elapsed().as_millis() as u64,
                                source: ResponseSource::PatternMatch,
                            };
                            self.cache_success(&cache_key, &response);
                            info!(
                                intent = detection.intent.as_str(),
                                rows = response.results.len(),
                                "answered via pattern route"
                            );
                            return response;
                        }
                        Err(err) => return self.failure(&request, started, &err),
                    }
                }
            }
        }

        let inner = TextToSqlRequest {
            query: query.clone(),
            language: Some(language),
            execute: true,
            max_results: request.max_results,
            caller_id: request.caller_id.clone(),
        };
        let outcome = self.orchestrator.run(&inner, priority).await;
        self.shape(&request, detection.intent, outcome, language, started, &cache_key)
    }

    /// Run up to `max_batch_size` requests. Sequential on purpose: the rate
    /// limiter should see one caller, not a burst of concurrent clones.
    pub async fn process_batch(
        &self,
        requests: Vec<QueryRequest>,
    ) -> Result<Vec<QueryResponse>, AppError> {
        if requests.is_empty() {
            return Err(bad_request("batch contains no requests"));
        }
        let limit = self.orchestrator.pipeline().max_batch_size;
        if requests.len() > limit {
            return Err(bad_request(&format!(
                "batch size {} exceeds the limit of {limit}",
                requests.len()
            )));
        }
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.process_query(request).await);
        }
        Ok(responses)
    }

    /// Map a pipeline outcome onto the response shape. Validation failures
    /// and execution failures become error responses; a validated statement
    /// with execution disabled is still a success.
    fn shape(
        &self,
        request: &QueryRequest,
        intent: QueryIntent,
        outcome: TextToSqlResponse,
        language: Language,
        started: Instant,
        cache_key: &str,
    ) -> QueryResponse {
        if !outcome.validation.is_valid {
            let reason = outcome
                .validation
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "the generated statement failed validation".to_string());
            let mut recommendations = recommendations_for(ErrorCategory::Parsing, language);
            recommendations.extend(outcome.validation.suggestions.iter().cloned());
            return self.failure_with(
                request,
                started,
                format!("Could not build a safe query: {reason}"),
                recommendations,
            );
        }

        match outcome.execution {
            Some(execution) => {
                let summary = summarize(&execution.rows, execution.truncated, language, intent);
                let recommendations = if outcome.validation.suggestions.is_empty() {
                    None
                } else {
                    Some(outcome.validation.suggestions)
                };
                let response = QueryResponse {
                    query: request.query.clone(),
                    intent,
                    confidence: outcome.confidence,
                    results: execution.rows,
                    summary,
                    recommendations,
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    source: outcome.source,
                };
                self.cache_success(cache_key, &response);
                info!(
                    intent = intent.as_str(),
                    source = response.source.as_str(),
                    rows = response.results.len(),
                    "answered via text-to-sql pipeline"
                );
                response
            }
            None => {
                let failed_step = outcome
                    .steps
                    .iter()
                    .find(|s| s.step == "execution")
                    .map(|s| match &s.outcome {
                        StepOutcome::Failure(detail) | StepOutcome::Success(detail) => {
                            detail.clone()
                        }
                    });
                match failed_step {
                    Some(detail) => {
                        // The statement was fine; fetching the data was not.
                        let mut recommendations =
                            recommendations_for(ErrorCategory::Database, language);
                        recommendations.extend(outcome.validation.suggestions.iter().cloned());
                        self.failure_with(request, started, detail, recommendations)
                    }
                    None => {
                        // Execution disabled by configuration or request; the
                        // validated statement itself is the answer.
                        let summary = match language {
                            Language::Japanese => {
                                "クエリを生成・検証しました（実行は無効です）".to_string()
                            }
                            Language::English => {
                                "Query generated and validated; execution is disabled".to_string()
                            }
                        };
                        let recommendations = if outcome.validation.suggestions.is_empty() {
                            None
                        } else {
                            Some(outcome.validation.suggestions)
                        };
                        let response = QueryResponse {
                            query: request.query.clone(),
                            intent,
                            confidence: outcome.confidence,
                            results: Vec::new(),
                            summary,
                            recommendations,
                            execution_time_ms: started.elapsed().as_millis() as u64,
                            source: outcome.source,
                        };
                        self.cache_success(cache_key, &response);
                        response
                    }
                }
            }
        }
    }

    fn failure(&self, request: &QueryRequest, started: Instant, error: &AppError) -> QueryResponse {
        let language = request
            .language
            .unwrap_or_else(|| detect_language(&request.query));
        let category = error.category();
        warn!(error = %error, category = category.as_str(), "query processing failed");
        self.failure_with(
            request,
            started,
            error.to_string(),
            recommendations_for(category, language),
        )
    }

    fn failure_with(
        &self,
        request: &QueryRequest,
        started: Instant,
        summary: String,
        mut recommendations: Vec<String>,
    ) -> QueryResponse {
        let language = request
            .language
            .unwrap_or_else(|| detect_language(&request.query));
        let caller = request.caller_id.as_deref().unwrap_or("anonymous");
        if self.failures.is_repeat(caller, &request.query) {
            recommendations.push(repeat_hint(language));
        }
        self.failures.record(caller, &request.query);
        QueryResponse {
            query: request.query.clone(),
            intent: QueryIntent::Error,
            confidence: 0.0,
            results: Vec::new(),
            summary,
            recommendations: Some(recommendations),
            execution_time_ms: started.elapsed().as_millis() as u64,
            source: ResponseSource::Error,
        }
    }

    fn cache_success(&self, cache_key: &str, response: &QueryResponse) {
        if response.source == ResponseSource::Error {
            return;
        }
        let policy = QueryCache::policy_for(&response.query);
        let mut tags = policy.tags;
        tags.push(response.intent.as_str().to_string());
        match serde_json::to_value(response) {
            Ok(value) => self
                .cache
                .put(RESPONSES_NAMESPACE, cache_key, value, policy.ttl, tags),
            Err(err) => warn!(error = %err, "response not cacheable"),
        }
    }
}

/// Recent failed queries per caller. A new failure that heavily overlaps a
/// remembered one gets an extra hint appended to its recommendations.
struct FailureMemory {
    capacity: usize,
    threshold: f32,
    recent: Mutex<HashMap<String, VecDeque<String>>>,
}

impl FailureMemory {
    fn new(capacity: usize, threshold: f32) -> Self {
        Self {
            capacity,
            threshold,
            recent: Mutex::new(HashMap::new()),
        }
    }

    fn is_repeat(&self, caller: &str, query: &str) -> bool {
        let recent = self.recent.lock().unwrap();
        recent
            .get(caller)
            .map(|history| {
                history
                    .iter()
                    .any(|past| word_overlap(past, query) >= self.threshold)
            })
            .unwrap_or(false)
    }

    fn record(&self, caller: &str, query: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut recent = self.recent.lock().unwrap();
        let history = recent.entry(caller.to_string()).or_default();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(query.to_string());
    }
}

/// Jaccard overlap of word sets. ASCII words plus single CJK characters, so
/// Japanese queries compare without segmentation.
fn word_overlap(a: &str, b: &str) -> f32 {
    let left = word_set(a);
    let right = word_set(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count() as f32;
    let union = left.union(&right).count() as f32;
    shared / union
}

fn word_set(text: &str) -> HashSet<String> {
    let mut words = HashSet::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            current.push(c.to_ascii_lowercase());
        } else {
            if !current.is_empty() {
                words.insert(std::mem::take(&mut current));
            }
            if !c.is_ascii() && !c.is_whitespace() {
                words.insert(c.to_string());
            }
        }
    }
    if !current.is_empty() {
        words.insert(current);
    }
    words
}

fn summarize(rows: &[Value], truncated: bool, language: Language, intent: QueryIntent) -> String {
    if rows.is_empty() {
        return match language {
            Language::Japanese => "該当するデータは見つかりませんでした".to_string(),
            Language::English => "No matching records were found".to_string(),
        };
    }
    if intent == QueryIntent::EquipmentStatus && rows.len() == 1 {
        if let (Some(id), Some(status)) = (
            rows[0].get("equipment_id").and_then(Value::as_str),
            rows[0].get("status").and_then(Value::as_str),
        ) {
            return match language {
                Language::Japanese => format!("{id}の状態は「{status}」です"),
                Language::English => format!("{id} is currently \"{status}\""),
            };
        }
    }
    let mut summary = match language {
        Language::Japanese => format!("{}件の該当データが見つかりました", rows.len()),
        Language::English => {
            if rows.len() == 1 {
                "Found 1 matching record".to_string()
            } else {
                format!("Found {} matching records", rows.len())
            }
        }
    };
    if truncated {
        summary.push_str(&match language {
            Language::Japanese => format!("（先頭{}件のみ表示）", rows.len()),
            Language::English => format!(" (showing the first {})", rows.len()),
        });
    }
    summary
}

fn repeat_hint(language: Language) -> String {
    match language {
        Language::Japanese => {
            "この質問は以前も失敗しています。HX-101のような設備IDを含めると成功しやすくなります".to_string()
        }
        Language::English => {
            "This question has failed before; naming a specific equipment id such as HX-101 \
             usually helps"
                .to_string()
        }
    }
}

fn recommendations_for(category: ErrorCategory, language: Language) -> Vec<String> {
    let english = language == Language::English;
    let lines: &[&str] = match category {
        ErrorCategory::ApiConfig => {
            if english {
                &["Check the LLM provider credentials and endpoint configuration"]
            } else {
                &["LLMプロバイダーの認証情報とエンドポイント設定を確認してください"]
            }
        }
        ErrorCategory::Auth => {
            if english {
                &["Verify the provider credentials and renew them if expired"]
            } else {
                &["プロバイダーの認証情報を確認し、期限切れの場合は更新してください"]
            }
        }
        ErrorCategory::RateLimit => {
            if english {
                &[
                    "Wait a moment and try again",
                    "Lower the request rate or raise the configured limit",
                ]
            } else {
                &[
                    "しばらく待ってから再試行してください",
                    "リクエスト頻度を下げるか、設定の上限を引き上げてください",
                ]
            }
        }
        ErrorCategory::Network => {
            if english {
                &["Retry shortly; the upstream connection failed"]
            } else {
                &["接続に失敗しました。しばらくしてから再試行してください"]
            }
        }
        ErrorCategory::ServerError => {
            if english {
                &["Retry shortly; a backing service is unavailable"]
            } else {
                &["バックエンドサービスが利用できません。しばらくしてから再試行してください"]
            }
        }
        ErrorCategory::Database => {
            if english {
                &["Check the database connection and try again"]
            } else {
                &["データベース接続を確認してから再試行してください"]
            }
        }
        ErrorCategory::Parsing => {
            if english {
                &["Rephrase the question or include a specific equipment id such as HX-101"]
            } else {
                &["質問を言い換えるか、HX-101のような設備IDを含めてください"]
            }
        }
        ErrorCategory::Unknown => {
            if english {
                &["Try rephrasing the question"]
            } else {
                &["質問を言い換えてお試しください"]
            }
        }
    };
    lines.iter().map(|s| s.to_string()).collect()
}
