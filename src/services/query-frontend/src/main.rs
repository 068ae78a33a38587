//! Query frontend binary: configuration loading, component wiring, the
//! HTTP surface, and background maintenance tasks.

use axum::{
    extract::{Path, State},
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use cmms_database::{DatabaseManager, QueryGuard, SchemaCatalog};
use cmms_shared::{
    EntityExtraction, QueryIntent, QueryRequest, QueryResponse, ServiceResilienceConfig,
    ValidationResult,
};

use query_frontend_service::cache::CacheNamespaceStats;
use query_frontend_service::context::ContextBuilder;
use query_frontend_service::error::{bad_request, not_found};
use query_frontend_service::examples_bank::ExampleBank;
use query_frontend_service::resilience::{ResilienceSnapshot, ServiceResilienceStatus};
use query_frontend_service::{
    Config, EntityResolver, LLMClient, MasterDataCache, QueryCache, QueryOrchestrator,
    QueryProcessor, ResilienceManager, Result, SqlGenerator, SqlValidator, DATABASE_SERVICE,
    LLM_SERVICE,
};

/// Shared application state for all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    processor: Arc<QueryProcessor>,
    resolver: Arc<EntityResolver>,
    validator: Arc<SqlValidator>,
    guard: QueryGuard,
    resilience: Arc<ResilienceManager>,
    cache: Arc<QueryCache>,
    health: Arc<tokio::sync::RwLock<HealthStatus>>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: DateTime<Utc>,
    database_status: String,
    llm_status: String,
    version: String,
    instance_id: Uuid,
    uptime_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "query_frontend={},tower_http=debug",
                    config.log_level
                ))
            }),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "starting query frontend service"
    );
    config.validate()?;
    let config = Arc::new(config);

    // The database is a hard dependency; refuse to start without it.
    let database = Arc::new(DatabaseManager::new(&config.database).await?);
    info!("database connection pool ready");

    let resilience = Arc::new(ResilienceManager::new(config.resilience.clone()));
    let cache = Arc::new(QueryCache::new(config.cache.clone()));

    let master = Arc::new(MasterDataCache::new(
        Arc::new(database.master_data_source()),
        config.cache.master_data_ttl(),
    ));
    if let Err(err) = master.refresh().await {
        warn!(
            error = %err,
            "master data warm-up failed; resolution uses an empty snapshot until the next refresh"
        );
    }

    let resolver = Arc::new(EntityResolver::new(
        master,
        config.pipeline.fuzzy_match_threshold,
    ));
    let generator = Arc::new(SqlGenerator::new(
        &config.llm,
        resilience.clone(),
        ContextBuilder::new(SchemaCatalog::new()),
        &config.pipeline,
    )?);
    let orchestrator = Arc::new(
        QueryOrchestrator::new(
            resolver.clone(),
            generator,
            SqlValidator::new(
                SchemaCatalog::new(),
                config.pipeline.default_limit,
                config.pipeline.max_result_rows,
            ),
            resilience.clone(),
            config.pipeline.clone(),
        )
        .with_database(database.repository(), database.query_guard()),
    );
    let processor = Arc::new(QueryProcessor::new(orchestrator, cache.clone()));

    let health = Arc::new(tokio::sync::RwLock::new(HealthStatus {
        status: "starting".to_string(),
        timestamp: Utc::now(),
        database_status: "connected".to_string(),
        llm_status: if config.llm.has_credentials() {
            "configured"
        } else {
            "unconfigured"
        }
        .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: Uuid::new_v4(),
        uptime_seconds: 0,
    }));

    let state = AppState {
        config: config.clone(),
        processor,
        resolver,
        validator: Arc::new(SqlValidator::new(
            SchemaCatalog::new(),
            config.pipeline.default_limit,
            config.pipeline.max_result_rows,
        )),
        guard: database.query_guard(),
        resilience: resilience.clone(),
        cache: cache.clone(),
        health: health.clone(),
    };

    spawn_health_monitor(config.clone(), database, health);

    // Promote queued rate-limited work as windows roll over.
    {
        let resilience = resilience.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                resilience.drain_queues();
            }
        });
    }

    // Evict expired cache entries that lazy expiry never touches.
    {
        let cache = cache.clone();
        let sweep_interval = config.cache.sweep_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval);
            loop {
                tick.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    info!(removed, "cache sweep removed expired entries");
                }
            }
        });
    }

    let app = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "query frontend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("query frontend stopped");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);

    Router::new()
        .route("/health", get(health_check))
        .route("/v1/query", post(process_query))
        .route("/v1/query/batch", post(process_batch))
        .route("/v1/query/validate", post(validate_sql))
        .route("/v1/entities/extract", post(extract_entities))
        .route("/v1/capabilities", get(get_capabilities))
        .route("/v1/admin/resilience", get(resilience_snapshot))
        .route("/v1/admin/resilience/:service", put(update_resilience))
        .route("/v1/admin/cache/stats", get(cache_stats))
        .route("/v1/admin/cache/invalidate", post(invalidate_cache))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(middleware::from_fn(request_logging_middleware)),
        )
        .with_state(state)
}

/// Periodic dependency probes behind the `/health` report. The LLM probe
/// only runs when credentials are configured; template and fallback tiers
/// keep the service useful without one.
fn spawn_health_monitor(
    config: Arc<Config>,
    database: Arc<DatabaseManager>,
    health: Arc<tokio::sync::RwLock<HealthStatus>>,
) {
    let llm = if config.llm.has_credentials() {
        match LLMClient::new(&config.llm) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "health probe LLM client unavailable");
                None
            }
        }
    } else {
        None
    };
    let started_at = Instant::now();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        loop {
            tick.tick().await;

            let database_ok = match database.health_check().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "database health check failed");
                    false
                }
            };
            let llm_status = match &llm {
                None => "unconfigured",
                Some(client) => match client.health_check().await {
                    Ok(()) => "connected",
                    Err(err) => {
                        warn!(error = %err, "llm health check failed");
                        "unreachable"
                    }
                },
            };

            let degraded = !database_ok || llm_status == "unreachable";
            let mut status = health.write().await;
            status.status = if degraded { "degraded" } else { "healthy" }.to_string();
            status.timestamp = Utc::now();
            status.database_status = if database_ok {
                "connected"
            } else {
                "disconnected"
            }
            .to_string();
            status.llm_status = llm_status.to_string();
            status.uptime_seconds = started_at.elapsed().as_secs();
        }
    });
}

async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let health = state.health.read().await;
    Json(health.clone())
}

async fn process_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    Json(state.processor.process_query(request).await)
}

#[derive(Debug, Deserialize)]
struct BatchQueryRequest {
    requests: Vec<QueryRequest>,
}

#[derive(Debug, Serialize)]
struct BatchQueryResponse {
    total: usize,
    succeeded: usize,
    failed: usize,
    responses: Vec<QueryResponse>,
}

async fn process_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchQueryRequest>,
) -> Result<Json<BatchQueryResponse>> {
    let responses = state.processor.process_batch(request.requests).await?;
    let failed = responses
        .iter()
        .filter(|r| r.intent == QueryIntent::Error)
        .count();
    Ok(Json(BatchQueryResponse {
        total: responses.len(),
        succeeded: responses.len() - failed,
        failed,
        responses,
    }))
}

#[derive(Debug, Deserialize)]
struct ValidateSqlRequest {
    sql: String,
}

async fn validate_sql(
    State(state): State<AppState>,
    Json(request): Json<ValidateSqlRequest>,
) -> Result<Json<ValidationResult>> {
    if request.sql.trim().is_empty() {
        return Err(bad_request("sql text is empty"));
    }
    let result = state.validator.validate(&request.sql, Some(&state.guard)).await;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ExtractEntitiesRequest {
    query: String,
}

async fn extract_entities(
    State(state): State<AppState>,
    Json(request): Json<ExtractEntitiesRequest>,
) -> Result<Json<EntityExtraction>> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query text is empty"));
    }
    Ok(Json(state.resolver.extract(&request.query).await))
}

#[derive(Debug, Serialize)]
struct CapabilitiesResponse {
    version: String,
    supported_intents: Vec<&'static str>,
    languages: Vec<&'static str>,
    tables: Vec<&'static str>,
    example_count: usize,
}

async fn get_capabilities() -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        supported_intents: vec![
            QueryIntent::EquipmentStatus.as_str(),
            QueryIntent::EquipmentList.as_str(),
            QueryIntent::MaintenanceHistory.as_str(),
            QueryIntent::RiskAssessment.as_str(),
            QueryIntent::MaintenanceSchedule.as_str(),
            QueryIntent::ParameterMonitoring.as_str(),
        ],
        languages: vec!["en", "ja"],
        tables: SchemaCatalog::new().allowed_tables(),
        example_count: ExampleBank::new().len(),
    })
}

async fn resilience_snapshot(State(state): State<AppState>) -> Json<ResilienceSnapshot> {
    Json(state.resilience.snapshot())
}

async fn update_resilience(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(update): Json<ServiceResilienceConfig>,
) -> Result<Json<ServiceResilienceStatus>> {
    if service != LLM_SERVICE && service != DATABASE_SERVICE {
        return Err(not_found(&format!("resilience profile '{}'", service)));
    }
    let status = state.resilience.apply_update(&service, update);
    info!(service = %service, "resilience settings updated");
    Ok(Json(status))
}

async fn cache_stats(State(state): State<AppState>) -> Json<Vec<CacheNamespaceStats>> {
    Json(state.cache.stats())
}

#[derive(Debug, Deserialize)]
struct InvalidateCacheRequest {
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Serialize)]
struct InvalidateCacheResponse {
    removed: usize,
}

/// Drop cache entries by tag or by whole namespace. Tag wins when both
/// are supplied.
async fn invalidate_cache(
    State(state): State<AppState>,
    Json(request): Json<InvalidateCacheRequest>,
) -> Result<Json<InvalidateCacheResponse>> {
    let removed = match (request.tag, request.namespace) {
        (Some(tag), _) => state.cache.invalidate_tag(&tag),
        (None, Some(namespace)) => state.cache.invalidate_namespace(&namespace),
        (None, None) => {
            return Err(bad_request("provide a tag or a namespace to invalidate"));
        }
    };
    Ok(Json(InvalidateCacheResponse { removed }))
}

// Request logging middleware
async fn request_logging_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> impl axum::response::IntoResponse {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start_time = Instant::now();

    let response = next.run(req).await;

    let duration = start_time.elapsed();
    info!(
        "{} {} - {:?} - {}ms",
        method,
        uri,
        response.status(),
        duration.as_millis()
    );

    response
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("shutdown signal received");
}
