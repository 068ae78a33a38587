//! Database layer for the CMMS query platform
//!
//! PostgreSQL-only: a pooled connection manager, the static schema
//! catalog the generation pipeline is grounded on, typed row models,
//! structured intent-keyed queries (the data path), and a guarded
//! read-only executor used for dry-runs and ad-hoc validation.

pub mod error;
pub mod executor;
pub mod master_data;
pub mod models;
pub mod queries;
pub mod schema;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use cmms_shared::config::DatabaseConfig;

pub use error::DatabaseError;
pub use executor::{DryRunOutcome, QueryGuard};
pub use master_data::{MasterData, MasterDataSource, PgMasterDataSource};
pub use models::{
    Equipment, MaintenanceRecord, ParameterDef, ProcessReading, RiskAssessment, ScheduleEntry,
};
pub use queries::{CmmsRepository, StructuredQuery};
pub use schema::SchemaCatalog;

/// Owns the PostgreSQL pool and hands out the query services built on it.
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Arc<PgPool>,
}

impl DatabaseManager {
    /// Connect and build the pool from configuration.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        tracing::info!("Initializing PostgreSQL connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .connect(&config.url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL pool ready"
        );

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    pub fn repository(&self) -> CmmsRepository {
        CmmsRepository::new(self.pool.clone())
    }

    pub fn query_guard(&self) -> QueryGuard {
        QueryGuard::new(self.pool.clone())
    }

    pub fn master_data_source(&self) -> PgMasterDataSource {
        PgMasterDataSource::new(self.pool.clone())
    }

    /// Cheap liveness probe used by the health monitor.
    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map(|_| ())
            .map_err(DatabaseError::from)
    }
}
