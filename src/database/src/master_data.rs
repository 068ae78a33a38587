//! Reference-data source for the entity resolver.
//!
//! A trait seam so the resolver's cache can be fed from Postgres in
//! production and from an in-memory stub in tests.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DatabaseError;

/// A snapshot of the reference identifiers the resolver matches against.
#[derive(Debug, Clone, Default)]
pub struct MasterData {
    pub equipment_ids: Vec<String>,
    pub system_ids: Vec<String>,
    pub parameter_ids: Vec<String>,
    /// equipment_id -> equipment_name, used for summaries.
    pub equipment_names: HashMap<String, String>,
}

#[async_trait]
pub trait MasterDataSource: Send + Sync {
    async fn load(&self) -> Result<MasterData, DatabaseError>;
}

/// Production source reading the master tables.
#[derive(Clone)]
pub struct PgMasterDataSource {
    pool: Arc<PgPool>,
}

impl PgMasterDataSource {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MasterDataSource for PgMasterDataSource {
    async fn load(&self) -> Result<MasterData, DatabaseError> {
        let equipment_rows =
            sqlx::query("SELECT equipment_id, equipment_name FROM equipment ORDER BY equipment_id")
                .fetch_all(&*self.pool)
                .await?;

        let mut equipment_ids = Vec::with_capacity(equipment_rows.len());
        let mut equipment_names = HashMap::with_capacity(equipment_rows.len());
        for row in &equipment_rows {
            let id: String = row
                .try_get("equipment_id")
                .map_err(|e| DatabaseError::Decode(e.to_string()))?;
            let name: String = row
                .try_get("equipment_name")
                .map_err(|e| DatabaseError::Decode(e.to_string()))?;
            equipment_names.insert(id.clone(), name);
            equipment_ids.push(id);
        }

        let system_rows =
            sqlx::query("SELECT DISTINCT system_id FROM equipment ORDER BY system_id")
                .fetch_all(&*self.pool)
                .await?;
        let system_ids = system_rows
            .iter()
            .map(|row| {
                row.try_get::<String, _>("system_id")
                    .map_err(|e| DatabaseError::Decode(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let parameter_rows =
            sqlx::query("SELECT parameter_id FROM parameter_master ORDER BY parameter_id")
                .fetch_all(&*self.pool)
                .await?;
        let parameter_ids = parameter_rows
            .iter()
            .map(|row| {
                row.try_get::<String, _>("parameter_id")
                    .map_err(|e| DatabaseError::Decode(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            equipment = equipment_ids.len(),
            systems = system_ids.len(),
            parameters = parameter_ids.len(),
            "Loaded master data snapshot"
        );

        Ok(MasterData {
            equipment_ids,
            system_ids,
            parameter_ids,
            equipment_names,
        })
    }
}
