//! Structured intent-keyed queries.
//!
//! These parameterized statements are the only data path: the
//! orchestrator maps resolved entities onto a `StructuredQuery`, never
//! onto raw generated SQL. Optional filters use the `$n IS NULL OR`
//! pattern so each intent stays a single prepared statement.

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;

use cmms_shared::types::ExecutionResult;

use crate::error::DatabaseError;
use crate::models::{
    Equipment, MaintenanceRecord, ProcessReading, RiskAssessment, ScheduleEntry,
};

/// A fully-bound, intent-keyed query plan.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredQuery {
    EquipmentById {
        equipment_id: String,
    },
    EquipmentBySystem {
        system_id: String,
    },
    EquipmentByType {
        type_code: i32,
    },
    EquipmentList {
        status: Option<String>,
        location: Option<String>,
    },
    MaintenanceHistory {
        equipment_id: Option<String>,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    },
    RiskAssessments {
        equipment_id: Option<String>,
    },
    UpcomingSchedule {
        equipment_id: Option<String>,
        within_days: i64,
    },
    LatestReadings {
        equipment_id: Option<String>,
        parameter_id: Option<String>,
    },
}

impl StructuredQuery {
    /// Short label used in step telemetry and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            StructuredQuery::EquipmentById { .. } => "equipment_by_id",
            StructuredQuery::EquipmentBySystem { .. } => "equipment_by_system",
            StructuredQuery::EquipmentByType { .. } => "equipment_by_type",
            StructuredQuery::EquipmentList { .. } => "equipment_list",
            StructuredQuery::MaintenanceHistory { .. } => "maintenance_history",
            StructuredQuery::RiskAssessments { .. } => "risk_assessments",
            StructuredQuery::UpcomingSchedule { .. } => "upcoming_schedule",
            StructuredQuery::LatestReadings { .. } => "latest_readings",
        }
    }
}

/// Read-only repository over the CMMS schema.
#[derive(Clone)]
pub struct CmmsRepository {
    pool: Arc<PgPool>,
}

impl CmmsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Run a structured query, capping the result at `max_rows`.
    pub async fn run(
        &self,
        query: &StructuredQuery,
        max_rows: u32,
    ) -> Result<ExecutionResult, DatabaseError> {
        // Fetch one extra row to detect truncation.
        let fetch_limit = i64::from(max_rows) + 1;
        let rows = match query {
            StructuredQuery::EquipmentById { equipment_id } => {
                to_values(self.equipment_by_id(equipment_id).await?)
            }
            StructuredQuery::EquipmentBySystem { system_id } => {
                to_values(self.equipment_by_system(system_id, fetch_limit).await?)
            }
            StructuredQuery::EquipmentByType { type_code } => {
                to_values(self.equipment_by_type(*type_code, fetch_limit).await?)
            }
            StructuredQuery::EquipmentList { status, location } => to_values(
                self.equipment_list(status.as_deref(), location.as_deref(), fetch_limit)
                    .await?,
            ),
            StructuredQuery::MaintenanceHistory {
                equipment_id,
                since,
                until,
            } => to_values(
                self.maintenance_history(equipment_id.as_deref(), *since, *until, fetch_limit)
                    .await?,
            ),
            StructuredQuery::RiskAssessments { equipment_id } => to_values(
                self.risk_assessments(equipment_id.as_deref(), fetch_limit)
                    .await?,
            ),
            StructuredQuery::UpcomingSchedule {
                equipment_id,
                within_days,
            } => to_values(
                self.upcoming_schedule(equipment_id.as_deref(), *within_days, fetch_limit)
                    .await?,
            ),
            StructuredQuery::LatestReadings {
                equipment_id,
                parameter_id,
            } => to_values(
                self.latest_readings(equipment_id.as_deref(), parameter_id.as_deref(), fetch_limit)
                    .await?,
            ),
        };

        let truncated = rows.len() > max_rows as usize;
        let mut rows = rows;
        rows.truncate(max_rows as usize);
        Ok(ExecutionResult {
            row_count: rows.len(),
            rows,
            truncated,
        })
    }

    pub async fn equipment_by_id(
        &self,
        equipment_id: &str,
    ) -> Result<Vec<Equipment>, DatabaseError> {
        let rows = sqlx::query_as::<_, Equipment>(
            r#"
            SELECT equipment_id, equipment_name, equipment_type_id, system_id,
                   location, manufacturer, model, installation_date, status
            FROM equipment
            WHERE equipment_id = $1
            "#,
        )
        .bind(equipment_id)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn equipment_by_system(
        &self,
        system_id: &str,
        limit: i64,
    ) -> Result<Vec<Equipment>, DatabaseError> {
        let rows = sqlx::query_as::<_, Equipment>(
            r#"
            SELECT equipment_id, equipment_name, equipment_type_id, system_id,
                   location, manufacturer, model, installation_date, status
            FROM equipment
            WHERE system_id = $1
            ORDER BY equipment_id
            LIMIT $2
            "#,
        )
        .bind(system_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn equipment_by_type(
        &self,
        type_code: i32,
        limit: i64,
    ) -> Result<Vec<Equipment>, DatabaseError> {
        let rows = sqlx::query_as::<_, Equipment>(
            r#"
            SELECT equipment_id, equipment_name, equipment_type_id, system_id,
                   location, manufacturer, model, installation_date, status
            FROM equipment
            WHERE equipment_type_id = $1
            ORDER BY equipment_id
            LIMIT $2
            "#,
        )
        .bind(type_code)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn equipment_list(
        &self,
        status: Option<&str>,
        location: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Equipment>, DatabaseError> {
        let rows = sqlx::query_as::<_, Equipment>(
            r#"
            SELECT equipment_id, equipment_name, equipment_type_id, system_id,
                   location, manufacturer, model, installation_date, status
            FROM equipment
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR location ILIKE '%' || $2 || '%')
            ORDER BY equipment_id
            LIMIT $3
            "#,
        )
        .bind(status)
        .bind(location)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn maintenance_history(
        &self,
        equipment_id: Option<&str>,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
        limit: i64,
    ) -> Result<Vec<MaintenanceRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, MaintenanceRecord>(
            r#"
            SELECT h.history_id, h.equipment_id, e.equipment_name, h.work_date,
                   h.work_type, h.work_description, h.technician,
                   h.duration_hours, h.cost, h.parts_replaced
            FROM maintenance_history h
            JOIN equipment e ON e.equipment_id = h.equipment_id
            WHERE ($1::text IS NULL OR h.equipment_id = $1)
              AND ($2::date IS NULL OR h.work_date >= $2)
              AND ($3::date IS NULL OR h.work_date <= $3)
            ORDER BY h.work_date DESC
            LIMIT $4
            "#,
        )
        .bind(equipment_id)
        .bind(since)
        .bind(until)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn risk_assessments(
        &self,
        equipment_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RiskAssessment>, DatabaseError> {
        let rows = sqlx::query_as::<_, RiskAssessment>(
            r#"
            SELECT r.assessment_id, r.equipment_id, e.equipment_name,
                   r.assessment_date, r.severity, r.occurrence, r.detection,
                   r.risk_score, r.risk_level, r.risk_factors,
                   r.mitigation_measures
            FROM equipment_risk_assessment r
            JOIN equipment e ON e.equipment_id = r.equipment_id
            WHERE ($1::text IS NULL OR r.equipment_id = $1)
            ORDER BY r.risk_score DESC, r.assessment_date DESC
            LIMIT $2
            "#,
        )
        .bind(equipment_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upcoming_schedule(
        &self,
        equipment_id: Option<&str>,
        within_days: i64,
        limit: i64,
    ) -> Result<Vec<ScheduleEntry>, DatabaseError> {
        let today = Utc::now().date_naive();
        let horizon = today + Duration::days(within_days.max(0));
        let rows = sqlx::query_as::<_, ScheduleEntry>(
            r#"
            SELECT s.schedule_id, s.equipment_id, e.equipment_name,
                   s.scheduled_date, s.work_type, s.priority, s.assigned_to,
                   s.status
            FROM maintenance_schedule s
            JOIN equipment e ON e.equipment_id = s.equipment_id
            WHERE ($1::text IS NULL OR s.equipment_id = $1)
              AND s.scheduled_date BETWEEN $2 AND $3
              AND s.status IN ('planned', 'in_progress', 'overdue')
            ORDER BY s.scheduled_date ASC
            LIMIT $4
            "#,
        )
        .bind(equipment_id)
        .bind(today)
        .bind(horizon)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn latest_readings(
        &self,
        equipment_id: Option<&str>,
        parameter_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ProcessReading>, DatabaseError> {
        let rows = sqlx::query_as::<_, ProcessReading>(
            r#"
            SELECT d.parameter_id, p.parameter_name, p.equipment_id,
                   d.measured_at, d.value, d.quality
            FROM process_data d
            JOIN parameter_master p ON p.parameter_id = d.parameter_id
            WHERE ($1::text IS NULL OR p.equipment_id = $1)
              AND ($2::text IS NULL OR d.parameter_id = $2)
            ORDER BY d.measured_at DESC
            LIMIT $3
            "#,
        )
        .bind(equipment_id)
        .bind(parameter_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows)
    }
}

fn to_values<T: Serialize>(rows: Vec<T>) -> Vec<serde_json::Value> {
    rows.into_iter()
        .filter_map(|row| serde_json::to_value(row).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_query_labels() {
        let query = StructuredQuery::MaintenanceHistory {
            equipment_id: Some("HX-101".to_string()),
            since: None,
            until: None,
        };
        assert_eq!(query.label(), "maintenance_history");
        assert_eq!(
            StructuredQuery::EquipmentList {
                status: None,
                location: None
            }
            .label(),
            "equipment_list"
        );
    }

    #[test]
    fn to_values_serializes_rows() {
        #[derive(Serialize)]
        struct Row {
            equipment_id: &'static str,
        }
        let values = to_values(vec![Row {
            equipment_id: "HX-101",
        }]);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["equipment_id"], "HX-101");
    }
}
