//! Typed row models for the structured query path.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Equipment {
    pub equipment_id: String,
    pub equipment_name: String,
    pub equipment_type_id: i32,
    pub system_id: String,
    pub location: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub status: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MaintenanceRecord {
    pub history_id: i32,
    pub equipment_id: String,
    pub equipment_name: Option<String>,
    pub work_date: NaiveDate,
    pub work_type: String,
    pub work_description: Option<String>,
    pub technician: Option<String>,
    pub duration_hours: Option<f64>,
    pub cost: Option<f64>,
    pub parts_replaced: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RiskAssessment {
    pub assessment_id: i32,
    pub equipment_id: String,
    pub equipment_name: Option<String>,
    pub assessment_date: NaiveDate,
    pub severity: i32,
    pub occurrence: i32,
    pub detection: i32,
    pub risk_score: i32,
    pub risk_level: String,
    pub risk_factors: Option<String>,
    pub mitigation_measures: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScheduleEntry {
    pub schedule_id: i32,
    pub equipment_id: String,
    pub equipment_name: Option<String>,
    pub scheduled_date: NaiveDate,
    pub work_type: String,
    pub priority: String,
    pub assigned_to: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ParameterDef {
    pub parameter_id: String,
    pub parameter_name: String,
    pub parameter_type: String,
    pub equipment_id: String,
    pub unit: Option<String>,
    pub normal_min: Option<f64>,
    pub normal_max: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessReading {
    pub parameter_id: String,
    pub parameter_name: Option<String>,
    pub equipment_id: Option<String>,
    pub measured_at: DateTime<Utc>,
    pub value: f64,
    pub quality: Option<String>,
}
