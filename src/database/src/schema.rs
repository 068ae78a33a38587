//! Static schema catalog.
//!
//! The generation pipeline is grounded on this catalog, not on live
//! introspection: it renders the prompt context block, feeds the
//! validator's table allow-list, and documents the business vocabulary
//! in both query languages.

/// One column of a catalogued table.
#[derive(Debug, Clone, Copy)]
pub struct SchemaColumn {
    pub name: &'static str,
    pub data_type: &'static str,
    pub description: &'static str,
}

/// One catalogued table with bilingual descriptions.
#[derive(Debug, Clone, Copy)]
pub struct SchemaTable {
    pub name: &'static str,
    pub description_en: &'static str,
    pub description_ja: &'static str,
    pub columns: &'static [SchemaColumn],
}

const EQUIPMENT_COLUMNS: &[SchemaColumn] = &[
    SchemaColumn {
        name: "equipment_id",
        data_type: "text",
        description: "Primary key, e.g. HX-101, P-102, TK-201",
    },
    SchemaColumn {
        name: "equipment_name",
        data_type: "text",
        description: "Human-readable name",
    },
    SchemaColumn {
        name: "equipment_type_id",
        data_type: "integer",
        description: "FK to equipment_type_master",
    },
    SchemaColumn {
        name: "system_id",
        data_type: "text",
        description: "Owning plant system, e.g. SYS-001",
    },
    SchemaColumn {
        name: "location",
        data_type: "text",
        description: "Installation area within the plant",
    },
    SchemaColumn {
        name: "manufacturer",
        data_type: "text",
        description: "Vendor name",
    },
    SchemaColumn {
        name: "model",
        data_type: "text",
        description: "Vendor model number",
    },
    SchemaColumn {
        name: "installation_date",
        data_type: "date",
        description: "Commissioning date",
    },
    SchemaColumn {
        name: "status",
        data_type: "text",
        description: "running | stopped | maintenance | alarm",
    },
];

const EQUIPMENT_TYPE_COLUMNS: &[SchemaColumn] = &[
    SchemaColumn {
        name: "equipment_type_id",
        data_type: "integer",
        description: "Primary key",
    },
    SchemaColumn {
        name: "type_name",
        data_type: "text",
        description: "e.g. Heat Exchanger, Pump, Tank, Compressor",
    },
    SchemaColumn {
        name: "description",
        data_type: "text",
        description: "Type description",
    },
];

const MAINTENANCE_HISTORY_COLUMNS: &[SchemaColumn] = &[
    SchemaColumn {
        name: "history_id",
        data_type: "integer",
        description: "Primary key",
    },
    SchemaColumn {
        name: "equipment_id",
        data_type: "text",
        description: "FK to equipment",
    },
    SchemaColumn {
        name: "work_date",
        data_type: "date",
        description: "Date the work was performed",
    },
    SchemaColumn {
        name: "work_type",
        data_type: "text",
        description: "inspection | repair | replacement | overhaul",
    },
    SchemaColumn {
        name: "work_description",
        data_type: "text",
        description: "What was done",
    },
    SchemaColumn {
        name: "technician",
        data_type: "text",
        description: "Who performed the work",
    },
    SchemaColumn {
        name: "duration_hours",
        data_type: "double precision",
        description: "Labor hours",
    },
    SchemaColumn {
        name: "cost",
        data_type: "double precision",
        description: "Total cost in plant currency",
    },
    SchemaColumn {
        name: "parts_replaced",
        data_type: "text",
        description: "Comma-separated part list, nullable",
    },
];

const RISK_ASSESSMENT_COLUMNS: &[SchemaColumn] = &[
    SchemaColumn {
        name: "assessment_id",
        data_type: "integer",
        description: "Primary key",
    },
    SchemaColumn {
        name: "equipment_id",
        data_type: "text",
        description: "FK to equipment",
    },
    SchemaColumn {
        name: "assessment_date",
        data_type: "date",
        description: "When the assessment was made",
    },
    SchemaColumn {
        name: "severity",
        data_type: "integer",
        description: "1-10",
    },
    SchemaColumn {
        name: "occurrence",
        data_type: "integer",
        description: "1-10",
    },
    SchemaColumn {
        name: "detection",
        data_type: "integer",
        description: "1-10",
    },
    SchemaColumn {
        name: "risk_score",
        data_type: "integer",
        description: "severity * occurrence * detection (RPN)",
    },
    SchemaColumn {
        name: "risk_level",
        data_type: "text",
        description: "low | medium | high | critical",
    },
    SchemaColumn {
        name: "risk_factors",
        data_type: "text",
        description: "Identified failure modes",
    },
    SchemaColumn {
        name: "mitigation_measures",
        data_type: "text",
        description: "Planned countermeasures",
    },
];

const MAINTENANCE_SCHEDULE_COLUMNS: &[SchemaColumn] = &[
    SchemaColumn {
        name: "schedule_id",
        data_type: "integer",
        description: "Primary key",
    },
    SchemaColumn {
        name: "equipment_id",
        data_type: "text",
        description: "FK to equipment",
    },
    SchemaColumn {
        name: "scheduled_date",
        data_type: "date",
        description: "Planned work date",
    },
    SchemaColumn {
        name: "work_type",
        data_type: "text",
        description: "inspection | repair | replacement | overhaul",
    },
    SchemaColumn {
        name: "priority",
        data_type: "text",
        description: "high | medium | low",
    },
    SchemaColumn {
        name: "assigned_to",
        data_type: "text",
        description: "Responsible technician or team",
    },
    SchemaColumn {
        name: "status",
        data_type: "text",
        description: "planned | in_progress | done | overdue",
    },
];

const PARAMETER_MASTER_COLUMNS: &[SchemaColumn] = &[
    SchemaColumn {
        name: "parameter_id",
        data_type: "text",
        description: "Primary key, e.g. TI-101-01, VI-100-01, FI-100-01",
    },
    SchemaColumn {
        name: "parameter_name",
        data_type: "text",
        description: "Measurement point name",
    },
    SchemaColumn {
        name: "parameter_type",
        data_type: "text",
        description: "temperature | vibration | flow | pressure",
    },
    SchemaColumn {
        name: "equipment_id",
        data_type: "text",
        description: "FK to equipment",
    },
    SchemaColumn {
        name: "unit",
        data_type: "text",
        description: "Engineering unit",
    },
    SchemaColumn {
        name: "normal_min",
        data_type: "double precision",
        description: "Lower bound of the normal band",
    },
    SchemaColumn {
        name: "normal_max",
        data_type: "double precision",
        description: "Upper bound of the normal band",
    },
];

const PROCESS_DATA_COLUMNS: &[SchemaColumn] = &[
    SchemaColumn {
        name: "data_id",
        data_type: "bigint",
        description: "Primary key",
    },
    SchemaColumn {
        name: "parameter_id",
        data_type: "text",
        description: "FK to parameter_master",
    },
    SchemaColumn {
        name: "measured_at",
        data_type: "timestamptz",
        description: "Measurement timestamp",
    },
    SchemaColumn {
        name: "value",
        data_type: "double precision",
        description: "Measured value",
    },
    SchemaColumn {
        name: "quality",
        data_type: "text",
        description: "good | uncertain | bad",
    },
];

const TABLES: &[SchemaTable] = &[
    SchemaTable {
        name: "equipment",
        description_en: "Equipment master: every physical asset in the plant",
        description_ja: "設備マスタ（プラント内の全設備）",
        columns: EQUIPMENT_COLUMNS,
    },
    SchemaTable {
        name: "equipment_type_master",
        description_en: "Equipment type reference",
        description_ja: "設備種別マスタ",
        columns: EQUIPMENT_TYPE_COLUMNS,
    },
    SchemaTable {
        name: "maintenance_history",
        description_en: "Completed maintenance work records",
        description_ja: "保全履歴（実施済み作業）",
        columns: MAINTENANCE_HISTORY_COLUMNS,
    },
    SchemaTable {
        name: "equipment_risk_assessment",
        description_en: "Risk assessments (RPN) per equipment",
        description_ja: "設備リスク評価（RPN）",
        columns: RISK_ASSESSMENT_COLUMNS,
    },
    SchemaTable {
        name: "maintenance_schedule",
        description_en: "Planned maintenance work",
        description_ja: "保全計画",
        columns: MAINTENANCE_SCHEDULE_COLUMNS,
    },
    SchemaTable {
        name: "parameter_master",
        description_en: "Process measurement point reference",
        description_ja: "プロセスパラメータマスタ",
        columns: PARAMETER_MASTER_COLUMNS,
    },
    SchemaTable {
        name: "process_data",
        description_en: "Time-series process measurements",
        description_ja: "プロセスデータ（時系列計測値）",
        columns: PROCESS_DATA_COLUMNS,
    },
];

/// The catalog facade consumed by the schema provider and the validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaCatalog;

impl SchemaCatalog {
    pub fn new() -> Self {
        SchemaCatalog
    }

    pub fn tables(&self) -> &'static [SchemaTable] {
        TABLES
    }

    pub fn table(&self, name: &str) -> Option<&'static SchemaTable> {
        TABLES.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Table allow-list for SQL validation.
    pub fn allowed_tables(&self) -> Vec<&'static str> {
        TABLES.iter().map(|t| t.name).collect()
    }

    /// Render the schema grounding block for generation prompts.
    pub fn schema_context_text(&self) -> String {
        let mut out = String::from("Database schema (PostgreSQL, read-only):\n");
        for table in TABLES {
            out.push_str(&format!(
                "\nTABLE {} -- {} / {}\n",
                table.name, table.description_en, table.description_ja
            ));
            for column in table.columns {
                out.push_str(&format!(
                    "  {} {} -- {}\n",
                    column.name, column.data_type, column.description
                ));
            }
        }
        out
    }

    /// Bilingual business vocabulary included in prompts so the model
    /// maps plant terminology onto the schema.
    pub fn business_vocabulary(&self) -> &'static str {
        "Business vocabulary:\n\
         - equipment / 設備: a physical asset, identified like HX-101 (heat exchanger), P-102 (pump), TK-201 (tank)\n\
         - system / 系統: a plant subsystem, identified like SYS-001\n\
         - parameter / パラメータ: a measured point, identified like TI-101-01 (temperature), VI-100-01 (vibration), FI-100-01 (flow)\n\
         - maintenance / 保全・メンテナンス: inspection (点検), repair (修理), replacement (交換), overhaul (オーバーホール)\n\
         - risk score / リスクスコア: RPN = severity x occurrence x detection\n\
         - status / 状態: running (稼働中), stopped (停止中), maintenance (整備中), alarm (警報)\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_all_tables() {
        let catalog = SchemaCatalog::new();
        let allowed = catalog.allowed_tables();
        assert_eq!(allowed.len(), 7);
        assert!(allowed.contains(&"equipment"));
        assert!(allowed.contains(&"process_data"));
    }

    #[test]
    fn table_lookup_is_case_insensitive() {
        let catalog = SchemaCatalog::new();
        assert!(catalog.table("EQUIPMENT").is_some());
        assert!(catalog.table("no_such_table").is_none());
    }

    #[test]
    fn context_text_mentions_every_table_and_key_columns() {
        let catalog = SchemaCatalog::new();
        let text = catalog.schema_context_text();
        for table in catalog.tables() {
            assert!(text.contains(table.name), "missing table {}", table.name);
        }
        assert!(text.contains("equipment_id"));
        assert!(text.contains("risk_score"));
    }
}
