//! SQL validation findings.

use serde::{Deserialize, Serialize};

/// Classification of a validation finding. Security, syntax, and logic
/// findings may become errors; performance findings stay warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Syntax,
    Security,
    Permission,
    Logic,
    Performance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub error_type: FindingType,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub warning_type: FindingType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Accumulated result of all validation stages.
///
/// `is_valid` holds exactly when `errors` is empty; warnings are
/// reported to the user but never block execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        ValidationResult {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            rewritten_query: None,
            estimated_cost: None,
        }
    }

    /// Confidence contribution used by the orchestrator: clean passes
    /// score 1.0, passes with warnings degrade slightly, failures score
    /// near zero.
    pub fn confidence_score(&self) -> f32 {
        if !self.is_valid {
            return 0.2;
        }
        if self.warnings.is_empty() {
            1.0
        } else {
            (1.0 - 0.05 * self.warnings.len() as f32).max(0.7)
        }
    }

    /// The query to run: the rewritten form when present, else the input.
    pub fn effective_query<'a>(&'a self, original: &'a str) -> &'a str {
        self.rewritten_query.as_deref().unwrap_or(original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passed_result_is_clean() {
        let result = ValidationResult::passed();
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.confidence_score(), 1.0);
    }

    #[test]
    fn warnings_degrade_confidence_but_not_validity() {
        let mut result = ValidationResult::passed();
        result.warnings.push(ValidationWarning {
            warning_type: FindingType::Performance,
            message: "SELECT * returns all columns".to_string(),
            suggestion: Some("List the columns you need".to_string()),
        });
        assert!(result.is_valid);
        assert!(result.confidence_score() < 1.0);
        assert!(result.confidence_score() >= 0.7);
    }

    #[test]
    fn invalid_result_scores_low() {
        let result = ValidationResult {
            is_valid: false,
            errors: vec![ValidationError {
                error_type: FindingType::Security,
                severity: Severity::Critical,
                message: "Mutating keyword DROP is not allowed".to_string(),
                suggestion: None,
            }],
            warnings: vec![],
            suggestions: vec![],
            rewritten_query: None,
            estimated_cost: None,
        };
        assert!(result.confidence_score() < 0.5);
    }

    #[test]
    fn effective_query_prefers_rewrite() {
        let mut result = ValidationResult::passed();
        assert_eq!(result.effective_query("SELECT 1"), "SELECT 1");
        result.rewritten_query = Some("SELECT 1 LIMIT 100".to_string());
        assert_eq!(result.effective_query("SELECT 1"), "SELECT 1 LIMIT 100");
    }
}
