//! Typed skill failures.

use serde::{Deserialize, Serialize};

use crate::formulas::FormulaDrift;
use crate::skills::skill::ValidationResult;

/// Failure taxonomy shared by every skill.
///
/// The serialized form of each variant is the stable code exposed through
/// the job status interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkillErrorKind {
    /// Pre-flight input check failed. Never retried.
    #[serde(rename = "ValidationError")]
    Validation,
    /// A required input collection is empty or too small.
    InsufficientData,
    /// No skill registered under the requested name.
    SkillNotFound,
    /// Formula configuration drifted from the canonical values.
    FormulaMismatch,
    /// Cooperative cancellation.
    Cancelled,
    /// Anything unexpected, including panics inside a skill.
    #[serde(rename = "SkillExecutionError")]
    Execution,
}

impl SkillErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::InsufficientData => "InsufficientData",
            Self::SkillNotFound => "SkillNotFound",
            Self::FormulaMismatch => "FormulaMismatch",
            Self::Cancelled => "Cancelled",
            Self::Execution => "SkillExecutionError",
        }
    }
}

impl std::fmt::Display for SkillErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A skill failure: kind, human-readable message and optional structured details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SkillError {
    #[serde(rename = "code")]
    pub kind: SkillErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SkillError {
    pub fn new(kind: SkillErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Build a validation failure whose message lists every field error.
    pub fn validation(result: &ValidationResult) -> Self {
        let details = serde_json::to_value(&result.errors).ok();
        Self {
            kind: SkillErrorKind::Validation,
            message: result.summary(),
            details,
        }
    }

    pub fn insufficient_data(collection: &str, message: impl Into<String>) -> Self {
        Self::new(SkillErrorKind::InsufficientData, message)
            .with_details(serde_json::json!({ "collection": collection }))
    }

    pub fn not_found(skill_name: &str) -> Self {
        Self::new(
            SkillErrorKind::SkillNotFound,
            format!("Skill '{skill_name}' is not registered"),
        )
    }

    pub fn formula_mismatch(drift: &[FormulaDrift]) -> Self {
        let fields: Vec<&str> = drift.iter().map(|d| d.field).collect();
        Self::new(
            SkillErrorKind::FormulaMismatch,
            format!(
                "Formula configuration differs from canonical values: {}",
                fields.join(", ")
            ),
        )
        .with_details(serde_json::json!({ "drift": drift }))
    }

    pub fn cancelled() -> Self {
        Self::new(SkillErrorKind::Cancelled, "Execution was cancelled")
    }

    pub fn execution(skill_name: &str, message: impl std::fmt::Display) -> Self {
        Self::new(
            SkillErrorKind::Execution,
            format!("Skill '{skill_name}' failed: {message}"),
        )
        .with_details(serde_json::json!({ "skill": skill_name }))
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == SkillErrorKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::skill::FieldError;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SkillErrorKind::Validation.code(), "ValidationError");
        assert_eq!(SkillErrorKind::Execution.code(), "SkillExecutionError");
        assert_eq!(
            serde_json::to_value(SkillErrorKind::Execution).unwrap(),
            "SkillExecutionError"
        );
        assert_eq!(
            serde_json::to_value(SkillErrorKind::InsufficientData).unwrap(),
            "InsufficientData"
        );
    }

    #[test]
    fn serializes_kind_as_code() {
        let json = serde_json::to_value(SkillError::not_found("nope")).unwrap();
        assert_eq!(json["code"], "SkillNotFound");
        assert_eq!(json["message"], "Skill 'nope' is not registered");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn validation_message_joins_fields() {
        let result = ValidationResult::from_errors(vec![
            FieldError::new("units", "must be positive", "OUT_OF_RANGE"),
            FieldError::new("property.name", "is required", "REQUIRED"),
        ]);
        let err = SkillError::validation(&result);
        assert_eq!(err.kind, SkillErrorKind::Validation);
        assert_eq!(
            err.message,
            "units: must be positive (OUT_OF_RANGE); property.name: is required (REQUIRED)"
        );
        assert_eq!(err.details.unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            SkillError::cancelled().to_string(),
            "Cancelled: Execution was cancelled"
        );
    }
}
