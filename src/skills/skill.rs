//! Skill trait and the types crossing its boundary.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::skills::context::SkillContext;
use crate::skills::error::SkillError;

/// A field-scoped validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending input field.
    pub field: String,
    pub message: String,
    /// Machine-readable code, e.g. `REQUIRED`.
    pub code: String,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, "is required", "REQUIRED")
    }
}

/// Outcome of a skill's pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// Valid iff `errors` is empty.
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid && self.errors.is_empty()
    }

    /// `field: message (code); ...` for every error.
    pub fn summary(&self) -> String {
        if self.errors.is_empty() && !self.valid {
            return "Input is invalid".to_string();
        }
        self.errors
            .iter()
            .map(|e| format!("{}: {} ({})", e.field, e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Token and cost counters for AI-backed skills.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Decimal,
}

impl AiUsage {
    pub fn add(&mut self, other: &AiUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.cost_usd.is_zero()
    }
}

/// Metadata attached to every skill result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub skill_name: String,
    pub version: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_usage: Option<AiUsage>,
}

impl SkillMetadata {
    pub fn new(skill_name: impl Into<String>, version: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            skill_name: skill_name.into(),
            version: version.into(),
            duration_ms,
            ai_usage: None,
        }
    }
}

/// Exactly one of data or error.
#[derive(Debug, Clone, PartialEq)]
pub enum SkillOutcome {
    Success { data: serde_json::Value },
    Failure { error: SkillError },
}

/// Uniform return envelope of [`Skill::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct SkillResult {
    pub outcome: SkillOutcome,
    pub metadata: SkillMetadata,
}

impl SkillResult {
    pub fn success(data: serde_json::Value, metadata: SkillMetadata) -> Self {
        Self {
            outcome: SkillOutcome::Success { data },
            metadata,
        }
    }

    pub fn failure(error: SkillError, metadata: SkillMetadata) -> Self {
        Self {
            outcome: SkillOutcome::Failure { error },
            metadata,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SkillOutcome::Success { .. })
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            SkillOutcome::Success { data } => Some(data),
            SkillOutcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&SkillError> {
        match &self.outcome {
            SkillOutcome::Success { .. } => None,
            SkillOutcome::Failure { error } => Some(error),
        }
    }
}

impl Serialize for SkillResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SkillResult", 3)?;
        state.serialize_field("success", &self.is_success())?;
        match &self.outcome {
            SkillOutcome::Success { data } => state.serialize_field("data", data)?,
            SkillOutcome::Failure { error } => state.serialize_field("error", error)?,
        }
        state.serialize_field("metadata", &self.metadata)?;
        state.end()
    }
}

/// Name, version and description, as listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// A named, versioned unit of business logic the worker can run.
///
/// The worker and the orchestrator only ever see `dyn Skill`.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// Semantic version.
    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// Pure, fast pre-flight check. `execute` is never called when this is invalid.
    fn validate(&self, ctx: &SkillContext) -> ValidationResult;

    /// Run the skill. Failures come back inside the result, never as a panic.
    async fn execute(&self, ctx: &SkillContext) -> SkillResult;

    fn descriptor(&self) -> SkillDescriptor {
        SkillDescriptor {
            name: self.name().to_string(),
            version: self.version().to_string(),
            description: self.description().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn result_serializes_exactly_one_payload() {
        let meta = SkillMetadata::new("bulk-subscription", "1.0.0", 4);
        let ok = serde_json::to_value(SkillResult::success(
            serde_json::json!({"x": 1}),
            meta.clone(),
        ))
        .unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"]["x"], 1);
        assert!(ok.get("error").is_none());

        let failed =
            serde_json::to_value(SkillResult::failure(SkillError::cancelled(), meta)).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"]["code"], "Cancelled");
        assert!(failed.get("data").is_none());
    }

    #[test]
    fn validation_result_validity_tracks_errors() {
        assert!(ValidationResult::ok().is_valid());
        let invalid = ValidationResult::from_errors(vec![FieldError::required("units")]);
        assert!(!invalid.is_valid());
        assert_eq!(invalid.summary(), "units: is required (REQUIRED)");
    }

    #[test]
    fn usage_accumulates() {
        let mut total = AiUsage::default();
        assert!(total.is_empty());
        total.add(&AiUsage {
            input_tokens: 100,
            output_tokens: 20,
            cost_usd: dec!(0.0006),
        });
        total.add(&AiUsage {
            input_tokens: 50,
            output_tokens: 5,
            cost_usd: dec!(0.0002),
        });
        assert_eq!(total.input_tokens, 150);
        assert_eq!(total.output_tokens, 25);
        assert_eq!(total.cost_usd, dec!(0.0008));
    }
}
