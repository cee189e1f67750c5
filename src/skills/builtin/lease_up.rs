//! Lease-up detection and stabilized budget projection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::formulas::{FormulaConfig, round_to};
use crate::skills::base::SkillLogic;
use crate::skills::context::SkillContext;
use crate::skills::error::SkillError;
use crate::skills::input::FieldChecks;
use crate::skills::skill::ValidationResult;

pub const NAME: &str = "lease-up-detection";

pub struct LeaseUpDetection;

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseUpInput {
    #[serde(default)]
    pub status: Option<String>,
    pub occupancy_pct: f64,
    pub monthly_cost: f64,
    #[serde(default)]
    pub target_occupancy_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseUpAssessment {
    pub is_lease_up: bool,
    pub occupancy_pct: f64,
    /// Status says lease-up but occupancy is already at or above the threshold.
    pub status_inconsistent: bool,
    pub current_monthly_cost: f64,
    pub target_occupancy_pct: f64,
    /// Monthly cost once the property reaches the target occupancy.
    pub projected_monthly_cost: f64,
    pub warnings: Vec<String>,
}

fn is_lease_up_status(status: Option<&str>) -> bool {
    status.is_some_and(|s| {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        normalized == "leaseup"
    })
}

pub fn assess(input: &LeaseUpInput, config: &FormulaConfig) -> LeaseUpAssessment {
    let explicit = is_lease_up_status(input.status.as_deref());
    let below_threshold = input.occupancy_pct < config.lease_up_occupancy_threshold_pct;
    let status_inconsistent = explicit && !below_threshold;
    let target = input
        .target_occupancy_pct
        .unwrap_or(config.stabilized_occupancy_pct);

    let mut warnings = Vec::new();
    if status_inconsistent {
        warnings.push(format!(
            "Lease-up status inconsistent with occupancy >= {}%",
            config.lease_up_occupancy_threshold_pct
        ));
    }
    if !explicit && below_threshold {
        warnings.push(format!(
            "Occupancy {}% is below {}%; treating property as in lease-up",
            input.occupancy_pct, config.lease_up_occupancy_threshold_pct
        ));
    }

    let is_lease_up = explicit || below_threshold;
    let projected = if is_lease_up && input.occupancy_pct > 0.0 {
        input.monthly_cost / input.occupancy_pct * target
    } else {
        input.monthly_cost
    };

    LeaseUpAssessment {
        is_lease_up,
        occupancy_pct: input.occupancy_pct,
        status_inconsistent,
        current_monthly_cost: input.monthly_cost,
        target_occupancy_pct: target,
        projected_monthly_cost: round_to(projected, 2),
        warnings,
    }
}

#[async_trait]
impl SkillLogic for LeaseUpDetection {
    type Output = LeaseUpAssessment;

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Detects properties in lease-up and projects their stabilized waste budget"
    }

    fn validate(&self, ctx: &SkillContext) -> ValidationResult {
        let mut checks = FieldChecks::new(&ctx.input);
        checks.within("occupancy_pct", 0.0, 100.0);
        checks.non_negative("monthly_cost");
        if let Some(target) = checks.optional_number("target_occupancy_pct")
            && !(target > 0.0 && target <= 100.0)
        {
            checks.push(crate::skills::skill::FieldError::new(
                "target_occupancy_pct",
                "must be between 0 and 100",
                "OUT_OF_RANGE",
            ));
        }
        checks.finish()
    }

    async fn run(&self, ctx: &SkillContext) -> Result<LeaseUpAssessment, SkillError> {
        let input: LeaseUpInput = ctx.input_as()?;
        let assessment = assess(&input, &ctx.config);
        ctx.progress.report(100, "Lease-up assessment complete");
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(status: &str, occupancy: f64) -> LeaseUpInput {
        LeaseUpInput {
            status: Some(status.to_string()),
            occupancy_pct: occupancy,
            monthly_cost: 8_000.0,
            target_occupancy_pct: None,
        }
    }

    #[test]
    fn lease_up_projects_stabilized_budget() {
        let result = assess(&input("lease-up", 80.0), &FormulaConfig::canonical());
        assert!(result.is_lease_up);
        assert!(!result.status_inconsistent);
        assert_eq!(result.projected_monthly_cost, 9_500.0);
    }

    #[test]
    fn stabilized_keeps_current_cost() {
        let result = assess(&input("stabilized", 94.0), &FormulaConfig::canonical());
        assert!(!result.is_lease_up);
        assert_eq!(result.projected_monthly_cost, 8_000.0);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn inconsistent_status_is_flagged() {
        let result = assess(&input("Lease Up", 93.0), &FormulaConfig::canonical());
        assert!(result.status_inconsistent);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn low_occupancy_implies_lease_up() {
        let mut low = input("stabilized", 60.0);
        low.target_occupancy_pct = Some(90.0);
        let result = assess(&low, &FormulaConfig::canonical());
        assert!(result.is_lease_up);
        assert_eq!(result.projected_monthly_cost, 12_000.0);
    }
}
