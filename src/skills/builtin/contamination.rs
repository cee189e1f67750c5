//! Contamination charge reduction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::formulas::{FormulaConfig, round_to};
use crate::skills::base::SkillLogic;
use crate::skills::builtin::Recommendation;
use crate::skills::context::SkillContext;
use crate::skills::error::SkillError;
use crate::skills::input::FieldChecks;
use crate::skills::skill::ValidationResult;

pub const NAME: &str = "contamination-reduction";

pub struct ContaminationReduction;

/// Monthly figures.
#[derive(Debug, Clone, Deserialize)]
pub struct ContaminationInput {
    pub contamination_charges: f64,
    pub total_spend: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Program {
    None,
    Light,
    Full,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContaminationPlan {
    pub contamination_rate_pct: f64,
    pub program: Program,
    pub recommendations: Vec<Recommendation>,
}

pub fn plan(input: &ContaminationInput, config: &FormulaConfig) -> ContaminationPlan {
    let rate = if input.total_spend > 0.0 {
        input.contamination_charges / input.total_spend * 100.0
    } else {
        0.0
    };

    if rate <= config.contamination_action_pct {
        return ContaminationPlan {
            contamination_rate_pct: round_to(rate, 2),
            program: Program::None,
            recommendations: Vec::new(),
        };
    }

    let high = rate > config.contamination_high_pct;
    let program = if high && input.contamination_charges > config.contamination_high_charge {
        Program::Full
    } else {
        Program::Light
    };
    let detail = match program {
        Program::Full => {
            "Full contamination reduction: signage, resident education and monthly monitoring; \
             expected 50% charge reduction."
        }
        _ => "Light intervention: signage refresh and resident reminders.",
    };
    let savings_rate = if high {
        config.contamination_full_savings_rate
    } else {
        config.contamination_light_savings_rate
    };

    ContaminationPlan {
        contamination_rate_pct: round_to(rate, 2),
        program,
        recommendations: vec![
            Recommendation::new(NAME, "Contamination Reduction", detail).with_savings(
                round_to(input.contamination_charges * savings_rate, 2),
                config.months_per_year,
            ),
        ],
    }
}

#[async_trait]
impl SkillLogic for ContaminationReduction {
    type Output = ContaminationPlan;

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Sizes a contamination reduction program from the share of spend lost to contamination charges"
    }

    fn validate(&self, ctx: &SkillContext) -> ValidationResult {
        let mut checks = FieldChecks::new(&ctx.input);
        checks.non_negative("contamination_charges");
        checks.non_negative("total_spend");
        checks.finish()
    }

    async fn run(&self, ctx: &SkillContext) -> Result<ContaminationPlan, SkillError> {
        let input: ContaminationInput = ctx.input_as()?;
        let plan = plan(&input, &ctx.config);
        ctx.progress.report(100, "Contamination plan ready");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(charges: f64, spend: f64) -> ContaminationPlan {
        plan(
            &ContaminationInput {
                contamination_charges: charges,
                total_spend: spend,
            },
            &FormulaConfig::canonical(),
        )
    }

    #[test]
    fn low_rate_needs_no_action() {
        let plan = run(300.0, 12_000.0);
        assert_eq!(plan.program, Program::None);
        assert!(plan.recommendations.is_empty());
        assert_eq!(plan.contamination_rate_pct, 2.5);
    }

    #[test]
    fn high_rate_full_program() {
        let plan = run(600.0, 10_000.0);
        assert_eq!(plan.program, Program::Full);
        let rec = &plan.recommendations[0];
        assert_eq!(rec.monthly_savings, 300.0);
        assert_eq!(rec.annual_savings, 3600.0);
    }

    #[test]
    fn moderate_rate_light_program() {
        let plan = run(400.0, 10_000.0);
        assert_eq!(plan.program, Program::Light);
        assert_eq!(plan.recommendations[0].monthly_savings, 100.0);
    }

    #[test]
    fn high_rate_small_charges_is_light_at_full_savings() {
        let plan = run(120.0, 1_000.0);
        assert_eq!(plan.program, Program::Light);
        assert_eq!(plan.recommendations[0].monthly_savings, 60.0);
    }

    #[test]
    fn zero_spend_is_zero_rate() {
        assert_eq!(run(50.0, 0.0).program, Program::None);
    }
}
