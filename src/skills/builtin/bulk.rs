//! Bulk trash: subscription vs on-demand.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::formulas::{FormulaConfig, round_to};
use crate::skills::base::SkillLogic;
use crate::skills::builtin::Recommendation;
use crate::skills::context::SkillContext;
use crate::skills::error::SkillError;
use crate::skills::input::FieldChecks;
use crate::skills::skill::ValidationResult;

pub const NAME: &str = "bulk-subscription";

pub struct BulkSubscription;

#[derive(Debug, Clone, Deserialize)]
pub struct BulkInput {
    pub avg_monthly_bulk: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStrategy {
    Subscription,
    Monitor,
    OnDemand,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkPlan {
    pub strategy: BulkStrategy,
    pub recommendations: Vec<Recommendation>,
}

pub fn plan(input: &BulkInput, config: &FormulaConfig) -> BulkPlan {
    let spend = input.avg_monthly_bulk;
    let (strategy, recommendation) = if spend > config.bulk_subscription_threshold {
        (
            BulkStrategy::Subscription,
            Recommendation::new(
                NAME,
                "Switch to Bulk Subscription",
                format!(
                    "Average bulk spend ${spend:.2}/month exceeds ${:.0}; a ${:.0}/month subscription lowers cost.",
                    config.bulk_subscription_threshold, config.bulk_subscription_cost
                ),
            )
            .with_savings(
                round_to(spend - config.bulk_subscription_cost, 2),
                config.months_per_year,
            ),
        )
    } else if spend >= config.bulk_monitor_floor {
        (
            BulkStrategy::Monitor,
            Recommendation::new(
                NAME,
                "Monitor Bulk Spend",
                "Borderline spend; monitor 3 months and prepare for subscription if the trend increases.",
            ),
        )
    } else {
        (
            BulkStrategy::OnDemand,
            Recommendation::new(
                NAME,
                "Keep On-Demand Bulk",
                "On-demand pricing remains cost-effective.",
            ),
        )
    };

    BulkPlan {
        strategy,
        recommendations: vec![recommendation],
    }
}

#[async_trait]
impl SkillLogic for BulkSubscription {
    type Output = BulkPlan;

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Compares average bulk pickup spend against a flat bulk subscription"
    }

    fn validate(&self, ctx: &SkillContext) -> ValidationResult {
        let mut checks = FieldChecks::new(&ctx.input);
        checks.non_negative("avg_monthly_bulk");
        checks.finish()
    }

    async fn run(&self, ctx: &SkillContext) -> Result<BulkPlan, SkillError> {
        let input: BulkInput = ctx.input_as()?;
        let plan = plan(&input, &ctx.config);
        ctx.progress.report(100, "Bulk strategy ready");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy_for(spend: f64) -> BulkPlan {
        plan(
            &BulkInput {
                avg_monthly_bulk: spend,
            },
            &FormulaConfig::canonical(),
        )
    }

    #[test]
    fn subscription_above_threshold() {
        let plan = strategy_for(800.0);
        assert_eq!(plan.strategy, BulkStrategy::Subscription);
        assert_eq!(plan.recommendations[0].monthly_savings, 400.0);
        assert_eq!(plan.recommendations[0].annual_savings, 4800.0);
    }

    #[test]
    fn borderline_is_monitored() {
        assert_eq!(strategy_for(500.0).strategy, BulkStrategy::Monitor);
        assert_eq!(strategy_for(300.0).strategy, BulkStrategy::Monitor);
        assert_eq!(strategy_for(350.0).recommendations[0].annual_savings, 0.0);
    }

    #[test]
    fn low_spend_stays_on_demand() {
        assert_eq!(strategy_for(120.0).strategy, BulkStrategy::OnDemand);
    }
}
