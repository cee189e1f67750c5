//! Overage strategy: pay recurring overage charges or buy more service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::formulas::{FormulaConfig, round_to};
use crate::skills::base::SkillLogic;
use crate::skills::builtin::Recommendation;
use crate::skills::context::SkillContext;
use crate::skills::error::SkillError;
use crate::skills::input::FieldChecks;
use crate::skills::skill::ValidationResult;

pub const NAME: &str = "overage-strategy";

const FREQUENCIES: &[&str] = &["consistent", "seasonal", "sporadic"];

pub struct OverageStrategy;

#[derive(Debug, Clone, Deserialize)]
pub struct OverageInput {
    pub avg_monthly_overage: f64,
    /// `consistent`, `seasonal` or `sporadic`; unknown is treated as sporadic.
    #[serde(default)]
    pub overage_frequency: Option<String>,
    /// Monthly price of one added service day.
    #[serde(default)]
    pub extra_service_cost: Option<f64>,
    /// Used to price the added service day when `extra_service_cost` is absent.
    #[serde(default)]
    pub pickup_cost_per_haul: Option<f64>,
}

impl OverageInput {
    /// One extra haul every week, priced per month.
    fn added_service_monthly(&self, config: &FormulaConfig) -> Option<f64> {
        self.extra_service_cost.or_else(|| {
            self.pickup_cost_per_haul
                .map(|fee| fee * config.weeks_per_year / config.months_per_year)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverageAction {
    NoOverages,
    AddServiceDay,
    KeepStatusQuo,
    PriceAddedService,
    SeasonalService,
    Investigate,
}

#[derive(Debug, Clone, Serialize)]
pub struct OveragePlan {
    pub action: OverageAction,
    pub annual_overage: f64,
    pub annual_added_service: Option<f64>,
    pub guidance: String,
    pub recommendations: Vec<Recommendation>,
}

pub fn plan(input: &OverageInput, config: &FormulaConfig) -> OveragePlan {
    let annual_overage = round_to(input.avg_monthly_overage * config.months_per_year, 2);
    let added_monthly = input.added_service_monthly(config);
    let annual_added_service = added_monthly.map(|cost| round_to(cost * config.months_per_year, 2));
    let frequency = input
        .overage_frequency
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let (action, guidance, recommendation) = if input.avg_monthly_overage <= 0.0 {
        (OverageAction::NoOverages, "No overage charges to address.".to_string(), None)
    } else if frequency == "consistent" {
        match added_monthly {
            Some(added) if added < input.avg_monthly_overage => (
                OverageAction::AddServiceDay,
                "Add permanent service day; cheaper than overages.".to_string(),
                Some(
                    Recommendation::new(
                        NAME,
                        "Add Permanent Service Day",
                        format!(
                            "Overages average ${:.2}/month against ${added:.2}/month for an added service day.",
                            input.avg_monthly_overage
                        ),
                    )
                    .with_savings(
                        round_to(input.avg_monthly_overage - added, 2),
                        config.months_per_year,
                    ),
                ),
            ),
            Some(_) => (
                OverageAction::KeepStatusQuo,
                "Overages cheaper than added service; keep status quo.".to_string(),
                None,
            ),
            None => (
                OverageAction::PriceAddedService,
                "Overages recur every month; price an added service day to compare.".to_string(),
                None,
            ),
        }
    } else if frequency == "seasonal" {
        let guidance = "Add seasonal service only during peak months.".to_string();
        (
            OverageAction::SeasonalService,
            guidance.clone(),
            Some(Recommendation::new(NAME, "Add Seasonal Service", guidance)),
        )
    } else {
        let guidance = "Investigate operations (valet distribution, compliance); consider larger equipment if needed."
            .to_string();
        (
            OverageAction::Investigate,
            guidance.clone(),
            Some(Recommendation::new(NAME, "Investigate Overage Causes", guidance)),
        )
    };

    OveragePlan {
        action,
        annual_overage,
        annual_added_service,
        guidance,
        recommendations: recommendation.into_iter().collect(),
    }
}

#[async_trait]
impl SkillLogic for OverageStrategy {
    type Output = OveragePlan;

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Compares recurring overage charges against the cost of added service"
    }

    fn validate(&self, ctx: &SkillContext) -> ValidationResult {
        let mut checks = FieldChecks::new(&ctx.input);
        checks.non_negative("avg_monthly_overage");
        checks.optional_one_of("overage_frequency", FREQUENCIES);
        for field in ["extra_service_cost", "pickup_cost_per_haul"] {
            if checks.optional_number(field).is_some() {
                checks.non_negative(field);
            }
        }
        checks.finish()
    }

    async fn run(&self, ctx: &SkillContext) -> Result<OveragePlan, SkillError> {
        let input: OverageInput = ctx.input_as()?;
        let plan = plan(&input, &ctx.config);
        ctx.progress.report(100, "Overage strategy ready");
        Ok(plan)
    }
}
