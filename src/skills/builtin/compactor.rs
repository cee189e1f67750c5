//! Compactor pickup optimization.
//!
//! Compactors only: open-top data has a different density and is rejected
//! with `InsufficientData` before any capacity math runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::formulas::{FormulaConfig, round_to};
use crate::skills::base::SkillLogic;
use crate::skills::builtin::Recommendation;
use crate::skills::context::SkillContext;
use crate::skills::error::{SkillError, SkillErrorKind};
use crate::skills::input::FieldChecks;
use crate::skills::skill::ValidationResult;

pub const NAME: &str = "compactor-optimization";

pub struct CompactorOptimization;

#[derive(Debug, Clone, Deserialize)]
pub struct CompactorInput {
    pub units: f64,
    pub container_size_cy: f64,
    pub annual_pickups: f64,
    pub avg_tons_per_pull: f64,
    pub base_haul_fee: f64,
    pub disposal_rate: f64,
    /// Equipment description, e.g. `compacted`, `self-contained compactor`, `uncompacted`.
    #[serde(default)]
    pub service_type: Option<String>,
    /// Overrides whatever `service_type` implies.
    #[serde(default)]
    pub compacted: Option<bool>,
}

impl CompactorInput {
    /// Whether benchmarks for compacted waste apply. Defaults to compacted.
    pub fn is_compacted(&self) -> bool {
        if let Some(compacted) = self.compacted {
            return compacted;
        }
        let Some(service_type) = self.service_type.as_deref() else {
            return true;
        };
        let service_type = service_type.to_lowercase();
        let loose = ["uncompact", "non-compact", "non compact", "loose", "open"]
            .iter()
            .any(|marker| service_type.contains(marker));
        !loose && service_type.contains("compact")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityAnalysis {
    pub max_capacity_tons: f64,
    pub utilization_pct: f64,
    pub utilization_status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct YardsPerDoor {
    pub available_weekly: f64,
    pub actual_weekly: f64,
    pub available_annual: f64,
    pub actual_annual: f64,
    pub service_utilization_pct: f64,
    pub excess_capacity_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceAssessment {
    pub status: &'static str,
    pub recommendation: &'static str,
    pub optimal_benchmark: f64,
    pub min_benchmark: f64,
    pub max_benchmark: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentCosts {
    pub annual_haul_cost: f64,
    pub annual_disposal_cost: f64,
    pub total_annual_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickupOptimization {
    pub recommended_pickups: f64,
    pub pickup_reduction: f64,
    pub days_between_pickups: f64,
    pub optimized_utilization_pct: f64,
    pub annual_savings: f64,
    pub monthly_savings: f64,
    pub priority: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompactorAnalysis {
    pub capacity_analysis: CapacityAnalysis,
    pub yards_per_door: YardsPerDoor,
    pub service_assessment: ServiceAssessment,
    pub current_costs: CurrentCosts,
    pub optimization: Option<PickupOptimization>,
    pub recommendations: Vec<Recommendation>,
}

/// Reasons the data looks like an open top, empty if it looks like a compactor.
fn open_top_warnings(input: &CompactorInput, config: &FormulaConfig) -> Vec<String> {
    if input
        .service_type
        .as_deref()
        .is_some_and(|s| s.to_lowercase().contains("open"))
    {
        return vec!["Service type is marked as open top or non-compacted".to_string()];
    }

    let expected = config.expected_compactor_tons();
    let Some(&(size, min_expected, max_expected)) = expected.iter().min_by(|a, b| {
        (a.0 - input.container_size_cy)
            .abs()
            .total_cmp(&(b.0 - input.container_size_cy).abs())
    }) else {
        return Vec::new();
    };

    if input.avg_tons_per_pull < min_expected * config.open_top_tolerance {
        vec![
            format!(
                "Average tonnage ({} tons) is unusually low for a {}-yard container",
                input.avg_tons_per_pull, input.container_size_cy
            ),
            format!("Expected range for a {size}-yard compactor: {min_expected}-{max_expected} tons"),
        ]
    } else {
        Vec::new()
    }
}

fn utilization_status(utilization: f64, config: &FormulaConfig) -> &'static str {
    if utilization < config.underutilized_threshold_pct {
        "Under-utilized"
    } else if utilization >= config.optimal_utilization_low_pct
        && utilization <= config.optimal_utilization_high_pct
    {
        "Optimal"
    } else if utilization < config.optimal_utilization_low_pct {
        "Acceptable"
    } else {
        "Over-utilized"
    }
}

fn assess_service(yards_per_door_weekly: f64, compacted: bool, config: &FormulaConfig) -> ServiceAssessment {
    let (min, optimal, max) = if compacted {
        (
            config.compacted_min_ypd,
            config.compacted_optimal_ypd,
            config.compacted_max_ypd,
        )
    } else {
        (
            config.uncompacted_min_ypd,
            config.uncompacted_optimal_ypd,
            config.uncompacted_max_ypd,
        )
    };

    let (status, recommendation) = if yards_per_door_weekly < min {
        ("Under-serviced", "Increase frequency or container size")
    } else if yards_per_door_weekly <= optimal {
        ("Within acceptable range", "Optimal - maintain current service")
    } else if yards_per_door_weekly <= max {
        (
            "Within acceptable range",
            "Slight over-service - consider minor frequency reduction",
        )
    } else {
        ("Over-serviced", "Reduce frequency or downsize container")
    };

    ServiceAssessment {
        status,
        recommendation,
        optimal_benchmark: optimal,
        min_benchmark: min,
        max_benchmark: max,
    }
}

/// Full compactor analysis. Fails with `InsufficientData` for open-top data.
pub fn analyze(input: &CompactorInput, config: &FormulaConfig) -> Result<CompactorAnalysis, SkillError> {
    let warnings = open_top_warnings(input, config);
    if !warnings.is_empty() {
        return Err(SkillError::new(
            SkillErrorKind::InsufficientData,
            "Data appears to be for an open top container; compactor analysis does not apply",
        )
        .with_details(serde_json::json!({ "warnings": warnings })));
    }

    let max_capacity = input.container_size_cy * config.compactor_density_lbs_per_yard / config.lbs_per_ton;
    let utilization = input.avg_tons_per_pull / max_capacity * 100.0;
    let annual_tonnage = input.avg_tons_per_pull * input.annual_pickups;

    let available_annual_yards = input.container_size_cy * input.annual_pickups;
    let available_per_door = available_annual_yards / input.units;
    let actual_annual_yards = annual_tonnage * config.yards_per_ton;
    let actual_per_door = actual_annual_yards / input.units;
    let service_utilization = actual_annual_yards / available_annual_yards * 100.0;

    let service_assessment = assess_service(
        available_per_door / config.weeks_per_year,
        input.is_compacted(),
        config,
    );

    let annual_haul_cost = input.base_haul_fee * input.annual_pickups * config.haul_fee_multiplier;
    let annual_disposal_cost = annual_tonnage * input.disposal_rate;

    let mut recommendations = Vec::new();
    let optimization = if utilization < config.underutilized_threshold_pct {
        let optimal = (input.annual_pickups * utilization / config.target_utilization_pct)
            .round()
            .max(1.0);
        let annual_savings =
            input.base_haul_fee * (input.annual_pickups - optimal) * config.haul_fee_multiplier;
        let monthly_savings = annual_savings / config.months_per_year;
        let optimized_utilization = annual_tonnage / optimal / max_capacity * 100.0;
        let days_between = config.days_per_year / optimal;
        let priority = if utilization < config.high_priority_utilization_pct {
            "HIGH"
        } else {
            "MEDIUM"
        };

        if annual_savings > 0.0 {
            recommendations.push(
                Recommendation::new(
                    NAME,
                    "Reduce Compactor Pickups",
                    format!(
                        "Compactor runs at {:.1}% of capacity. Reduce pickups from {} to {} per year \
                         (every {:.1} days) to reach about {:.0}% utilization. Priority: {priority}.",
                        utilization,
                        input.annual_pickups,
                        optimal,
                        days_between,
                        optimized_utilization,
                    ),
                )
                .with_savings(round_to(monthly_savings, 2), config.months_per_year),
            );
        }

        Some(PickupOptimization {
            recommended_pickups: optimal,
            pickup_reduction: input.annual_pickups - optimal,
            days_between_pickups: round_to(days_between, 1),
            optimized_utilization_pct: round_to(optimized_utilization, 1),
            annual_savings: round_to(annual_savings, 2),
            monthly_savings: round_to(monthly_savings, 2),
            priority,
        })
    } else {
        None
    };

    Ok(CompactorAnalysis {
        capacity_analysis: CapacityAnalysis {
            max_capacity_tons: round_to(max_capacity, 2),
            utilization_pct: round_to(utilization, 1),
            utilization_status: utilization_status(utilization, config),
        },
        yards_per_door: YardsPerDoor {
            available_weekly: round_to(available_per_door / config.weeks_per_year, 3),
            actual_weekly: round_to(actual_per_door / config.weeks_per_year, 3),
            available_annual: round_to(available_per_door, 2),
            actual_annual: round_to(actual_per_door, 2),
            service_utilization_pct: round_to(service_utilization, 1),
            excess_capacity_pct: round_to(100.0 - service_utilization, 1),
        },
        service_assessment,
        current_costs: CurrentCosts {
            annual_haul_cost: round_to(annual_haul_cost, 2),
            annual_disposal_cost: round_to(annual_disposal_cost, 2),
            total_annual_cost: round_to(annual_haul_cost + annual_disposal_cost, 2),
        },
        optimization,
        recommendations,
    })
}

#[async_trait]
impl SkillLogic for CompactorOptimization {
    type Output = CompactorAnalysis;

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Analyzes compactor utilization and recommends an optimized pickup schedule"
    }

    fn validate(&self, ctx: &SkillContext) -> ValidationResult {
        let mut checks = FieldChecks::new(&ctx.input);
        checks.positive("units");
        checks.positive("container_size_cy");
        checks.positive("annual_pickups");
        checks.non_negative("avg_tons_per_pull");
        checks.non_negative("base_haul_fee");
        checks.non_negative("disposal_rate");
        checks.finish()
    }

    async fn run(&self, ctx: &SkillContext) -> Result<CompactorAnalysis, SkillError> {
        let input: CompactorInput = ctx.input_as()?;
        ctx.progress.report(20, "Validating container type");
        let analysis = analyze(&input, &ctx.config)?;
        ctx.progress.report(100, "Compactor analysis complete");
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(tons: f64) -> CompactorInput {
        CompactorInput {
            units: 200.0,
            container_size_cy: 30.0,
            annual_pickups: 52.0,
            avg_tons_per_pull: tons,
            base_haul_fee: 150.0,
            disposal_rate: 60.0,
            service_type: Some("compacted".to_string()),
            compacted: None,
        }
    }

    #[test]
    fn underutilized_compactor_gets_recommendation() {
        let config = FormulaConfig::canonical();
        let analysis = analyze(&input(4.5), &config).unwrap();

        assert_eq!(analysis.capacity_analysis.max_capacity_tons, 8.7);
        assert_eq!(analysis.capacity_analysis.utilization_pct, 51.7);
        assert_eq!(analysis.capacity_analysis.utilization_status, "Under-utilized");

        let opt = analysis.optimization.unwrap();
        assert_eq!(opt.recommended_pickups, 36.0);
        assert_eq!(opt.pickup_reduction, 16.0);
        assert_eq!(opt.annual_savings, 3336.0);
        assert_eq!(opt.priority, "MEDIUM");

        assert_eq!(analysis.recommendations.len(), 1);
        assert_eq!(analysis.recommendations[0].source, NAME);
        assert_eq!(analysis.recommendations[0].monthly_savings, 278.0);
        assert_eq!(analysis.recommendations[0].annual_savings, 3336.0);
    }

    #[test]
    fn well_utilized_compactor_has_no_optimization() {
        let config = FormulaConfig::canonical();
        let analysis = analyze(&input(6.5), &config).unwrap();
        assert_eq!(analysis.capacity_analysis.utilization_status, "Optimal");
        assert!(analysis.optimization.is_none());
        assert!(analysis.recommendations.is_empty());
        assert_eq!(analysis.current_costs.annual_haul_cost, 10842.0);
    }

    #[test]
    fn open_top_data_is_rejected() {
        let config = FormulaConfig::canonical();
        let err = analyze(&input(0.4), &config).unwrap_err();
        assert_eq!(err.kind, SkillErrorKind::InsufficientData);

        let mut explicit = input(4.5);
        explicit.service_type = Some("Open_Top".to_string());
        assert!(analyze(&explicit, &config).is_err());
    }

    #[test]
    fn compaction_follows_equipment_type() {
        let with_type = |service_type: Option<&str>| CompactorInput {
            service_type: service_type.map(str::to_string),
            ..input(4.5)
        };
        assert!(with_type(None).is_compacted());
        assert!(with_type(Some("Self-Contained Compactor")).is_compacted());
        assert!(!with_type(Some("Uncompacted")).is_compacted());
        assert!(!with_type(Some("non-compacted dumpster")).is_compacted());
        assert!(!with_type(Some("front-load dumpster")).is_compacted());

        let mut explicit = with_type(Some("compactor"));
        explicit.compacted = Some(false);
        assert!(!explicit.is_compacted());
    }

    #[test]
    fn uncompacted_service_uses_loose_benchmarks() {
        let config = FormulaConfig::canonical();
        let mut loose = input(4.5);
        loose.compacted = Some(false);
        let analysis = analyze(&loose, &config).unwrap();
        assert_eq!(analysis.service_assessment.optimal_benchmark, config.uncompacted_optimal_ypd);

        let analysis = analyze(&input(4.5), &config).unwrap();
        assert_eq!(analysis.service_assessment.optimal_benchmark, config.compacted_optimal_ypd);
    }

    #[test]
    fn high_priority_below_fifty_percent() {
        let config = FormulaConfig::canonical();
        let analysis = analyze(&input(3.0), &config).unwrap();
        assert_eq!(analysis.optimization.unwrap().priority, "HIGH");
    }

    #[test]
    fn validation_flags_bad_fields() {
        let ctx = SkillContext::new(
            uuid::Uuid::new_v4(),
            "o",
            serde_json::json!({"units": 0, "container_size_cy": 30}),
        );
        let result = CompactorOptimization.validate(&ctx);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "units"));
        assert!(result.errors.iter().any(|e| e.field == "annual_pickups"));
    }
}
