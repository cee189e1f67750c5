//! Canonical formula configuration.
//!
//! Every threshold and rate used by a skill calculation is declared exactly
//! once, in the `formula_config!` invocation below. Skills never hardcode
//! these numbers; they read them from the `FormulaConfig` carried by their
//! `SkillContext`, and `BaseSkill` refuses to run when that config differs
//! from [`FormulaConfig::canonical`].

use serde::{Deserialize, Serialize};

macro_rules! formula_config {
    ($( $(#[doc = $doc:literal])* $field:ident: $value:expr ),* $(,)?) => {
        /// Numeric thresholds and rates shared by all skills.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct FormulaConfig {
            $( $(#[doc = $doc])* pub $field: f64, )*
        }

        impl FormulaConfig {
            /// The single source of truth for every formula constant.
            pub fn canonical() -> Self {
                Self {
                    $( $field: $value, )*
                }
            }

            /// `(name, value)` pairs in declaration order.
            pub fn entries(&self) -> Vec<(&'static str, f64)> {
                vec![ $( (stringify!($field), self.$field), )* ]
            }
        }
    };
}

formula_config! {
    /// Pounds of compacted waste per cubic yard.
    compactor_density_lbs_per_yard: 580.0,
    /// Pounds per short ton.
    lbs_per_ton: 2000.0,
    /// Cubic yards represented by one ton of compacted waste.
    yards_per_ton: 3.448,
    /// Weeks per year used for per-week yards-per-door figures.
    weeks_per_year: 52.0,
    days_per_year: 365.0,
    months_per_year: 12.0,
    /// Utilization the optimized pickup schedule aims for (percent).
    target_utilization_pct: 75.0,
    /// Multiplier applied to the base haul fee (fuel, fees, taxes).
    haul_fee_multiplier: 1.39,
    /// Below this utilization the compactor is under-utilized (percent).
    underutilized_threshold_pct: 60.0,
    /// Below this utilization an optimization is HIGH priority (percent).
    high_priority_utilization_pct: 50.0,
    optimal_utilization_low_pct: 70.0,
    optimal_utilization_high_pct: 85.0,
    /// Fraction of the expected minimum tonnage below which data looks like an open top.
    open_top_tolerance: 0.6,
    /// Typical tons per pull for 10, 20, 30 and 40-yard compactors.
    expected_tons_min_10cy: 0.3,
    expected_tons_max_10cy: 1.5,
    expected_tons_min_20cy: 0.5,
    expected_tons_max_20cy: 2.5,
    expected_tons_min_30cy: 1.0,
    expected_tons_max_30cy: 3.5,
    expected_tons_min_40cy: 1.5,
    expected_tons_max_40cy: 4.5,
    compacted_min_ypd: 0.06,
    compacted_optimal_ypd: 0.09,
    compacted_max_ypd: 0.125,
    uncompacted_min_ypd: 0.25,
    uncompacted_optimal_ypd: 0.35,
    uncompacted_max_ypd: 0.50,
    /// Contamination share of spend that warrants action (percent).
    contamination_action_pct: 3.0,
    /// Contamination share of spend that warrants the full program (percent).
    contamination_high_pct: 5.0,
    /// Monthly contamination charges above which the full program pays off.
    contamination_high_charge: 150.0,
    contamination_full_savings_rate: 0.5,
    contamination_light_savings_rate: 0.25,
    /// Monthly bulk spend above which a subscription is cheaper.
    bulk_subscription_threshold: 500.0,
    /// Monthly price of a bulk subscription.
    bulk_subscription_cost: 400.0,
    /// Monthly bulk spend at which spend should be monitored.
    bulk_monitor_floor: 300.0,
    /// Occupancy at or above which a property is no longer in lease-up (percent).
    lease_up_occupancy_threshold_pct: 90.0,
    /// Occupancy assumed for a stabilized budget projection (percent).
    stabilized_occupancy_pct: 95.0,
    /// Tons per haul under which service can be reduced.
    service_reduce_tons_per_haul: 6.0,
    /// Tons per haul at which a compactor is near capacity.
    service_add_tons_per_haul: 8.0,
    /// Extraction confidence below which a document needs review.
    review_confidence_threshold: 0.70,
    /// Allowed difference between line items and subtotal (dollars).
    line_item_tolerance: 1.0,
    /// Confidence deducted per missing critical field.
    critical_field_penalty: 0.15,
    /// Confidence deducted for a totals mismatch, bad contract term or negative amount.
    major_warning_penalty: 0.10,
    /// Confidence deducted for a date-order problem or missing clause.
    minor_warning_penalty: 0.05,
}

impl Default for FormulaConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

/// A single field whose value differs from the canonical source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaDrift {
    pub field: &'static str,
    pub expected: f64,
    pub actual: f64,
}

impl FormulaConfig {
    /// Compare against the canonical values, returning every drifted field.
    ///
    /// Comparison is exact; NaN never matches.
    pub fn drift(&self) -> Vec<FormulaDrift> {
        let canonical = Self::canonical();
        self.entries()
            .into_iter()
            .zip(canonical.entries())
            .filter(|((_, actual), (_, expected))| actual != expected)
            .map(|((field, actual), (_, expected))| FormulaDrift {
                field,
                expected,
                actual,
            })
            .collect()
    }

    /// `(container size in yards, min tons, max tons)` for each standard compactor size.
    pub fn expected_compactor_tons(&self) -> [(f64, f64, f64); 4] {
        [
            (10.0, self.expected_tons_min_10cy, self.expected_tons_max_10cy),
            (20.0, self.expected_tons_min_20cy, self.expected_tons_max_20cy),
            (30.0, self.expected_tons_min_30cy, self.expected_tons_max_30cy),
            (40.0, self.expected_tons_min_40cy, self.expected_tons_max_40cy),
        ]
    }
}


/// Round to `places` decimal places for presentation.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
