//! Full property analysis composed from the other built-in skills.
//!
//! Five stages, each reporting inside its own progress band:
//!
//! | stage        | band   |
//! |--------------|--------|
//! | extraction   | 0–20   |
//! | lease-up     | 20–35  |
//! | optimization | 35–75  |
//! | artifacts    | 75–90  |
//! | assembly     | 90–100 |
//!
//! A failing sub-skill is logged, recorded in `sub_skill_failures` and left
//! out of the recommendations. The analysis itself only fails when there is
//! nothing to analyze (no invoice records) or when the job is cancelled.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::artifacts::{ArtifactLocation, ReportRenderer};
use crate::formulas::{FormulaConfig, round_to};
use crate::skills::base::{SkillLogic, run_guarded, validate_guarded};
use crate::skills::builtin::Recommendation;
use crate::skills::builtin::extraction::{self, BatchExtractionOutput};
use crate::skills::builtin::lease_up::LeaseUpAssessment;
use crate::skills::context::SkillContext;
use crate::skills::error::{SkillError, SkillErrorKind};
use crate::skills::input::{FieldChecks, as_amount, lookup};
use crate::skills::skill::{Skill, SkillResult, ValidationResult};

pub const NAME: &str = "wastewise-analysis";

const RENDERER: &str = "report-renderer";

type InputMapper = dyn Fn(&AnalysisInput) -> Option<Value> + Send + Sync;

/// An optimization skill plus how to build its input from the analysis input.
///
/// The mapper returns `None` when the skill does not apply (e.g. no compactor).
#[derive(Clone)]
pub struct SubSkill {
    pub skill: Arc<dyn Skill>,
    input: Arc<InputMapper>,
}

impl SubSkill {
    pub fn new(
        skill: Arc<dyn Skill>,
        input: impl Fn(&AnalysisInput) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            skill,
            input: Arc::new(input),
        }
    }

    pub fn input_for(&self, analysis: &AnalysisInput) -> Option<Value> {
        (self.input)(analysis)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyProfile {
    pub name: String,
    pub units: f64,
    pub occupancy_pct: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub has_compactor: Option<bool>,
}

/// One month of charges, by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceEntry {
    /// `MM/YYYY`.
    pub month: String,
    pub invoice_number: Option<String>,
    pub disposal: f64,
    pub pickup_fees: f64,
    pub rental: f64,
    pub contamination: f64,
    pub bulk: f64,
    pub other: f64,
}

impl InvoiceEntry {
    pub fn total(&self) -> f64 {
        self.disposal + self.pickup_fees + self.rental + self.contamination + self.bulk + self.other
    }
}

/// Monthly financial profile.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Financials {
    pub monthly_cost: f64,
    pub pickup_cost_per_haul: Option<f64>,
    pub contamination_charges: f64,
    pub bulk_charges: f64,
    pub avg_monthly_overage: f64,
    /// `consistent`, `seasonal` or `sporadic`.
    pub overage_frequency: Option<String>,
    /// Monthly price of one added service day, when quoted.
    pub extra_service_cost: Option<f64>,
    pub avg_tons_per_haul: f64,
    pub overages_present: bool,
}

impl Financials {
    pub fn has_overages(&self) -> bool {
        self.overages_present || self.avg_monthly_overage > 0.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisInput {
    pub property: PropertyProfile,
    #[serde(default)]
    pub invoices: Vec<InvoiceEntry>,
    #[serde(default)]
    pub documents: Vec<Value>,
    pub financials: Financials,
    /// Passed through to `compactor-optimization`.
    #[serde(default)]
    pub compactor: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubSkillFailure {
    pub skill: String,
    pub code: String,
    pub message: String,
}

impl SubSkillFailure {
    fn new(skill: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            skill: skill.to_string(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpenseSummary {
    pub months: usize,
    pub total_spend: f64,
    pub avg_monthly_spend: f64,
    pub by_category: BTreeMap<&'static str, f64>,
    pub invoice_numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOverview {
    pub documents: usize,
    pub extracted: usize,
    pub failed: usize,
    pub needs_review: usize,
    pub invoices_added: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub property_name: String,
    pub units: f64,
    pub headline: String,
    pub total_monthly_savings: f64,
    pub total_annual_savings: f64,
    pub cost_per_door: f64,
    pub service_guidance: String,
    pub recommendations: Vec<Recommendation>,
    pub expense_summary: ExpenseSummary,
    pub lease_up: Option<LeaseUpAssessment>,
    pub extraction: Option<ExtractionOverview>,
    /// Sub-skills that did not apply to this property.
    pub skipped: Vec<String>,
    pub sub_skill_failures: Vec<SubSkillFailure>,
    pub artifacts: Vec<ArtifactLocation>,
}

/// The optimization skills [`WasteWiseAnalysis::standard`] runs, in order.
pub struct StandardOptimizers {
    pub compactor: Arc<dyn Skill>,
    pub contamination: Arc<dyn Skill>,
    pub bulk: Arc<dyn Skill>,
    pub overage: Arc<dyn Skill>,
}

pub struct WasteWiseAnalysis {
    extraction: Option<Arc<dyn Skill>>,
    lease_up: Arc<dyn Skill>,
    optimizers: Vec<SubSkill>,
    renderer: Arc<dyn ReportRenderer>,
}

impl WasteWiseAnalysis {
    pub fn new(
        extraction: Option<Arc<dyn Skill>>,
        lease_up: Arc<dyn Skill>,
        optimizers: Vec<SubSkill>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        Self {
            extraction,
            lease_up,
            optimizers,
            renderer,
        }
    }

    /// Wire the built-in compactor, contamination, bulk and overage optimizers.
    pub fn standard(
        extraction: Option<Arc<dyn Skill>>,
        lease_up: Arc<dyn Skill>,
        optimizers: StandardOptimizers,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let StandardOptimizers {
            compactor,
            contamination,
            bulk,
            overage,
        } = optimizers;
        let optimizers = vec![
            SubSkill::new(compactor, |input| {
                if input.property.has_compactor == Some(false) {
                    return None;
                }
                input.compactor.clone()
            }),
            SubSkill::new(contamination, |input| {
                Some(json!({
                    "contamination_charges": input.financials.contamination_charges,
                    "total_spend": input.financials.monthly_cost,
                }))
            }),
            SubSkill::new(bulk, |input| {
                Some(json!({ "avg_monthly_bulk": input.financials.bulk_charges }))
            }),
            SubSkill::new(overage, |input| {
                let financials = &input.financials;
                (financials.avg_monthly_overage > 0.0).then(|| {
                    json!({
                        "avg_monthly_overage": financials.avg_monthly_overage,
                        "overage_frequency": financials.overage_frequency,
                        "extra_service_cost": financials.extra_service_cost,
                        "pickup_cost_per_haul": financials.pickup_cost_per_haul,
                    })
                })
            }),
        ];
        Self::new(extraction, lease_up, optimizers, renderer)
    }

    /// Run one sub-skill behind the validation and panic boundaries.
    ///
    /// `Err` only for cancellation; every other failure is returned as a
    /// [`SubSkillFailure`]. AI usage is charged to `parent` either way.
    async fn invoke(
        skill: &dyn Skill,
        parent: &SkillContext,
        ctx: &SkillContext,
    ) -> Result<Result<SkillResult, SubSkillFailure>, SkillError> {
        ctx.checkpoint()?;
        let validation = validate_guarded(skill, ctx);
        if !validation.is_valid() {
            return Ok(Err(SubSkillFailure::new(
                skill.name(),
                SkillErrorKind::Validation.code(),
                validation.summary(),
            )));
        }

        let result = run_guarded(skill, ctx).await;
        if let Some(usage) = &result.metadata.ai_usage {
            parent.usage.record(usage);
        }
        if let Some(error) = result.error() {
            if error.is_cancelled() {
                return Err(SkillError::cancelled());
            }
            return Ok(Err(SubSkillFailure::new(
                skill.name(),
                error.code(),
                error.message.clone(),
            )));
        }
        Ok(Ok(result))
    }

    fn record_failure(failures: &mut Vec<SubSkillFailure>, ctx: &SkillContext, failure: SubSkillFailure) {
        warn!(
            request_id = %ctx.request_id,
            skill = %failure.skill,
            code = %failure.code,
            error = %failure.message,
            "Sub-skill failed; excluding from analysis"
        );
        failures.push(failure);
    }
}

/// Order by annual savings (highest first), then payback (shortest first,
/// unknown last), and number the result from 1.
pub fn prioritize(mut recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
    recommendations.sort_by(|a, b| {
        b.annual_savings
            .total_cmp(&a.annual_savings)
            .then_with(|| match (a.payback_months, b.payback_months) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    });
    for (index, rec) in recommendations.iter_mut().enumerate() {
        rec.priority = Some(index as u32 + 1);
    }
    recommendations
}

/// Service-level guidance from haul tonnage and overage history.
pub fn service_guidance(financials: &Financials, config: &FormulaConfig) -> &'static str {
    let tons = financials.avg_tons_per_haul;
    let contamination_or_overages =
        financials.has_overages() || financials.contamination_charges > 0.0;

    if contamination_or_overages && tons < config.service_reduce_tons_per_haul {
        "Address contamination/overages before any reduction."
    } else if tons >= config.service_add_tons_per_haul && financials.has_overages() {
        "Add service day (compactor near capacity)."
    } else if tons < config.service_reduce_tons_per_haul && !financials.has_overages() {
        "Reduce pickup frequency (underutilized)."
    } else {
        "Maintain current service."
    }
}

/// Whole dollars with thousands separators: `$12,345`.
pub fn format_dollars(amount: f64) -> String {
    let whole = amount.abs().round() as u64;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && whole > 0 { "-" } else { "" };
    format!("{sign}${grouped}")
}

pub fn headline(annual_savings: f64) -> String {
    format!(
        "Potential to Reduce Annual Trash Expense by {}",
        format_dollars(annual_savings)
    )
}

fn expense_summary(invoices: &[InvoiceEntry]) -> ExpenseSummary {
    let mut by_category = BTreeMap::new();
    for invoice in invoices {
        for (category, amount) in [
            ("disposal", invoice.disposal),
            ("pickup_fees", invoice.pickup_fees),
            ("rental", invoice.rental),
            ("contamination", invoice.contamination),
            ("bulk", invoice.bulk),
            ("other", invoice.other),
        ] {
            *by_category.entry(category).or_insert(0.0) += amount;
        }
    }
    for total in by_category.values_mut() {
        *total = round_to(*total, 2);
    }

    let total: f64 = invoices.iter().map(InvoiceEntry::total).sum();
    ExpenseSummary {
        months: invoices.len(),
        total_spend: round_to(total, 2),
        avg_monthly_spend: round_to(total / invoices.len().max(1) as f64, 2),
        by_category,
        invoice_numbers: invoices
            .iter()
            .filter_map(|i| i.invoice_number.clone())
            .collect(),
    }
}

/// `YYYY-MM-DD` → `MM/YYYY`.
fn invoice_month(date: &str) -> Option<String> {
    let year = date.get(0..4)?;
    let month = date.get(5..7)?;
    (year.chars().all(|c| c.is_ascii_digit()) && month.chars().all(|c| c.is_ascii_digit()))
        .then(|| format!("{month}/{year}"))
}

/// Convert an extracted invoice record into a monthly entry.
pub fn invoice_from_record(record: &Value) -> Option<InvoiceEntry> {
    let date = lookup(record, "invoice.invoice_date")
        .or_else(|| lookup(record, "billing_period.end_date"))
        .and_then(Value::as_str)?;
    let mut entry = InvoiceEntry {
        month: invoice_month(date)?,
        invoice_number: lookup(record, "invoice.invoice_number")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..InvoiceEntry::default()
    };

    let items = lookup(record, "invoice.line_items")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty());
    match items {
        Some(items) => {
            for item in items {
                let amount = item.get("extended_amount").and_then(as_amount).unwrap_or(0.0);
                let category = item.get("category").and_then(Value::as_str).unwrap_or("");
                let bucket = match category {
                    "disposal" => &mut entry.disposal,
                    "base" | "extra_pickup" | "overage" => &mut entry.pickup_fees,
                    "rental" => &mut entry.rental,
                    "contamination" => &mut entry.contamination,
                    "bulk" => &mut entry.bulk,
                    _ => &mut entry.other,
                };
                *bucket += amount;
            }
        }
        None => {
            entry.other = lookup(record, "invoice.amount_due")
                .and_then(as_amount)
                .unwrap_or(0.0);
        }
    }
    Some(entry)
}

fn band(lo: u8, hi: u8, index: usize, count: usize) -> (u8, u8) {
    let width = (hi - lo) as usize;
    let start = lo as usize + width * index / count.max(1);
    let end = lo as usize + width * (index + 1) / count.max(1);
    (start as u8, end as u8)
}

#[async_trait]
impl SkillLogic for WasteWiseAnalysis {
    type Output = AnalysisReport;

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Complete waste-service analysis: extraction, lease-up, optimizations and report"
    }

    fn validate(&self, ctx: &SkillContext) -> ValidationResult {
        let mut checks = FieldChecks::new(&ctx.input);
        checks.string("property.name");
        checks.positive("property.units");
        checks.within("property.occupancy_pct", 0.0, 100.0);
        checks.non_negative("financials.monthly_cost");
        checks.optional_array("invoices");
        checks.optional_array("documents");
        checks.finish()
    }

    async fn run(&self, ctx: &SkillContext) -> Result<AnalysisReport, SkillError> {
        let mut input: AnalysisInput = ctx.input_as()?;
        let mut failures = Vec::new();
        let mut skipped = Vec::new();

        // ── Stage 1: extraction ──
        let extraction_progress = ctx.progress.scoped(0, 20);
        let mut extraction_overview = None;
        if !input.documents.is_empty() {
            match &self.extraction {
                None => Self::record_failure(
                    &mut failures,
                    ctx,
                    SubSkillFailure::new(
                        extraction::NAME,
                        SkillErrorKind::SkillNotFound.code(),
                        "Document extraction is not configured",
                    ),
                ),
                Some(skill) => {
                    let child = ctx.child(
                        json!({ "documents": input.documents }),
                        extraction_progress.clone(),
                    );
                    match Self::invoke(skill.as_ref(), ctx, &child).await? {
                        Ok(result) => {
                            let output = result
                                .data()
                                .cloned()
                                .map(serde_json::from_value::<BatchExtractionOutput>);
                            match output {
                                Some(Ok(output)) => {
                                    let added: Vec<InvoiceEntry> = output
                                        .documents
                                        .iter()
                                        .filter(|d| d.document_type == "invoice")
                                        .filter_map(|d| invoice_from_record(&d.record))
                                        .collect();
                                    extraction_overview = Some(ExtractionOverview {
                                        documents: output.summary.total,
                                        extracted: output.summary.extracted,
                                        failed: output.summary.failed,
                                        needs_review: output.summary.needs_review,
                                        invoices_added: added.len(),
                                    });
                                    input.invoices.extend(added);
                                }
                                _ => Self::record_failure(
                                    &mut failures,
                                    ctx,
                                    SubSkillFailure::new(
                                        skill.name(),
                                        SkillErrorKind::Execution.code(),
                                        "Extraction output could not be read",
                                    ),
                                ),
                            }
                        }
                        Err(failure) => Self::record_failure(&mut failures, ctx, failure),
                    }
                }
            }
        }
        extraction_progress.report(100, "Extraction complete");

        if input.invoices.is_empty() {
            return Err(SkillError::insufficient_data(
                "invoices",
                "At least one invoice record is required",
            ));
        }

        // ── Stage 2: lease-up ──
        ctx.checkpoint()?;
        let lease_up_progress = ctx.progress.scoped(20, 35);
        let lease_child = ctx.child(
            json!({
                "status": input.property.status,
                "occupancy_pct": input.property.occupancy_pct,
                "monthly_cost": input.financials.monthly_cost,
            }),
            lease_up_progress.clone(),
        );
        let lease_up = match Self::invoke(self.lease_up.as_ref(), ctx, &lease_child).await? {
            Ok(result) => {
                let assessment = result
                    .data()
                    .cloned()
                    .map(serde_json::from_value::<LeaseUpAssessment>);
                match assessment {
                    Some(Ok(assessment)) => Some(assessment),
                    Some(Err(e)) => {
                        Self::record_failure(
                            &mut failures,
                            ctx,
                            SubSkillFailure::new(
                                self.lease_up.name(),
                                SkillErrorKind::Execution.code(),
                                format!("Unreadable lease-up assessment: {e}"),
                            ),
                        );
                        None
                    }
                    None => None,
                }
            }
            Err(failure) => {
                Self::record_failure(&mut failures, ctx, failure);
                None
            }
        };
        lease_up_progress.report(100, "Lease-up assessed");

        // ── Stage 3: optimization sub-skills ──
        let mut recommendations = Vec::new();
        let count = self.optimizers.len();
        for (index, sub) in self.optimizers.iter().enumerate() {
            ctx.checkpoint()?;
            let (lo, hi) = band(35, 75, index, count);
            let progress = ctx.progress.scoped(lo, hi);
            let name = sub.skill.name().to_string();

            let Some(sub_input) = sub.input_for(&input) else {
                info!(request_id = %ctx.request_id, skill = %name, "Sub-skill not applicable");
                skipped.push(name);
                progress.report(100, "Skipped");
                continue;
            };

            let child = ctx.child(sub_input, progress.clone());
            match Self::invoke(sub.skill.as_ref(), ctx, &child).await? {
                Ok(result) => {
                    let recs = result
                        .data()
                        .and_then(|data| data.get("recommendations"))
                        .cloned()
                        .map(serde_json::from_value::<Vec<Recommendation>>)
                        .unwrap_or(Ok(Vec::new()));
                    match recs {
                        Ok(recs) => recommendations.extend(recs),
                        Err(e) => Self::record_failure(
                            &mut failures,
                            ctx,
                            SubSkillFailure::new(
                                &name,
                                SkillErrorKind::Execution.code(),
                                format!("Unreadable recommendations: {e}"),
                            ),
                        ),
                    }
                }
                Err(failure) => Self::record_failure(&mut failures, ctx, failure),
            }
            progress.report(100, format!("{name} complete"));
        }

        let recommendations = prioritize(recommendations);
        let total_monthly: f64 = recommendations.iter().map(|r| r.monthly_savings).sum();
        let total_annual: f64 = recommendations.iter().map(|r| r.annual_savings).sum();

        let mut report = AnalysisReport {
            property_name: input.property.name.clone(),
            units: input.property.units,
            headline: headline(total_annual),
            total_monthly_savings: round_to(total_monthly, 2),
            total_annual_savings: round_to(total_annual, 2),
            cost_per_door: round_to(input.financials.monthly_cost / input.property.units, 2),
            service_guidance: service_guidance(&input.financials, &ctx.config).to_string(),
            recommendations,
            expense_summary: expense_summary(&input.invoices),
            lease_up,
            extraction: extraction_overview,
            skipped,
            sub_skill_failures: Vec::new(),
            artifacts: Vec::new(),
        };

        // ── Stage 4: artifacts ──
        ctx.checkpoint()?;
        let artifact_progress = ctx.progress.scoped(75, 90);
        artifact_progress.report(0, "Rendering report");
        report.sub_skill_failures = failures.clone();
        let rendered = serde_json::to_value(&report)
            .map_err(|e| SkillError::execution(NAME, e))?;
        match self.renderer.render(ctx.request_id, &rendered).await {
            Ok(locations) => report.artifacts = locations,
            Err(e) => Self::record_failure(
                &mut failures,
                ctx,
                SubSkillFailure::new(RENDERER, "ArtifactError", e.to_string()),
            ),
        }
        artifact_progress.report(100, "Report rendered");

        // ── Stage 5: assembly ──
        ctx.progress.report(90, "Assembling results");
        report.sub_skill_failures = failures;
        info!(
            request_id = %ctx.request_id,
            recommendations = report.recommendations.len(),
            failures = report.sub_skill_failures.len(),
            annual_savings = report.total_annual_savings,
            "Analysis assembled"
        );
        ctx.progress.report(100, "Analysis complete");
        Ok(report)
    }
}
