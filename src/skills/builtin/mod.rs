//! Built-in skills for waste-service cost analysis.

pub mod bulk;
pub mod compactor;
pub mod contamination;
pub mod extraction;
pub mod lease_up;
pub mod orchestrator;
pub mod overage;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifacts::ReportRenderer;
use crate::error::RegistryError;
use crate::extraction::DocumentExtractor;
use crate::skills::base::BaseSkill;
use crate::skills::registry::SkillRegistry;
use crate::skills::skill::Skill;

pub use bulk::BulkSubscription;
pub use compactor::CompactorOptimization;
pub use contamination::ContaminationReduction;
pub use extraction::BatchExtraction;
pub use lease_up::LeaseUpDetection;
pub use orchestrator::{StandardOptimizers, SubSkill, WasteWiseAnalysis};
pub use overage::OverageStrategy;

/// A savings opportunity produced by an optimization skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub detail: String,
    /// Skill that produced it.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub monthly_savings: f64,
    #[serde(default)]
    pub annual_savings: f64,
    #[serde(default)]
    pub payback_months: Option<f64>,
    /// 1-based rank, assigned by the orchestrator.
    #[serde(default)]
    pub priority: Option<u32>,
}

impl Recommendation {
    pub fn new(source: &str, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detail: detail.into(),
            source: source.to_string(),
            monthly_savings: 0.0,
            annual_savings: 0.0,
            payback_months: None,
            priority: None,
        }
    }

    pub fn with_savings(mut self, monthly: f64, months_per_year: f64) -> Self {
        self.monthly_savings = monthly;
        self.annual_savings = monthly * months_per_year;
        self
    }
}

/// Register every built-in skill.
///
/// `batch-extraction` is only registered when an extractor is configured;
/// the orchestrator then records document input as an unhandled sub-step.
pub fn register_builtin(
    registry: &mut SkillRegistry,
    extractor: Option<Arc<dyn DocumentExtractor>>,
    renderer: Arc<dyn ReportRenderer>,
) -> Result<(), RegistryError> {
    let compactor: Arc<dyn Skill> = Arc::new(BaseSkill::new(CompactorOptimization));
    let contamination: Arc<dyn Skill> = Arc::new(BaseSkill::new(ContaminationReduction));
    let bulk: Arc<dyn Skill> = Arc::new(BaseSkill::new(BulkSubscription));
    let overage: Arc<dyn Skill> = Arc::new(BaseSkill::new(OverageStrategy));
    let lease_up: Arc<dyn Skill> = Arc::new(BaseSkill::new(LeaseUpDetection));
    let extraction: Option<Arc<dyn Skill>> = extractor
        .map(|extractor| Arc::new(BaseSkill::new(BatchExtraction::new(extractor))) as Arc<dyn Skill>);

    let analysis = WasteWiseAnalysis::standard(
        extraction.clone(),
        Arc::clone(&lease_up),
        StandardOptimizers {
            compactor: Arc::clone(&compactor),
            contamination: Arc::clone(&contamination),
            bulk: Arc::clone(&bulk),
            overage: Arc::clone(&overage),
        },
        renderer,
    );

    registry.register(compactor)?;
    registry.register(contamination)?;
    registry.register(bulk)?;
    registry.register(overage)?;
    registry.register(lease_up)?;
    if let Some(extraction) = extraction {
        registry.register(extraction)?;
    }
    registry.register(Arc::new(BaseSkill::new(analysis)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::JsonReportWriter;

    #[test]
    fn registers_all_without_extractor() {
        let mut registry = SkillRegistry::new();
        register_builtin(&mut registry, None, Arc::new(JsonReportWriter::new("/tmp")))
            .unwrap();
        assert_eq!(
            registry.list(),
            vec![
                "bulk-subscription",
                "compactor-optimization",
                "contamination-reduction",
                "lease-up-detection",
                "overage-strategy",
                "wastewise-analysis",
            ]
        );
        assert!(registry.descriptors().iter().all(|d| d.version == "1.0.0"));
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = SkillRegistry::new();
        let renderer: Arc<dyn ReportRenderer> = Arc::new(JsonReportWriter::new("/tmp"));
        register_builtin(&mut registry, None, Arc::clone(&renderer)).unwrap();
        assert!(register_builtin(&mut registry, None, renderer).is_err());
    }
}
