//! Reusable execution wrapper around concrete skill logic.
//!
//! Concrete skills implement [`SkillLogic`]; [`BaseSkill`] turns that into a
//! [`Skill`] and supplies:
//! - timing and result metadata
//! - a cancellation checkpoint before any work starts
//! - the formula guard (drift from canonical values fails before any calculation)
//! - conversion of errors and panics into a failed [`SkillResult`]

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::skills::context::SkillContext;
use crate::skills::error::SkillError;
use crate::skills::skill::{Skill, SkillMetadata, SkillResult, ValidationResult};

/// The algorithm-specific half of a skill.
#[async_trait]
pub trait SkillLogic: Send + Sync + 'static {
    /// Typed success payload.
    type Output: Serialize + Send;

    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str;

    fn validate(&self, ctx: &SkillContext) -> ValidationResult;

    /// The algorithm. Report progress through `ctx.progress` and call
    /// `ctx.checkpoint()` between expensive steps.
    async fn run(&self, ctx: &SkillContext) -> Result<Self::Output, SkillError>;
}

/// Adapts any [`SkillLogic`] to the [`Skill`] contract.
pub struct BaseSkill<L> {
    logic: L,
}

impl<L: SkillLogic> BaseSkill<L> {
    pub fn new(logic: L) -> Self {
        Self { logic }
    }

    async fn guarded(&self, ctx: &SkillContext) -> Result<serde_json::Value, SkillError> {
        ctx.checkpoint()?;

        let drift = ctx.config.drift();
        if !drift.is_empty() {
            return Err(SkillError::formula_mismatch(&drift));
        }

        let output = AssertUnwindSafe(self.logic.run(ctx))
            .catch_unwind()
            .await
            .map_err(|panic| SkillError::execution(self.logic.name(), panic_message(panic)))??;

        serde_json::to_value(output).map_err(|e| SkillError::execution(self.logic.name(), e))
    }
}

#[async_trait]
impl<L: SkillLogic> Skill for BaseSkill<L> {
    fn name(&self) -> &str {
        self.logic.name()
    }

    fn version(&self) -> &str {
        self.logic.version()
    }

    fn description(&self) -> &str {
        self.logic.description()
    }

    fn validate(&self, ctx: &SkillContext) -> ValidationResult {
        self.logic.validate(ctx)
    }

    async fn execute(&self, ctx: &SkillContext) -> SkillResult {
        let started = Instant::now();
        let outcome = self.guarded(ctx).await;

        let mut metadata = SkillMetadata::new(
            self.name(),
            self.version(),
            started.elapsed().as_millis() as u64,
        );
        metadata.ai_usage = ctx.usage.snapshot();

        match outcome {
            Ok(data) => {
                debug!(
                    skill = %self.name(),
                    request_id = %ctx.request_id,
                    duration_ms = metadata.duration_ms,
                    "Skill succeeded"
                );
                SkillResult::success(data, metadata)
            }
            Err(error) => {
                warn!(
                    skill = %self.name(),
                    request_id = %ctx.request_id,
                    code = error.code(),
                    error = %error.message,
                    "Skill failed"
                );
                SkillResult::failure(error, metadata)
            }
        }
    }
}

/// Run `validate` behind a panic boundary.
pub fn validate_guarded(skill: &dyn Skill, ctx: &SkillContext) -> ValidationResult {
    std::panic::catch_unwind(AssertUnwindSafe(|| skill.validate(ctx))).unwrap_or_else(|panic| {
        ValidationResult::from_errors(vec![crate::skills::skill::FieldError::new(
            "input",
            format!("validation aborted: {}", panic_message(panic)),
            "VALIDATION_PANIC",
        )])
    })
}

/// Run `execute` behind a panic boundary.
///
/// Every skill, whether built on [`BaseSkill`] or not, comes back as a
/// [`SkillResult`]; a panic becomes a `SkillExecutionError` failure.
pub async fn run_guarded(skill: &dyn Skill, ctx: &SkillContext) -> SkillResult {
    let started = Instant::now();
    match AssertUnwindSafe(skill.execute(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic);
            warn!(skill = %skill.name(), error = %message, "Skill panicked");
            let mut metadata = SkillMetadata::new(
                skill.name(),
                skill.version(),
                started.elapsed().as_millis() as u64,
            );
            metadata.ai_usage = ctx.usage.snapshot();
            SkillResult::failure(SkillError::execution(skill.name(), message), metadata)
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "panicked".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::formulas::FormulaConfig;
    use crate::skills::context::ProgressReporter;
    use crate::skills::error::SkillErrorKind;
    use crate::skills::skill::{AiUsage, FieldError};

    /// Counts runs; panics or fails on demand.
    struct Counter {
        runs: Arc<AtomicUsize>,
        mode: &'static str,
    }

    #[derive(Serialize)]
    struct CounterOutput {
        threshold: f64,
    }

    #[async_trait]
    impl SkillLogic for Counter {
        type Output = CounterOutput;

        fn name(&self) -> &str {
            "counter"
        }

        fn description(&self) -> &str {
            "Test counter"
        }

        fn validate(&self, ctx: &SkillContext) -> ValidationResult {
            if ctx.input.get("bad").is_some() {
                ValidationResult::from_errors(vec![FieldError::new("bad", "present", "BAD")])
            } else {
                ValidationResult::ok()
            }
        }

        async fn run(&self, ctx: &SkillContext) -> Result<CounterOutput, SkillError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            ctx.progress.report(50, "counting");
            ctx.usage.record(&AiUsage {
                input_tokens: 10,
                output_tokens: 2,
                cost_usd: dec!(0.01),
            });
            match self.mode {
                "panic" => panic!("counter exploded"),
                "fail" => Err(SkillError::insufficient_data("rows", "no rows")),
                _ => Ok(CounterOutput {
                    threshold: ctx.config.contamination_action_pct,
                }),
            }
        }
    }

    fn counter(mode: &'static str) -> (BaseSkill<Counter>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            BaseSkill::new(Counter {
                runs: Arc::clone(&runs),
                mode,
            }),
            runs,
        )
    }

    fn ctx() -> SkillContext {
        SkillContext::new(Uuid::new_v4(), "owner", serde_json::json!({}))
    }

    #[tokio::test]
    async fn success_wraps_data_and_metadata() {
        let (skill, runs) = counter("ok");
        let result = skill.execute(&ctx()).await;
        assert!(result.is_success());
        assert_eq!(result.data().unwrap()["threshold"], 3.0);
        assert_eq!(result.metadata.skill_name, "counter");
        assert_eq!(result.metadata.version, "1.0.0");
        assert_eq!(result.metadata.ai_usage.unwrap().input_tokens, 10);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn formula_mismatch_stops_before_calculation() {
        let (skill, runs) = counter("ok");
        let mut config = FormulaConfig::canonical();
        config.contamination_action_pct = 3.01;
        let (reporter, mut rx) = ProgressReporter::channel();
        let ctx = ctx().with_config(config).with_progress(reporter);

        let result = skill.execute(&ctx).await;
        let error = result.error().unwrap();
        assert_eq!(error.kind, SkillErrorKind::FormulaMismatch);
        assert!(error.message.contains("contamination_action_pct"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
        assert!(result.metadata.ai_usage.is_none());
    }

    #[tokio::test]
    async fn cancelled_before_start_never_runs() {
        let (skill, runs) = counter("ok");
        let ctx = ctx();
        ctx.cancel.cancel();
        let result = skill.execute(&ctx).await;
        assert!(result.error().unwrap().is_cancelled());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panic_becomes_execution_error() {
        let (skill, _) = counter("panic");
        let result = skill.execute(&ctx()).await;
        let error = result.error().unwrap();
        assert_eq!(error.code(), "SkillExecutionError");
        assert!(error.message.contains("counter exploded"));
    }

    #[tokio::test]
    async fn typed_error_is_preserved() {
        let (skill, _) = counter("fail");
        let result = skill.execute(&ctx()).await;
        assert_eq!(result.error().unwrap().kind, SkillErrorKind::InsufficientData);
    }

    struct RawPanicker;

    #[async_trait]
    impl Skill for RawPanicker {
        fn name(&self) -> &str {
            "raw"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        fn description(&self) -> &str {
            "Panics outside BaseSkill"
        }
        fn validate(&self, _ctx: &SkillContext) -> ValidationResult {
            panic!("validate exploded")
        }
        async fn execute(&self, _ctx: &SkillContext) -> SkillResult {
            panic!("execute exploded")
        }
    }

    #[tokio::test]
    async fn run_guarded_catches_raw_panics() {
        let result = run_guarded(&RawPanicker, &ctx()).await;
        assert_eq!(result.error().unwrap().code(), "SkillExecutionError");
        assert_eq!(result.metadata.skill_name, "raw");

        let validation = validate_guarded(&RawPanicker, &ctx());
        assert!(!validation.is_valid());
        assert!(validation.summary().contains("validate exploded"));
    }
}
