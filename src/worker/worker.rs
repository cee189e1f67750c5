//! Job worker loop.
//!
//! Polls the store, claims one job at a time and drives it to a terminal
//! state. While a skill runs, the worker is the single consumer of its
//! progress channel and refreshes the job heartbeat, which is also how it
//! learns about cancellation requests.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::JobError;
use crate::formulas::FormulaConfig;
use crate::skills::{
    ProgressReporter, ProgressUpdate, SkillContext, SkillError, SkillErrorKind, SkillOutcome,
    SkillRegistry, run_guarded, validate_guarded,
};
use crate::store::JobStore;
use crate::worker::state::Job;

/// Payload key carrying a formula snapshot taken at submission time.
pub const FORMULA_SNAPSHOT_KEY: &str = "formula_config";

/// How a claimed job ends.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Completed(serde_json::Value),
    Failed { code: String, message: String },
}

impl From<SkillError> for Outcome {
    fn from(error: SkillError) -> Self {
        Self::Failed {
            code: error.code().to_string(),
            message: error.message,
        }
    }
}

/// Claims and executes jobs for one worker identity.
pub struct Worker {
    store: Arc<dyn JobStore>,
    registry: Arc<SkillRegistry>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<SkillRegistry>, config: WorkerConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    /// Poll until `shutdown` fires. A job already claimed is always driven to
    /// a terminal state before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id(), "Worker started");

        while !shutdown.is_cancelled() {
            match self.poll_once().await {
                // More work may be waiting; poll again straight away.
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!(worker_id = %self.id(), error = %e, "Job claim failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker_id = %self.id(), "Worker stopped");
    }

    /// Claim and process at most one job. Returns whether a job was claimed.
    pub async fn poll_once(&self) -> Result<bool, JobError> {
        let Some(job) = self.store.claim_next(self.id()).await? else {
            return Ok(false);
        };
        info!(
            worker_id = %self.id(),
            job_id = %job.id,
            skill = %job.skill_name,
            attempt = job.attempt,
            "Job claimed"
        );
        self.process(job).await;
        Ok(true)
    }

    /// Claim-to-terminal for one job. Nothing in here may take the loop down.
    async fn process(&self, job: Job) {
        let job_id = job.id;
        let outcome = AssertUnwindSafe(self.execute(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(job_id = %job_id, "Job processing panicked");
                SkillError::execution(&job.skill_name, "worker panicked").into()
            });
        self.finish(job_id, outcome).await;
    }

    async fn execute(&self, job: &Job) -> Outcome {
        if job.cancel_requested {
            return SkillError::cancelled().into();
        }

        let Some(skill) = self.registry.get(&job.skill_name) else {
            return SkillError::not_found(&job.skill_name).into();
        };

        let formulas = match self.formulas_for(job) {
            Ok(formulas) => formulas,
            Err(message) => return SkillError::new(SkillErrorKind::Validation, message).into(),
        };

        let (progress, mut updates) = ProgressReporter::channel();
        let cancel = CancellationToken::new();
        let ctx = SkillContext::new(job.id, job.owner_id.clone(), job.input.clone())
            .with_resource(job.resource_id.clone())
            .with_config(formulas)
            .with_progress(progress)
            .with_cancel(cancel.clone());

        let validation = validate_guarded(skill.as_ref(), &ctx);
        if !validation.is_valid() {
            return SkillError::validation(&validation).into();
        }

        let execution = run_guarded(skill.as_ref(), &ctx);
        tokio::pin!(execution);

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        // First tick completes immediately.
        heartbeat.tick().await;

        let result = loop {
            tokio::select! {
                result = &mut execution => break result,
                Some(update) = updates.recv() => self.relay_progress(job.id, update).await,
                _ = heartbeat.tick() => self.beat(job.id, &cancel).await,
            }
        };

        while let Ok(update) = updates.try_recv() {
            self.relay_progress(job.id, update).await;
        }

        let usage = result.metadata.ai_usage.clone().unwrap_or_default();
        debug!(
            job_id = %job.id,
            skill = %result.metadata.skill_name,
            duration_ms = result.metadata.duration_ms,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = %usage.cost_usd,
            "Skill returned"
        );

        match result.outcome {
            SkillOutcome::Success { data } => Outcome::Completed(data),
            SkillOutcome::Failure { error } => error.into(),
        }
    }

    /// The job's own formula snapshot, or the worker's formulas.
    fn formulas_for(&self, job: &Job) -> Result<FormulaConfig, String> {
        match job.input.get(FORMULA_SNAPSHOT_KEY) {
            None | Some(serde_json::Value::Null) => Ok(self.config.formulas.clone()),
            Some(snapshot) => serde_json::from_value(snapshot.clone())
                .map_err(|e| format!("{FORMULA_SNAPSHOT_KEY}: {e}")),
        }
    }

    async fn relay_progress(&self, job_id: Uuid, update: ProgressUpdate) {
        match self
            .store
            .update_progress(job_id, self.id(), update.percent, &update.step)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %job_id, "Progress ignored; job no longer owned"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to record progress"),
        }
    }

    async fn beat(&self, job_id: Uuid, cancel: &CancellationToken) {
        match self.store.heartbeat(job_id, self.id()).await {
            Ok(Some(false)) => {}
            Ok(Some(true)) => {
                if !cancel.is_cancelled() {
                    info!(job_id = %job_id, "Cancellation requested");
                    cancel.cancel();
                }
            }
            Ok(None) => {
                if !cancel.is_cancelled() {
                    warn!(job_id = %job_id, worker_id = %self.id(), "Lost ownership of job; cancelling");
                    cancel.cancel();
                }
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "Heartbeat failed"),
        }
    }

    async fn finish(&self, job_id: Uuid, outcome: Outcome) {
        let written = match &outcome {
            Outcome::Completed(data) => self.store.complete(job_id, self.id(), data).await,
            Outcome::Failed { code, message } => {
                self.store.fail(job_id, self.id(), code, message).await
            }
        };

        match (written, outcome) {
            (Ok(job), Outcome::Completed(_)) => {
                info!(job_id = %job_id, elapsed = ?job.elapsed(), "Job completed")
            }
            (Ok(job), Outcome::Failed { code, message }) => warn!(
                job_id = %job_id,
                code = %code,
                error = %message,
                elapsed = ?job.elapsed(),
                "Job failed"
            ),
            (Err(JobError::InvalidTransition { .. }), _) => warn!(
                job_id = %job_id,
                worker_id = %self.id(),
                "Job left this worker before finishing; result discarded"
            ),
            (Err(e), _) => error!(job_id = %job_id, error = %e, "Failed to record job outcome"),
        }
    }
}
