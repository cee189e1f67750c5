//! `JobStore` trait: single async interface for job persistence.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{DatabaseError, JobError};
use crate::worker::state::{Job, JobStatus, NewJob};

/// Backend-agnostic job store.
///
/// Every state-changing call is a single conditional write: a job only moves
/// `pending → processing` if it is still pending, and only the worker that
/// claimed a job can write its progress, result or error.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Insert a new job in `pending`.
    async fn create(&self, job: NewJob) -> Result<Job, DatabaseError>;

    /// Atomically claim the oldest pending job for `worker_id`.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, DatabaseError>;

    /// Record progress. A no-op (returns `false`) unless the job is
    /// processing and owned by `worker_id`. Progress never decreases.
    async fn update_progress(
        &self,
        job_id: Uuid,
        worker_id: &str,
        percent: u8,
        step: &str,
    ) -> Result<bool, DatabaseError>;

    /// Refresh the heartbeat. Returns whether cancellation was requested,
    /// or `None` if the job is no longer owned by `worker_id`.
    async fn heartbeat(&self, job_id: Uuid, worker_id: &str)
        -> Result<Option<bool>, DatabaseError>;

    /// `processing → completed` with the result payload.
    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> Result<Job, JobError>;

    /// `processing → failed` with a stable error code and message.
    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        code: &str,
        message: &str,
    ) -> Result<Job, JobError>;

    /// Get a job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// List jobs, newest first.
    async fn list(
        &self,
        owner_id: Option<&str>,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<Job>, DatabaseError>;

    /// Ask for cancellation. Returns `false` (and changes nothing) when the
    /// job is already terminal.
    async fn request_cancel(&self, job_id: Uuid) -> Result<bool, JobError>;

    /// Fail every processing job whose heartbeat is older than `threshold`
    /// with code `WorkerLost`, returning the failed jobs.
    async fn fail_stale(&self, threshold: Duration) -> Result<Vec<Job>, DatabaseError>;

    /// Submit a fresh pending attempt of a failed job.
    async fn requeue(&self, job: &Job) -> Result<Job, DatabaseError>;
}
