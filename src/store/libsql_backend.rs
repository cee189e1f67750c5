//! libSQL backend for the async `JobStore` implementation.
//!
//! Supports local file and in-memory databases. Several worker processes can
//! share one database file; every transition is a single conditional
//! `UPDATE … RETURNING` so claims and terminal writes never race.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DatabaseError, JobError};
use crate::store::migrations;
use crate::store::traits::JobStore;
use crate::worker::state::{Job, JobFailure, JobStatus, NewJob, WORKER_LOST_CODE};

/// Column list for job SELECT / RETURNING clauses (19 columns).
const JOB_COLUMNS: &str = "id, owner_id, resource_id, skill_name, status, input, result, progress, current_step, error_code, error_message, claimed_by, cancel_requested, attempt, retry_of, created_at, started_at, heartbeat_at, completed_at";

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.set_busy_timeout().await?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn set_busy_timeout(&self) -> Result<(), DatabaseError> {
        // PRAGMA busy_timeout answers with a row, so it goes through query().
        let mut rows = self
            .conn
            .query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("busy_timeout: {e}")))?;
        while let Ok(Some(_)) = rows.next().await {}
        Ok(())
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn insert_job(
        &self,
        job: &NewJob,
        attempt: u32,
        retry_of: Option<Uuid>,
    ) -> Result<Job, DatabaseError> {
        let id = Uuid::new_v4();
        let input = serde_json::to_string(&job.payload)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let rows = self
            .query_jobs(
                "create",
                &format!(
                    "INSERT INTO jobs (id, owner_id, resource_id, skill_name, status, input, progress, attempt, retry_of, created_at)
                     VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0, ?6, ?7, ?8)
                     RETURNING {JOB_COLUMNS}"
                ),
                params![
                    id.to_string(),
                    job.owner_id.as_str(),
                    job.resource_id.clone(),
                    job.skill_name.as_str(),
                    input,
                    attempt as i64,
                    retry_of.map(|id| id.to_string()),
                    timestamp(Utc::now()),
                ],
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| DatabaseError::Query("create: insert returned no row".to_string()))
    }

    /// Run a statement returning job rows and read it to completion.
    async fn query_jobs(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut jobs = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => jobs.push(row_to_job(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op} row: {e}"))),
            }
        }
        Ok(jobs)
    }

    /// Explain why a guarded transition matched no row.
    async fn transition_error(&self, job_id: Uuid, worker_id: &str, target: JobStatus) -> JobError {
        match self.get(job_id).await {
            Ok(Some(job)) => {
                // Right status, wrong owner.
                let actual = if job.status.can_transition_to(target) {
                    format!("claimed by {}", job.claimed_by.as_deref().unwrap_or("another worker"))
                } else {
                    job.status.to_string()
                };
                JobError::InvalidTransition {
                    id: job_id,
                    actual,
                    expected: JobStatus::Processing.to_string(),
                    worker: worker_id.to_string(),
                    target: target.to_string(),
                }
            }
            Ok(None) => JobError::NotFound { id: job_id },
            Err(e) => JobError::Store(e),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so timestamps compare correctly as text.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_json(column: &str, raw: &str) -> Result<serde_json::Value, DatabaseError> {
    serde_json::from_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("job.{column}: {e}")))
}

/// Map a libsql Row to a Job. Column order matches `JOB_COLUMNS`.
fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let col = |name: &str, e: libsql::Error| DatabaseError::Query(format!("job.{name}: {e}"));

    let id_str: String = row.get(0).map_err(|e| col("id", e))?;
    let status_str: String = row.get(4).map_err(|e| col("status", e))?;
    let input_str: String = row.get(5).map_err(|e| col("input", e))?;
    let result_str: Option<String> = row.get(6).map_err(|e| col("result", e))?;
    let progress: i64 = row.get(7).map_err(|e| col("progress", e))?;
    let error_code: Option<String> = row.get(9).map_err(|e| col("error_code", e))?;
    let error_message: Option<String> = row.get(10).map_err(|e| col("error_message", e))?;
    let cancel_requested: i64 = row.get(12).map_err(|e| col("cancel_requested", e))?;
    let attempt: i64 = row.get(13).map_err(|e| col("attempt", e))?;
    let retry_of: Option<String> = row.get(14).map_err(|e| col("retry_of", e))?;
    let created_str: String = row.get(15).map_err(|e| col("created_at", e))?;
    let started_str: Option<String> = row.get(16).map_err(|e| col("started_at", e))?;
    let heartbeat_str: Option<String> = row.get(17).map_err(|e| col("heartbeat_at", e))?;
    let completed_str: Option<String> = row.get(18).map_err(|e| col("completed_at", e))?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("job.id: {e}")))?;
    let status: JobStatus = status_str.parse().map_err(DatabaseError::Serialization)?;

    let job = Job {
        id,
        owner_id: row.get(1).map_err(|e| col("owner_id", e))?,
        resource_id: row.get(2).map_err(|e| col("resource_id", e))?,
        skill_name: row.get(3).map_err(|e| col("skill_name", e))?,
        status,
        input: parse_json("input", &input_str)?,
        result: result_str
            .as_deref()
            .map(|raw| parse_json("result", raw))
            .transpose()?,
        progress: progress.clamp(0, 100) as u8,
        current_step: row.get(8).map_err(|e| col("current_step", e))?,
        error: error_code.map(|code| JobFailure {
            code,
            message: error_message.unwrap_or_default(),
        }),
        claimed_by: row.get(11).map_err(|e| col("claimed_by", e))?,
        cancel_requested: cancel_requested != 0,
        attempt: attempt.max(1) as u32,
        retry_of: retry_of.and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: parse_datetime(&created_str),
        started_at: parse_optional_datetime(&started_str),
        heartbeat_at: parse_optional_datetime(&heartbeat_str),
        completed_at: parse_optional_datetime(&completed_str),
    };
    if !job.is_consistent() {
        return Err(DatabaseError::Serialization(format!(
            "job {id} is {status} with result/error columns out of step"
        )));
    }
    Ok(job)
}

// ── JobStore implementation ─────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn create(&self, job: NewJob) -> Result<Job, DatabaseError> {
        let created = self.insert_job(&job, 1, None).await?;
        debug!(job_id = %created.id, skill = %created.skill_name, "Job created");
        Ok(created)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, DatabaseError> {
        let now = timestamp(Utc::now());
        let claimed = self
            .query_jobs(
                "claim_next",
                &format!(
                    "UPDATE jobs
                     SET status = 'processing', claimed_by = ?1, started_at = ?2, heartbeat_at = ?2,
                         current_step = 'claimed'
                     WHERE id = (
                         SELECT id FROM jobs WHERE status = 'pending'
                         ORDER BY created_at ASC, rowid ASC LIMIT 1
                     )
                     AND status = 'pending'
                     RETURNING {JOB_COLUMNS}"
                ),
                params![worker_id, now],
            )
            .await?;

        let job = claimed.into_iter().next();
        if let Some(ref job) = job {
            debug!(job_id = %job.id, worker = worker_id, "Job claimed");
        }
        Ok(job)
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        worker_id: &str,
        percent: u8,
        step: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET progress = MAX(progress, ?1), current_step = ?2, heartbeat_at = ?3
                 WHERE id = ?4 AND status = 'processing' AND claimed_by = ?5",
                params![
                    percent.min(100) as i64,
                    step,
                    timestamp(Utc::now()),
                    job_id.to_string(),
                    worker_id
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_progress: {e}")))?;
        Ok(count > 0)
    }

    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> Result<Option<bool>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "UPDATE jobs SET heartbeat_at = ?1
                 WHERE id = ?2 AND status = 'processing' AND claimed_by = ?3
                 RETURNING cancel_requested",
                params![timestamp(Utc::now()), job_id.to_string(), worker_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("heartbeat: {e}")))?;

        let mut cancel_requested = None;
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let flag: i64 = row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("heartbeat row: {e}")))?;
                    cancel_requested = Some(flag != 0);
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("heartbeat row: {e}"))),
            }
        }
        Ok(cancel_requested)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> Result<Job, JobError> {
        let result_str = serde_json::to_string(result)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let updated = self
            .query_jobs(
                "complete",
                &format!(
                    "UPDATE jobs
                     SET status = 'completed', result = ?1, progress = 100, current_step = 'completed',
                         completed_at = ?2
                     WHERE id = ?3 AND status = 'processing' AND claimed_by = ?4
                     RETURNING {JOB_COLUMNS}"
                ),
                params![result_str, timestamp(Utc::now()), job_id.to_string(), worker_id],
            )
            .await?;

        match updated.into_iter().next() {
            Some(job) => {
                info!(job_id = %job_id, skill = %job.skill_name, "Job completed");
                Ok(job)
            }
            None => Err(self
                .transition_error(job_id, worker_id, JobStatus::Completed)
                .await),
        }
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        code: &str,
        message: &str,
    ) -> Result<Job, JobError> {
        let updated = self
            .query_jobs(
                "fail",
                &format!(
                    "UPDATE jobs
                     SET status = 'failed', error_code = ?1, error_message = ?2, completed_at = ?3
                     WHERE id = ?4 AND status = 'processing' AND claimed_by = ?5
                     RETURNING {JOB_COLUMNS}"
                ),
                params![code, message, timestamp(Utc::now()), job_id.to_string(), worker_id],
            )
            .await?;

        match updated.into_iter().next() {
            Some(job) => {
                info!(job_id = %job_id, skill = %job.skill_name, code, "Job failed");
                Ok(job)
            }
            None => Err(self.transition_error(job_id, worker_id, JobStatus::Failed).await),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let jobs = self
            .query_jobs(
                "get",
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id.to_string()],
            )
            .await?;
        Ok(jobs.into_iter().next())
    }

    async fn list(
        &self,
        owner_id: Option<&str>,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<Job>, DatabaseError> {
        let mut clauses = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        if let Some(owner) = owner_id {
            values.push(owner.to_string().into());
            clauses.push(format!("owner_id = ?{}", values.len()));
        }
        if let Some(status) = status {
            values.push(status.as_str().to_string().into());
            clauses.push(format!("status = ?{}", values.len()));
        }
        values.push((limit as i64).into());
        let limit_param = values.len();

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        self.query_jobs(
            "list",
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs {where_clause}
                 ORDER BY created_at DESC, rowid DESC LIMIT ?{limit_param}"
            ),
            values,
        )
        .await
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<bool, JobError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET cancel_requested = 1
                 WHERE id = ?1 AND status IN ('pending', 'processing')",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("request_cancel: {e}")))?;

        if count > 0 {
            info!(job_id = %job_id, "Cancellation requested");
            return Ok(true);
        }

        match self.get(job_id).await? {
            Some(job) => {
                debug!(job_id = %job_id, status = %job.status, "Cancel ignored for terminal job");
                Ok(false)
            }
            None => Err(JobError::NotFound { id: job_id }),
        }
    }

    async fn fail_stale(&self, threshold: Duration) -> Result<Vec<Job>, DatabaseError> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| DatabaseError::Query(format!("fail_stale threshold: {e}")))?;
        let now = Utc::now();
        let cutoff = timestamp(now - threshold);

        self.query_jobs(
            "fail_stale",
            &format!(
                "UPDATE jobs
                 SET status = 'failed', error_code = ?1,
                     error_message = 'Worker ' || COALESCE(claimed_by, 'unknown') || ' stopped heartbeating',
                     completed_at = ?2
                 WHERE status = 'processing' AND (heartbeat_at IS NULL OR heartbeat_at < ?3)
                 RETURNING {JOB_COLUMNS}"
            ),
            params![WORKER_LOST_CODE, timestamp(now), cutoff],
        )
        .await
    }

    async fn requeue(&self, job: &Job) -> Result<Job, DatabaseError> {
        let new_job = NewJob {
            skill_name: job.skill_name.clone(),
            owner_id: job.owner_id.clone(),
            resource_id: job.resource_id.clone(),
            payload: job.input.clone(),
        };
        let requeued = self
            .insert_job(&new_job, job.attempt + 1, Some(job.id))
            .await?;
        info!(
            job_id = %requeued.id,
            retry_of = %job.id,
            attempt = requeued.attempt,
            "Job requeued"
        );
        Ok(requeued)
    }
}
