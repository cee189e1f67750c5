//! Job state machine and the persisted job record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting to be claimed by a worker.
    Pending,
    /// Job has been claimed and its skill is running.
    Processing,
    /// Skill finished and the result is stored.
    Completed,
    /// Skill (or the worker running it) failed; the error is stored.
    Failed,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Stable error surfaced through the status interface for a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable code, e.g. `SkillNotFound`.
    pub code: String,
    /// Human-readable message. Never contains backtraces.
    pub message: String,
}

/// Error code written by the repair loop when a worker stops heartbeating.
pub const WORKER_LOST_CODE: &str = "WorkerLost";

/// A durable record of one submitted skill invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Identity of the submitter.
    pub owner_id: String,
    /// Resource (property, portfolio, ...) the job analyzes.
    pub resource_id: Option<String>,
    pub skill_name: String,
    pub status: JobStatus,
    pub input: serde_json::Value,
    /// Present iff `status == Completed`.
    pub result: Option<serde_json::Value>,
    /// 0–100, non-decreasing while processing.
    pub progress: u8,
    pub current_step: Option<String>,
    /// Present iff `status == Failed`.
    pub error: Option<JobFailure>,
    /// Worker that claimed the job.
    pub claimed_by: Option<String>,
    pub cancel_requested: bool,
    /// 1 for the original submission, incremented on each requeue.
    pub attempt: u32,
    /// Job this one re-runs after a lost worker.
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for submitting a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub skill_name: String,
    pub owner_id: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NewJob {
    pub fn new(
        skill_name: impl Into<String>,
        payload: serde_json::Value,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            skill_name: skill_name.into(),
            owner_id: owner_id.into(),
            resource_id: None,
            payload,
        }
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

impl Job {
    /// Check the result/error exclusivity invariant for the current status.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            JobStatus::Completed => self.result.is_some() && self.error.is_none(),
            JobStatus::Failed => self.error.is_some() && self.result.is_none(),
            JobStatus::Pending | JobStatus::Processing => {
                self.result.is_none() && self.error.is_none()
            }
        }
    }

    /// Get the duration since the job started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            let duration = end.signed_duration_since(start);
            Duration::from_millis(duration.num_milliseconds().max(0) as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus) -> Job {
        Job {
            id: Uuid::new_v4(),
            owner_id: "owner".to_string(),
            resource_id: None,
            skill_name: "bulk-subscription".to_string(),
            status,
            input: serde_json::json!({}),
            result: None,
            progress: 0,
            current_step: None,
            error: None,
            claimed_by: None,
            cancel_requested: false,
            attempt: 1,
            retry_of: None,
            created_at: Utc::now(),
            started_at: None,
            heartbeat_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn status_transitions_valid() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn status_transitions_invalid() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn status_parse_and_display_agree() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("in_progress".parse::<JobStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn consistency_invariant() {
        let mut completed = job(JobStatus::Completed);
        assert!(!completed.is_consistent());
        completed.result = Some(serde_json::json!({"ok": true}));
        assert!(completed.is_consistent());

        let mut failed = job(JobStatus::Failed);
        failed.error = Some(JobFailure {
            code: "Cancelled".to_string(),
            message: "cancelled".to_string(),
        });
        assert!(failed.is_consistent());
        failed.result = Some(serde_json::json!({}));
        assert!(!failed.is_consistent());

        assert!(job(JobStatus::Pending).is_consistent());
    }
}
