//! Stuck-job repair loop.
//!
//! A processing job whose heartbeat is older than the stuck threshold lost
//! its worker. Each check fails those jobs with `WorkerLost` and submits a
//! fresh attempt for every job that still has attempts left.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RepairConfig;
use crate::store::JobStore;

/// What one repair check did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub lost: usize,
    pub requeued: usize,
}

/// Spawn the repair loop. The first check runs immediately.
pub fn spawn_repair_loop(
    store: Arc<dyn JobStore>,
    config: RepairConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = config.repair_check_interval.as_secs(),
            stuck_threshold_secs = config.stuck_threshold.as_secs(),
            "Repair loop started"
        );

        let mut tick = tokio::time::interval(config.repair_check_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    run_repair_cycle(store.as_ref(), &config).await;
                }
            }
        }

        info!("Repair loop stopped");
    })
}

/// Single repair check: fail lost jobs, then requeue the ones with attempts left.
pub async fn run_repair_cycle(store: &dyn JobStore, config: &RepairConfig) -> RepairReport {
    let lost = match store.fail_stale(config.stuck_threshold).await {
        Ok(lost) => lost,
        Err(e) => {
            warn!(error = %e, "Failed to scan for stuck jobs");
            return RepairReport::default();
        }
    };

    if lost.is_empty() {
        debug!("No stuck jobs");
        return RepairReport::default();
    }

    let mut report = RepairReport {
        lost: lost.len(),
        requeued: 0,
    };
    for job in lost {
        warn!(
            job_id = %job.id,
            skill = %job.skill_name,
            worker_id = job.claimed_by.as_deref().unwrap_or("unknown"),
            attempt = job.attempt,
            "Job lost its worker"
        );

        if job.attempt >= config.max_repair_attempts {
            warn!(job_id = %job.id, attempt = job.attempt, "Retry limit reached; leaving job failed");
            continue;
        }

        match store.requeue(&job).await {
            Ok(_) => report.requeued += 1,
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to requeue lost job"),
        }
    }

    info!(lost = report.lost, requeued = report.requeued, "Repair check complete");
    report
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::LibSqlBackend;
    use crate::worker::state::{JobStatus, NewJob, WORKER_LOST_CODE};

    fn config(max_attempts: u32) -> RepairConfig {
        RepairConfig {
            stuck_threshold: Duration::from_millis(5),
            max_repair_attempts: max_attempts,
            repair_check_interval: Duration::from_millis(10),
        }
    }

    async fn abandoned_job(store: &LibSqlBackend) -> uuid::Uuid {
        let job = store
            .create(NewJob::new("bulk-subscription", serde_json::json!({}), "owner"))
            .await
            .unwrap();
        store.claim_next("crashed-worker").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        job.id
    }

    #[tokio::test]
    async fn lost_job_fails_and_is_requeued() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let id = abandoned_job(&store).await;

        let report = run_repair_cycle(&store, &config(3)).await;
        assert_eq!(report, RepairReport { lost: 1, requeued: 1 });

        let lost = store.get(id).await.unwrap().unwrap();
        assert_eq!(lost.status, JobStatus::Failed);
        assert_eq!(lost.error.unwrap().code, WORKER_LOST_CODE);

        let retry = store.claim_next("healthy-worker").await.unwrap().unwrap();
        assert_eq!(retry.retry_of, Some(id));
        assert_eq!(retry.attempt, 2);
    }

    #[tokio::test]
    async fn retry_limit_leaves_job_failed() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        abandoned_job(&store).await;

        let report = run_repair_cycle(&store, &config(1)).await;
        assert_eq!(report, RepairReport { lost: 1, requeued: 0 });
        assert!(store.claim_next("healthy-worker").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn healthy_jobs_are_left_alone() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        store
            .create(NewJob::new("bulk-subscription", serde_json::json!({}), "owner"))
            .await
            .unwrap();
        store.claim_next("w1").await.unwrap();

        let mut relaxed = config(3);
        relaxed.stuck_threshold = Duration::from_secs(300);
        assert_eq!(run_repair_cycle(&store, &relaxed).await, RepairReport::default());
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let id = abandoned_job(&store).await;
        let shutdown = CancellationToken::new();

        let handle = spawn_repair_loop(store.clone(), config(3), shutdown.clone());
        for _ in 0..50 {
            if store.get(id).await.unwrap().unwrap().status == JobStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Failed);
    }
}
