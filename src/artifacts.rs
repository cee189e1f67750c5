//! Report artifact output.
//!
//! The orchestrator hands its assembled report to a [`ReportRenderer`] and
//! records the storage locations it returns. The binary report formats are
//! the renderer's business; the default [`JsonReportWriter`] writes the report
//! as JSON under a per-job directory.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ArtifactError;

/// Where a rendered artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    /// Artifact format, e.g. `json`, `xlsx`, `html`.
    pub kind: String,
    /// File path or URL.
    pub location: String,
}

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(
        &self,
        job_id: Uuid,
        report: &serde_json::Value,
    ) -> Result<Vec<ArtifactLocation>, ArtifactError>;
}

/// Writes `<root>/<job_id>/analysis.json`.
pub struct JsonReportWriter {
    root: PathBuf,
}

impl JsonReportWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ReportRenderer for JsonReportWriter {
    async fn render(
        &self,
        job_id: Uuid,
        report: &serde_json::Value,
    ) -> Result<Vec<ArtifactLocation>, ArtifactError> {
        let dir = self.root.join(job_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join("analysis.json");
        let body = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, body).await?;

        tracing::debug!(job_id = %job_id, path = %path.display(), "Report written");
        Ok(vec![ArtifactLocation {
            kind: "json".to_string(),
            location: path.display().to_string(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_report_under_job_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = JsonReportWriter::new(tmp.path());
        let job_id = Uuid::new_v4();

        let locations = writer
            .render(job_id, &serde_json::json!({"headline": "x"}))
            .await
            .unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].kind, "json");

        let written = tokio::fs::read_to_string(&locations[0].location).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["headline"], "x");
        assert!(locations[0].location.contains(&job_id.to_string()));
    }
}
