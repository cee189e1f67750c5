//! Error types for WasteWise.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Job lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} is {actual}, not {expected} for worker {worker}; cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        actual: String,
        expected: String,
        worker: String,
        target: String,
    },

    #[error("Job store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Skill registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Skill {name} is already registered")]
    DuplicateSkill { name: String },
}

/// Document extraction service errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extraction request for {document} failed: {reason}")]
    RequestFailed { document: String, reason: String },

    #[error("Extraction service rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid extraction response for {document}: {reason}")]
    InvalidResponse { document: String, reason: String },

    #[error("Extraction of {document} was cancelled")]
    Cancelled { document: String },
}

/// Report rendering / upload errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Report rendering failed: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
