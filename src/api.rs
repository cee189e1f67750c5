//! REST endpoints for job submission and status.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::skills::SkillRegistry;
use crate::store::JobStore;
use crate::worker::state::{JobStatus, NewJob};

const DEFAULT_LIST_LIMIT: u32 = 50;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<SkillRegistry>,
}

/// Build the Axum router with the job and skill routes.
pub fn routes(store: Arc<dyn JobStore>, registry: Arc<SkillRegistry>) -> Router {
    let state = AppState { store, registry };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(submit_job).get(list_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/skills", get(list_skills))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn parse_job_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid job ID"))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "wastewise"
    }))
}

// ── Jobs ────────────────────────────────────────────────────────────────

/// POST /api/jobs
///
/// The skill name is not checked here; an unknown skill fails the job with
/// `SkillNotFound` once a worker picks it up.
async fn submit_job(State(state): State<AppState>, Json(body): Json<NewJob>) -> Response {
    if body.skill_name.trim().is_empty() || body.owner_id.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "skill_name and owner_id are required",
        );
    }

    match state.store.create(body).await {
        Ok(job) => {
            info!(job_id = %job.id, skill = %job.skill_name, owner = %job.owner_id, "Job submitted");
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "job_id": job.id, "status": job.status })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to create job");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create job")
        }
    }
}

/// GET /api/jobs/{id}
async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.store.get(job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Failed to load job");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load job")
        }
    }
}

/// POST /api/jobs/{id}/cancel
///
/// `cancel_requested` is `false` for jobs that are already terminal.
async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.store.request_cancel(job_id).await {
        Ok(requested) => {
            if requested {
                info!(job_id = %job_id, "Cancellation requested");
            }
            Json(serde_json::json!({ "cancel_requested": requested })).into_response()
        }
        Err(JobError::NotFound { .. }) => error_response(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Failed to request cancellation");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to cancel job")
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    owner_id: Option<String>,
    status: Option<String>,
    limit: Option<u32>,
}

/// GET /api/jobs?owner_id=&status=&limit=
async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let status = match query.status.as_deref().map(str::parse::<JobStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(_)) => return error_response(StatusCode::BAD_REQUEST, "Invalid status"),
    };

    match state
        .store
        .list(
            query.owner_id.as_deref(),
            status,
            query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await
    {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to list jobs");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list jobs")
        }
    }
}

// ── Skills ──────────────────────────────────────────────────────────────

async fn list_skills(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.descriptors())
}
