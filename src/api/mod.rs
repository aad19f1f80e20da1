use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::controller::Controller;
use crate::db::JobRecord;
use crate::error::{ControllerError, OrchestratorError};
use crate::manifest::JobRequest;

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<Controller>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: String,
    pub namespace: String,
    pub status: String,
    pub deleted: bool,
    pub pod: Option<String>,
    pub restart_count: u32,
    pub max_restart_count: u32,
    pub has_log: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobResponse {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            namespace: record.handle.namespace.clone(),
            status: record.status.to_string(),
            deleted: record.deleted,
            pod: record.pod_name().map(str::to_string),
            restart_count: record.restart_count,
            max_restart_count: record.max_restart_count,
            has_log: record.log.is_some(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub success: bool,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobLogResponse {
    pub job_id: String,
    pub log: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(err: &ControllerError) -> StatusCode {
    match err {
        ControllerError::Conflict(_) | ControllerError::DuplicateKey(_) => StatusCode::CONFLICT,
        ControllerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ControllerError::JobNotFound(_) => StatusCode::NOT_FOUND,
        ControllerError::Orchestrator(OrchestratorError::Transport(_)) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn not_found(job_id: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: ControllerError::JobNotFound(job_id.to_string()).to_string(),
        }),
    )
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/jobs", get(list_jobs_handler).post(submit_job_handler))
        .route("/api/jobs/{job_id}", get(get_job_handler))
        .route("/api/jobs/{job_id}/logs", get(job_logs_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Starting HTTP API");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn list_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let jobs: Vec<JobResponse> = state
        .controller
        .db()
        .all()
        .iter()
        .map(JobResponse::from)
        .collect();
    Json(jobs)
}

async fn get_job_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, (StatusCode, Json<ErrorResponse>)> {
    let record = state
        .controller
        .db()
        .get(&job_id)
        .map_err(|_| not_found(&job_id))?;
    Ok(Json(JobResponse::from(&record)))
}

async fn job_logs_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobLogResponse>, (StatusCode, Json<ErrorResponse>)> {
    let record = state
        .controller
        .db()
        .get(&job_id)
        .map_err(|_| not_found(&job_id))?;
    Ok(Json(JobLogResponse {
        job_id: record.job_id,
        log: record.log,
    }))
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    Json(mut request): Json<JobRequest>,
) -> impl IntoResponse {
    if request.job_id.trim().is_empty() {
        request.job_id = Uuid::new_v4().to_string();
    }
    let job_id = request.job_id.clone();

    match state.controller.submit(request).await {
        Ok(_) => (
            StatusCode::CREATED,
            Json(SubmitJobResponse {
                success: true,
                job_id: Some(job_id),
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(SubmitJobResponse {
                success: false,
                job_id: Some(job_id),
                error: Some(e.to_string()),
            }),
        ),
    }
}
