use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use broker_core::{parse_worker_caps, TerminalOutcome};

use crate::auth::{BotAuth, WorkerAuth};
use crate::dto::{
    HealthResponse, JobCreateRequest, JobCreateResponse, JobFailRequest, JobResultRequest,
    NextJobResponse, TerminalResponse,
};
use crate::error::ApiError;
use crate::AppState;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true, ts_bound: true })
}

pub async fn create_job(
    _auth: BotAuth,
    State(state): State<AppState>,
    Json(body): Json<JobCreateRequest>,
) -> Result<Json<JobCreateResponse>, ApiError> {
    let job = state
        .store
        .create_job(body.command, body.payload, body.requires)
        .await?;
    tracing::info!(job_id = %job.id, "job created");
    Ok(Json(JobCreateResponse { id: job.id, status: "queued" }))
}

pub async fn get_job(
    _auth: BotAuth,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<broker_core::Job>, ApiError> {
    let job = state.store.get_job(&job_id).await?.ok_or(broker_core::BrokerError::NotFound)?;
    Ok(Json(job))
}

pub async fn next_job(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<NextJobResponse>, ApiError> {
    let worker_id = headers
        .get("X-Worker-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let worker_caps = parse_worker_caps(headers.get("X-Worker-Caps").and_then(|v| v.to_str().ok()));

    let job = state.store.claim_next(worker_id, worker_caps).await?;
    if let Some(job) = &job {
        tracing::info!(job_id = %job.id, command = %job.command, "job claimed");
    }
    Ok(Json(NextJobResponse { job }))
}

pub async fn post_result(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<JobResultRequest>,
) -> Result<Json<TerminalResponse>, ApiError> {
    let outcome = state.store.post_result(&job_id, body.result).await?;
    Ok(Json(outcome_response(outcome)))
}

pub async fn post_fail(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<JobFailRequest>,
) -> Result<Json<TerminalResponse>, ApiError> {
    let outcome = state.store.post_fail(&job_id, body.error).await?;
    Ok(Json(outcome_response(outcome)))
}

fn outcome_response(outcome: TerminalOutcome) -> TerminalResponse {
    TerminalResponse {
        ok: true,
        status: outcome.status_str(),
        note: outcome.note(),
    }
}
