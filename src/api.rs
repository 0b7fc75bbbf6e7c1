//! HTTP surface: submission, status, pool and health routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{Result, VanityError};
use crate::gate::AdmissionGate;
use crate::pool::{PoolEntry, PoolSource, PoolWarmer};
use crate::scheduler::{Job, JobQueue, JobResult, JobStatus, Submission};
use crate::store::JobStore;

#[derive(Clone)]
pub struct ApiState {
    pub queue: JobQueue,
    pub store: Arc<dyn JobStore>,
    pub pool: PoolWarmer,
    pub gate: Arc<AdmissionGate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub request_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub request_id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            request_id: job.request_id,
            status: job.status,
            result: job.result,
            error: job.error,
            submitted_at: job.request.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolQuery {
    pub requester_key: String,
    pub subject_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolTakeResponse {
    pub entry: PoolEntry,
    pub source: PoolSource,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolRefillResponse {
    pub pool_size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub pending: u64,
    pub active: u64,
    pub pool_total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for VanityError {
    fn into_response(self) -> Response {
        let status = match &self {
            VanityError::InvalidKey(_)
            | VanityError::InvalidPattern(_)
            | VanityError::InvalidJobId(_)
            | VanityError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            VanityError::JobNotFound(_) => StatusCode::NOT_FOUND,
            VanityError::JobExists(_) => StatusCode::CONFLICT,
            VanityError::Unauthorized => StatusCode::UNAUTHORIZED,
            VanityError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            VanityError::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            VanityError::Store(_) | VanityError::Redis(_) => StatusCode::BAD_GATEWAY,
            VanityError::Io(_) | VanityError::Serialization(_) | VanityError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Request failed");
        }

        let retry_after = match &self {
            VanityError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/jobs", post(submit_handler))
        .route("/api/jobs/{id}", get(status_handler))
        .route("/api/pool", get(pool_take_handler).put(pool_refill_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `cancel` fires.
pub async fn serve(addr: SocketAddr, state: ApiState, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

async fn health_handler(State(state): State<ApiState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        pending: state.store.pending_count().await?,
        active: state.store.active_count().await?,
        pool_total: state.pool.total().await?,
    }))
}

async fn submit_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(submission): Json<Submission>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let submitter = state.gate.admit(authorization(&headers)).await?;
    let job = state.queue.submit(submission, &submitter).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            request_id: job.request_id,
        }),
    ))
}

async fn status_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>> {
    let job = state.queue.status(&id).await?;
    Ok(Json(job.into()))
}

async fn pool_take_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<PoolQuery>,
) -> Result<Json<PoolTakeResponse>> {
    state.gate.admit(authorization(&headers)).await?;
    let (entry, source) = state
        .pool
        .take(&query.requester_key, &query.subject_key)
        .await?;
    Ok(Json(PoolTakeResponse { entry, source }))
}

async fn pool_refill_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(query): Json<PoolQuery>,
) -> Result<Json<PoolRefillResponse>> {
    state.gate.admit(authorization(&headers)).await?;
    let pool_size = state
        .pool
        .refill_now(&query.requester_key, &query.subject_key)
        .await?;
    Ok(Json(PoolRefillResponse { pool_size }))
}
