//! HTTP facade
//!
//! Thin axum layer over the orchestrator: body parsing, status-code
//! mapping, CORS. All orchestration semantics live behind
//! [`Orchestrator`]; handlers here only translate.
//!
//! ## Endpoints
//!
//! - `POST /api/proof/generate` - submit a proof job, returns `jobId`
//!   (add `?sync=true` to wait for the outcome instead)
//! - `GET /api/proof/status/:job_id` - poll job status
//! - `GET /health` - liveness probe

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use proof_engine::{AnonAadhaarProof, ProofInput};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::orchestrator::{Orchestrator, SubmitError};
use crate::registry::{JobCounts, JobStatus, JobView};

// ============================================================================
// API Types
// ============================================================================

/// Response envelope shared by all endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
    Success {
        data: T,
    },
    Error {
        message: String,
        code: Option<String>,
    },
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse::Success { data }
    }

    pub fn error_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        ApiResponse::Error {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

/// Body of `POST /api/proof/generate`. Fields are optional so the
/// facade can reject incomplete bodies with a 400 instead of a serde
/// parse error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofRequest {
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub signal: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateParams {
    /// Wait for the outcome instead of returning a job id.
    #[serde(default)]
    pub sync: bool,
}

/// Async-mode response: the job was admitted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub status_url: String,
}

/// Sync-mode response: the finished proof.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProofResponse {
    pub proof: AnonAadhaarProof,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub workers: usize,
    pub jobs: JobCounts,
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router.
pub fn app(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/proof/generate", post(generate_handler))
        .route("/api/proof/status/:job_id", get(status_handler))
        // Secure QR payloads run to several MB of decimal digits; the
        // default 2 MB body cap rejects them.
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(orchestrator)
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness probe; 200 whenever the process accepts connections.
async fn health_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        workers: orchestrator.worker_count(),
        jobs: orchestrator.counts().await,
    }))
}

/// Submit a proof job.
async fn generate_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(params): Query<GenerateParams>,
    Json(request): Json<GenerateProofRequest>,
) -> Response {
    // Reject incomplete bodies before touching the core.
    let (Some(qr_code), Some(signal)) = (request.qr_code, request.signal) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error_with_code(
                "qrCode and signal are required",
                "INVALID_INPUT",
            )),
        )
            .into_response();
    };

    let input = ProofInput {
        qr_data: qr_code,
        signal,
    };

    let view = match orchestrator.submit(input).await {
        Ok(view) => view,
        Err(e) => return submit_error_response(e),
    };

    if !params.sync {
        let response = GenerateProofResponse {
            status_url: format!("/api/proof/status/{}", view.job_id),
            job_id: view.job_id,
            status: view.status,
        };
        return (StatusCode::OK, Json(ApiResponse::success(response))).into_response();
    }

    // Synchronous mode: block this request (not the process) on the
    // terminal outcome and map it onto HTTP status codes.
    match orchestrator.wait(&view.job_id).await {
        Some(done) => terminal_response(done),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::error_with_code(
                "job evicted before completion",
                "NOT_FOUND",
            )),
        )
            .into_response(),
    }
}

/// Poll job status.
async fn status_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(job_id): Path<String>,
) -> Response {
    match orchestrator.status(&job_id).await {
        Some(view) => (StatusCode::OK, Json(ApiResponse::success(view))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error_with_code(
                format!("Job {} not found", job_id),
                "NOT_FOUND",
            )),
        )
            .into_response(),
    }
}

// ============================================================================
// Status mapping
// ============================================================================

fn submit_error_response(error: SubmitError) -> Response {
    let status = match &error {
        SubmitError::ArtifactUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SubmitError::WorkersUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        SubmitError::InvalidInput(_) => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(ApiResponse::<()>::error_with_code(
            error.to_string(),
            error.kind().as_code(),
        )),
    )
        .into_response()
}

/// Terminal state to HTTP: completed 200, failed 500, timed out 504.
fn terminal_response(view: JobView) -> Response {
    match (view.status, view.result, view.error) {
        (JobStatus::Completed, Some(proof), _) => (
            StatusCode::OK,
            Json(ApiResponse::success(SyncProofResponse { proof })),
        )
            .into_response(),
        (JobStatus::TimedOut, _, error) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ApiResponse::<()>::error_with_code(
                error.map(|e| e.message).unwrap_or_default(),
                "DEADLINE_EXCEEDED",
            )),
        )
            .into_response(),
        (_, _, Some(error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::error_with_code(
                error.message,
                error.kind.as_code(),
            )),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::error_with_code(
                "job finished without result or error",
                "INTERNAL_ERROR",
            )),
        )
            .into_response(),
    }
}
