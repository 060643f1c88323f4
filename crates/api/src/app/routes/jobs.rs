use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use pixforge_infra::CancelOutcome;

use crate::app::routes::owned_job;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

/// GET /jobs?limit=N
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    match services.orchestrator.list_jobs(user.user_id(), query.limit()).await {
        Ok(jobs) => {
            let jobs: Vec<dto::JobSummary> = jobs.iter().map(dto::JobSummary::from).collect();
            Json(serde_json::json!({ "jobs": jobs })).into_response()
        }
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// GET /jobs/:id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match owned_job(&services, &user, job_id).await {
        Ok(job) => Json(dto::JobDetail::from(job)).into_response(),
        Err(resp) => resp,
    }
}

/// GET /jobs/:id/results
pub async fn get_results(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = owned_job(&services, &user, job_id).await {
        return resp;
    }
    match services.orchestrator.get_results(job_id).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// POST /jobs/:id/retry
pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = owned_job(&services, &user, job_id).await {
        return resp;
    }
    match services.orchestrator.retry_workflow(job_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "job_id": job_id.to_string(), "status": "processing" })),
        )
            .into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// POST /jobs/:id/cancel
///
/// 202 when the running pipeline was asked to stop, 200 when the job was
/// cancelled on the spot.
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = owned_job(&services, &user, job_id).await {
        return resp;
    }
    match services.orchestrator.cancel_workflow(job_id).await {
        Ok(CancelOutcome::Requested) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "job_id": job_id.to_string(), "cancellation": "requested" })),
        )
            .into_response(),
        Ok(CancelOutcome::Cancelled) => (
            StatusCode::OK,
            Json(serde_json::json!({ "job_id": job_id.to_string(), "status": "cancelled" })),
        )
            .into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// DELETE /jobs/:id
pub async fn delete_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = owned_job(&services, &user, job_id).await {
        return resp;
    }
    match services.orchestrator.delete_job(job_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
