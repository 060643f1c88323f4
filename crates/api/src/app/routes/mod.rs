use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use pixforge_core::JobId;
use pixforge_jobs::JobRecord;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub mod credits;
pub mod jobs;
pub mod stream;
pub mod system;
pub mod workflows;

/// Router for all identity-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/workflows", post(workflows::start_workflow))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/:id/results", get(jobs::get_results))
        .route("/jobs/:id/retry", post(jobs::retry_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/jobs/:id/stream", get(stream::job_stream))
        .route("/credits", get(credits::get_credits))
        .route("/stream", get(stream::user_stream))
}

/// Load a job owned by the caller. Jobs of other users read as not found.
pub(crate) async fn owned_job(
    services: &Arc<AppServices>,
    user: &UserContext,
    job_id: JobId,
) -> Result<JobRecord, axum::response::Response> {
    let job = services
        .orchestrator
        .get_job(job_id)
        .await
        .map_err(errors::orchestrator_error_to_response)?;
    if job.user_id != user.user_id() {
        return Err(errors::json_error(
            axum::http::StatusCode::NOT_FOUND,
            "not_found",
            format!("job not found: {job_id}"),
        ));
    }
    Ok(job)
}
