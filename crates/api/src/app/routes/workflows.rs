use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

/// POST /workflows
///
/// Reserves credits and starts the pipeline; progress is then available
/// from `GET /jobs/:id` or the SSE streams.
pub async fn start_workflow(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::StartWorkflowRequest>,
) -> axum::response::Response {
    let workflow_type = match dto::parse_workflow_type(&body.workflow_type) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match services
        .orchestrator
        .start_workflow(user.user_id(), workflow_type, body.input_ref)
        .await
    {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "job_id": job_id.to_string(),
                "status": "processing",
            })),
        )
            .into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
