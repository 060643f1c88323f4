use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;

/// GET /credits
pub async fn get_credits(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.orchestrator.get_credits_summary(user.user_id()).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
