use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use pixforge_infra::{LedgerError, OrchestratorError};

pub fn orchestrator_error_to_response(err: OrchestratorError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        OrchestratorError::InsufficientCredits { .. } => {
            json_error(StatusCode::PAYMENT_REQUIRED, "insufficient_credits", message)
        }
        OrchestratorError::UnknownWorkflowType(_) => {
            json_error(StatusCode::BAD_REQUEST, "unknown_workflow_type", message)
        }
        OrchestratorError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        OrchestratorError::JobNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        OrchestratorError::InvalidStateTransition(_) => json_error(StatusCode::CONFLICT, "invalid_state", message),
        OrchestratorError::ResultsNotReady { .. } => {
            json_error(StatusCode::CONFLICT, "results_not_ready", message)
        }
        OrchestratorError::RefundOutstanding(_) => {
            json_error(StatusCode::CONFLICT, "refund_outstanding", message)
        }
        OrchestratorError::PersistenceConflict { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "persistence_conflict", message)
        }
        OrchestratorError::ProviderFailure(_) => json_error(StatusCode::BAD_GATEWAY, "provider_error", message),
        OrchestratorError::Ledger(e) => ledger_error_to_response(e),
        OrchestratorError::Store(_) => {
            tracing::error!(error = %message, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", message)
        }
    }
}

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        LedgerError::AccountNotFound(_) => json_error(StatusCode::NOT_FOUND, "account_not_found", message),
        LedgerError::PersistenceConflict { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "persistence_conflict", message)
        }
        LedgerError::Domain(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        LedgerError::Store(_) => {
            tracing::error!(error = %message, "account store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
