use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use pixforge_core::UserId;
use pixforge_infra::CreditLedger;

use crate::app::errors;
use crate::context::UserContext;

/// Header carrying the caller's user id. Authentication happens upstream.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct IdentityState {
    pub ledger: Arc<CreditLedger>,
}

pub async fn identity_middleware(
    State(state): State<IdentityState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let user_id = extract_user(req.headers())
        .map_err(|msg| errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg))?;

    // First contact creates a Free account.
    state
        .ledger
        .open_account(user_id)
        .await
        .map_err(errors::ledger_error_to_response)?;

    req.extensions_mut().insert(UserContext::new(user_id));
    Ok(next.run(req).await)
}

fn extract_user(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers.get(USER_HEADER).ok_or("missing x-user-id header")?;
    let value = header.to_str().map_err(|_| "x-user-id is not valid text")?;
    value.trim().parse().map_err(|_| "x-user-id is not a valid user id")
}
