//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger, stores, provider and orchestrator wiring
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (used by `main.rs` and the tests).
pub fn build_app(services: AppServices) -> Router {
    let identity = middleware::IdentityState {
        ledger: services.ledger.clone(),
    };

    // Every route except health requires a caller identity.
    let protected = routes::router()
        .layer(Extension(Arc::new(services)))
        .layer(axum::middleware::from_fn_with_state(
            identity,
            middleware::identity_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
