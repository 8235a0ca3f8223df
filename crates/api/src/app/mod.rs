//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: composition root (stores, tracker, scheduler)
//! - `routes/`: HTTP routes + handlers, one file per area
//! - `dto.rs`: request validation and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>, admin_token: &str) -> Router {
    let auth_state = middleware::AdminAuthState {
        token: Arc::from(admin_token),
    };

    let admin = routes::admin::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::admin_auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/admin", admin)
        .merge(routes::public_router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
