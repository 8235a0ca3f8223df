use axum::{
    routing::{get, post},
    Router,
};

pub mod admin;
pub mod dashboard;
pub mod system;
pub mod webhooks;

/// Tenant-addressed routes outside the admin surface.
pub fn public_router() -> Router {
    Router::new()
        .route(
            "/tenants/:tenant_id/dashboard/:job_type/:project",
            get(dashboard::get_snapshot),
        )
        .route("/webhooks/:tenant_id", post(webhooks::receive))
}
