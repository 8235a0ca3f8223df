use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use devpulse_infra::cache::namespaced_key;

use crate::app::{dto, errors, services::AppServices};
use crate::context::TenantContext;

/// GET /tenants/:tenant_id/dashboard/:job_type/:project
pub async fn get_snapshot(
    Extension(services): Extension<Arc<AppServices>>,
    Path((tenant_id, job_type, project)): Path<(String, String, String)>,
) -> axum::response::Response {
    let tenant = match TenantContext::from_path(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let job_type = match dto::parse_job_type(&job_type) {
        Ok(j) => j,
        Err(resp) => return resp,
    };

    let key = namespaced_key(job_type, &project);
    match services.manager.cache().get(tenant.tenant_id(), &key) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no snapshot for {key}"),
        ),
    }
}
