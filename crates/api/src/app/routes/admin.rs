//! Admin routes: tenant polling lifecycle, credentials, cache and status.
//!
//! Every route here sits behind the admin bearer token.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde_json::json;

use devpulse_infra::jobs::PollingConfigPatch;
use devpulse_infra::settings::TrackerCredentials;

use crate::app::{dto, errors, services::AppServices};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/polling/emergency-stop", post(emergency_stop))
        .route("/cache", delete(clear_cache))
        .route("/tenants/:tenant_id/polling/start", post(start_polling))
        .route("/tenants/:tenant_id/polling/stop", post(stop_polling))
        .route("/tenants/:tenant_id/polling", patch(update_polling))
        .route("/tenants/:tenant_id/credentials", put(save_credentials))
        .route("/tenants/:tenant_id/cache", delete(clear_tenant_cache))
        .route("/tenants/:tenant_id/jobs", get(list_jobs))
}

/// GET /admin/status
pub async fn status(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.manager.status())
}

/// POST /admin/tenants/:tenant_id/polling/start
pub async fn start_polling(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<String>,
) -> axum::response::Response {
    let tenant = match TenantContext::from_path(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match services.manager.start_tenant(tenant.tenant_id()).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::scheduler_error_to_response(e),
    }
}

/// PATCH /admin/tenants/:tenant_id/polling
///
/// The manager merges and saves the configuration while it holds the
/// tenant's setup slot, then reconciles only the job types that changed.
pub async fn update_polling(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<String>,
    Json(patch): Json<PollingConfigPatch>,
) -> axum::response::Response {
    let tenant = match TenantContext::from_path(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if let Err(resp) = dto::validate_patch(&patch) {
        return resp;
    }

    match services.manager.update_tenant(tenant.tenant_id(), &patch).await {
        Ok(update) => (StatusCode::OK, Json(update)).into_response(),
        Err(e) => errors::scheduler_error_to_response(e),
    }
}

/// POST /admin/tenants/:tenant_id/polling/stop
pub async fn stop_polling(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<String>,
) -> axum::response::Response {
    let tenant = match TenantContext::from_path(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match services.manager.stop_tenant(tenant.tenant_id()).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::scheduler_error_to_response(e),
    }
}

/// PUT /admin/tenants/:tenant_id/credentials
///
/// Saves, drops the tenant's cached data (it may belong to the old project),
/// and restarts polling with the new credentials, all under the tenant's
/// setup slot.
pub async fn save_credentials(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<String>,
    Json(credentials): Json<TrackerCredentials>,
) -> axum::response::Response {
    let tenant = match TenantContext::from_path(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if !credentials.is_complete() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "incomplete_credentials",
            "organization, project and personalAccessToken are required",
        );
    }

    match services
        .manager
        .replace_credentials(tenant.tenant_id(), &credentials)
        .await
    {
        Ok(update) => (StatusCode::OK, Json(update)).into_response(),
        Err(e) => errors::scheduler_error_to_response(e),
    }
}

/// DELETE /admin/tenants/:tenant_id/cache
pub async fn clear_tenant_cache(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<String>,
) -> axum::response::Response {
    let tenant = match TenantContext::from_path(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let removed = services.manager.cache().invalidate_tenant(tenant.tenant_id());
    (StatusCode::OK, Json(json!({ "removed": removed }))).into_response()
}

/// GET /admin/tenants/:tenant_id/jobs
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<String>,
) -> axum::response::Response {
    let tenant = match TenantContext::from_path(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match services.manager.jobs().list_jobs(tenant.tenant_id()).await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

/// POST /admin/polling/emergency-stop
pub async fn emergency_stop(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.manager.emergency_stop_all())
}

/// DELETE /admin/cache
pub async fn clear_cache(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(json!({ "removed": services.manager.cache().clear_all() }))
}
