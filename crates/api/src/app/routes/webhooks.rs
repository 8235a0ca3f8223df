use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use devpulse_infra::webhooks::WebhookEvent;

use crate::app::{dto, services::AppServices};
use crate::context::TenantContext;

/// POST /webhooks/:tenant_id
///
/// Always 202 once the payload parses: duplicates and unknown event types are
/// acknowledged so the sender stops retrying.
pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tenant_id): Path<String>,
    Json(event): Json<WebhookEvent>,
) -> axum::response::Response {
    let tenant = match TenantContext::from_path(&tenant_id) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let outcome = services.webhooks.handle(tenant.tenant_id(), &event);
    (StatusCode::ACCEPTED, Json(dto::webhook_outcome_json(&outcome))).into_response()
}
