use axum::http::StatusCode;
use axum::response::Response;

use devpulse_core::TenantId;

use crate::app::errors;

/// Tenant addressed by a request path.
///
/// Parsed before any handler touches state; a malformed or nil id is refused.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn from_path(raw: &str) -> Result<Self, Response> {
        raw.parse::<TenantId>().map(Self::new).map_err(|e| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_tenant_id", e.to_string())
        })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
