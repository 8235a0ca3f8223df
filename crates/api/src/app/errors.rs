use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use devpulse_infra::scheduler::SchedulerError;
use devpulse_infra::settings::SettingsError;

pub fn scheduler_error_to_response(err: SchedulerError) -> axum::response::Response {
    match err {
        SchedulerError::SetupInProgress(_) => {
            json_error(StatusCode::CONFLICT, "setup_in_progress", err.to_string())
        }
        SchedulerError::Interrupted(_) => {
            json_error(StatusCode::CONFLICT, "interrupted", err.to_string())
        }
        SchedulerError::TenantNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "tenant_not_found", err.to_string())
        }
        SchedulerError::Settings(e) => settings_error_to_response(e),
    }
}

pub fn settings_error_to_response(err: SettingsError) -> axum::response::Response {
    match err {
        SettingsError::TenantNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "tenant_not_found", err.to_string())
        }
        SettingsError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
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
