use axum::http::StatusCode;
use serde_json::{json, Value};

use devpulse_infra::jobs::{schedule, JobType, PollingConfigPatch};
use devpulse_infra::webhooks::WebhookOutcome;

use crate::app::errors;

// -------------------------
// Request validation
// -------------------------

/// Reject a patch carrying a schedule that would never produce a timer.
pub fn validate_patch(patch: &PollingConfigPatch) -> Result<(), axum::response::Response> {
    let intervals = [
        (JobType::WorkItems, patch.work_items_interval.as_deref()),
        (JobType::Builds, patch.builds_interval.as_deref()),
        (JobType::PullRequests, patch.pull_requests_interval.as_deref()),
        (JobType::OverdueCheck, patch.overdue_check_interval.as_deref()),
    ];
    for (job_type, interval) in intervals {
        if let Some(expr) = interval {
            if let Err(e) = schedule::validate(expr) {
                return Err(errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_schedule",
                    format!("{job_type}: {e}"),
                ));
            }
        }
    }
    Ok(())
}

pub fn parse_job_type(s: &str) -> Result<JobType, axum::response::Response> {
    s.parse::<JobType>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_job_type",
            "job type must be one of: workItems, builds, pullRequests, overdueCheck",
        )
    })
}

// -------------------------
// Response mapping
// -------------------------

pub fn webhook_outcome_json(outcome: &WebhookOutcome) -> Value {
    match outcome {
        WebhookOutcome::Accepted {
            job_type,
            invalidated,
            run,
        } => json!({
            "status": "accepted",
            "job_type": job_type,
            "invalidated": invalidated,
            "run": run,
        }),
        WebhookOutcome::Duplicate { since_first_seen } => json!({
            "status": "duplicate",
            "since_first_seen_ms": since_first_seen.as_millis() as u64,
        }),
        WebhookOutcome::Ignored => json!({ "status": "ignored" }),
    }
}
