//! Inbound tracker webhooks.
//!
//! Each delivery is checked against the duplicate-event filter, mapped to the
//! polling job that covers it, and turned into a cache invalidation plus an
//! immediate run of that job.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use devpulse_core::TenantId;

use crate::jobs::JobType;
use crate::scheduler::{RunNowOutcome, SchedulingManager};

/// Service-hook delivery as posted by the tracker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Delivery id; redeliveries reuse it.
    #[serde(rename = "id")]
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Accepted {
        job_type: JobType,
        invalidated: usize,
        run: RunNowOutcome,
    },
    Duplicate {
        since_first_seen: Duration,
    },
    Ignored,
}

/// Job type whose data a given event type changes.
pub fn job_type_for_event(event_type: &str) -> Option<JobType> {
    if event_type.starts_with("workitem.") {
        Some(JobType::WorkItems)
    } else if event_type.starts_with("build.") {
        Some(JobType::Builds)
    } else if event_type.starts_with("git.pullrequest.") {
        Some(JobType::PullRequests)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct WebhookRouter {
    manager: Arc<SchedulingManager>,
}

impl WebhookRouter {
    pub fn new(manager: Arc<SchedulingManager>) -> Self {
        Self { manager }
    }

    pub fn handle(&self, tenant_id: TenantId, event: &WebhookEvent) -> WebhookOutcome {
        let verdict = self
            .manager
            .dedupe()
            .check_and_mark(tenant_id, &event.event_type, &event.event_id);
        if verdict.is_duplicate {
            let since_first_seen = verdict.since_first_seen.unwrap_or_default();
            debug!(
                tenant = %tenant_id,
                event_type = %event.event_type,
                event_id = %event.event_id,
                since_first_seen_ms = since_first_seen.as_millis() as u64,
                "duplicate webhook delivery dropped"
            );
            return WebhookOutcome::Duplicate { since_first_seen };
        }

        let Some(job_type) = job_type_for_event(&event.event_type) else {
            debug!(tenant = %tenant_id, event_type = %event.event_type, "unhandled webhook event type");
            return WebhookOutcome::Ignored;
        };

        let invalidated = self
            .manager
            .cache()
            .invalidate_prefix(tenant_id, &format!("{job_type}:"));
        let run = self.manager.run_now(tenant_id, job_type);

        info!(
            tenant = %tenant_id,
            event_type = %event.event_type,
            job_type = %job_type,
            invalidated,
            run = ?run,
            "webhook processed"
        );
        WebhookOutcome::Accepted {
            job_type,
            invalidated,
            run,
        }
    }
}
