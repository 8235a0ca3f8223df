use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notify::{Notification, NotificationKind, NotificationSink};
use super::{PollingTask, TaskContext, TaskError, TaskReport};
use crate::tracker::{TrackerClient, WorkItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueSnapshot {
    pub project: String,
    pub overdue: Vec<WorkItem>,
    pub checked_at: DateTime<Utc>,
}

/// Open work items past their due date. One notification per item per run.
pub struct OverdueCheck {
    tracker: Arc<dyn TrackerClient>,
    notifier: Arc<dyn NotificationSink>,
}

impl OverdueCheck {
    pub fn new(tracker: Arc<dyn TrackerClient>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { tracker, notifier }
    }
}

#[async_trait]
impl PollingTask for OverdueCheck {
    async fn run(&self, ctx: &TaskContext) -> Result<TaskReport, TaskError> {
        let now = Utc::now();
        let mut overdue: Vec<WorkItem> = self
            .tracker
            .list_work_items(&ctx.credentials)
            .await?
            .into_iter()
            .filter(|item| item.is_overdue(now))
            .collect();
        overdue.sort_by_key(|item| (item.due_date, item.id));

        for item in &overdue {
            let days = item
                .due_date
                .map(|due| (now - due).num_days())
                .unwrap_or_default();
            let assignee = item.assigned_to.as_deref().unwrap_or("unassigned");
            self.notifier.notify(Notification {
                tenant_id: ctx.tenant_id,
                kind: NotificationKind::OverdueWorkItem,
                reference_id: item.id,
                message: format!(
                    "Work item #{} '{}' ({}) is {} day(s) overdue",
                    item.id, item.title, assignee, days
                ),
            });
        }

        let snapshot = OverdueSnapshot {
            project: ctx.credentials.project.clone(),
            overdue,
            checked_at: now,
        };
        ctx.store_snapshot(&snapshot)?;

        Ok(TaskReport {
            items: snapshot.overdue.len(),
            notifications: snapshot.overdue.len(),
        })
    }
}
