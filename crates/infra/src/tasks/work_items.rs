use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PollingTask, TaskContext, TaskError, TaskReport};
use crate::tracker::{TrackerClient, WorkItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemsSnapshot {
    pub project: String,
    pub total: usize,
    pub by_state: BTreeMap<String, usize>,
    pub items: Vec<WorkItem>,
    pub fetched_at: DateTime<Utc>,
}

/// Work item counts by state, plus the items themselves.
pub struct WorkItemsPoll {
    tracker: Arc<dyn TrackerClient>,
}

impl WorkItemsPoll {
    pub fn new(tracker: Arc<dyn TrackerClient>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl PollingTask for WorkItemsPoll {
    async fn run(&self, ctx: &TaskContext) -> Result<TaskReport, TaskError> {
        let items = self.tracker.list_work_items(&ctx.credentials).await?;

        let mut by_state = BTreeMap::new();
        for item in &items {
            *by_state.entry(item.state.clone()).or_insert(0) += 1;
        }

        let snapshot = WorkItemsSnapshot {
            project: ctx.credentials.project.clone(),
            total: items.len(),
            by_state,
            items,
            fetched_at: Utc::now(),
        };
        ctx.store_snapshot(&snapshot)?;

        Ok(TaskReport {
            items: snapshot.total,
            notifications: 0,
        })
    }
}
