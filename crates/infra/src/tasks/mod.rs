//! Polling tasks: one typed implementation per [`JobType`].
//!
//! A task fetches from the tenant's tracker and writes a dashboard snapshot
//! into the tenant cache under `{jobType}:{project}`. Tasks never touch the
//! execution lock or the job store; the scheduler's tick handler owns both.

pub mod builds;
pub mod notify;
pub mod overdue;
pub mod pull_requests;
pub mod work_items;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use devpulse_core::{ExecutionId, TenantId};

use crate::cache::{namespaced_key, TenantCache};
use crate::jobs::JobType;
use crate::settings::TrackerCredentials;
use crate::tracker::{TrackerClient, TrackerError};

pub use builds::{BuildsPoll, BuildsSnapshot};
pub use notify::{
    InMemoryNotificationSink, LogNotificationSink, Notification, NotificationKind, NotificationSink,
};
pub use overdue::{OverdueCheck, OverdueSnapshot};
pub use pull_requests::{PullRequestsPoll, PullRequestsSnapshot};
pub use work_items::{WorkItemsPoll, WorkItemsSnapshot};

/// Everything a task may use during one run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub execution_id: ExecutionId,
    pub credentials: TrackerCredentials,
    pub cache: Arc<TenantCache>,
    pub cache_ttl: Duration,
}

impl TaskContext {
    /// Cache key of this task's dashboard snapshot.
    pub fn snapshot_key(&self) -> String {
        namespaced_key(self.job_type, &self.credentials.project)
    }

    fn store_snapshot<T: Serialize>(&self, snapshot: &T) -> Result<(), TaskError> {
        self.cache
            .set_as(self.tenant_id, self.snapshot_key(), snapshot, self.cache_ttl)
            .map_err(|e| TaskError::Cache(e.to_string()))
    }
}

/// Summary of a successful run, for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub items: usize,
    pub notifications: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("cache write failed: {0}")]
    Cache(String),
    #[error("task panicked: {0}")]
    Panicked(String),
}

#[async_trait]
pub trait PollingTask: Send + Sync {
    async fn run(&self, ctx: &TaskContext) -> Result<TaskReport, TaskError>;
}

/// Compile-time mapping from job type to task.
pub struct TaskRegistry {
    work_items: WorkItemsPoll,
    builds: BuildsPoll,
    pull_requests: PullRequestsPoll,
    overdue_check: OverdueCheck,
}

impl TaskRegistry {
    pub fn new(tracker: Arc<dyn TrackerClient>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            work_items: WorkItemsPoll::new(tracker.clone()),
            builds: BuildsPoll::new(tracker.clone()),
            pull_requests: PullRequestsPoll::new(tracker.clone(), notifier.clone()),
            overdue_check: OverdueCheck::new(tracker, notifier),
        }
    }

    pub fn task(&self, job_type: JobType) -> &dyn PollingTask {
        match job_type {
            JobType::WorkItems => &self.work_items,
            JobType::Builds => &self.builds,
            JobType::PullRequests => &self.pull_requests,
            JobType::OverdueCheck => &self.overdue_check,
        }
    }

    pub async fn run(&self, ctx: &TaskContext) -> Result<TaskReport, TaskError> {
        self.task(ctx.job_type).run(ctx).await
    }
}

impl core::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegistry").finish_non_exhaustive()
    }
}
