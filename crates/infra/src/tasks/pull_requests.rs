use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notify::{Notification, NotificationKind, NotificationSink};
use super::{PollingTask, TaskContext, TaskError, TaskReport};
use crate::cache::namespaced_key;
use crate::tracker::{PullRequest, TrackerClient};

/// Seen ids outlive the snapshot and sit outside the `pullRequests:` namespace,
/// so a webhook-triggered invalidation does not reset the baseline.
const SEEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestsSnapshot {
    pub project: String,
    pub active: usize,
    pub pull_requests: Vec<PullRequest>,
    pub fetched_at: DateTime<Utc>,
}

/// Active pull requests; notifies about ones not seen on a previous run.
///
/// The first run for a project only records a baseline.
pub struct PullRequestsPoll {
    tracker: Arc<dyn TrackerClient>,
    notifier: Arc<dyn NotificationSink>,
}

impl PullRequestsPoll {
    pub fn new(tracker: Arc<dyn TrackerClient>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { tracker, notifier }
    }

    fn seen_key(ctx: &TaskContext) -> String {
        namespaced_key("seen", &ctx.snapshot_key())
    }
}

#[async_trait]
impl PollingTask for PullRequestsPoll {
    async fn run(&self, ctx: &TaskContext) -> Result<TaskReport, TaskError> {
        let pull_requests = self.tracker.list_pull_requests(&ctx.credentials).await?;

        let seen_key = Self::seen_key(ctx);
        let previous: Option<BTreeSet<u64>> = ctx.cache.get_as(ctx.tenant_id, &seen_key);

        let mut notifications = 0;
        if let Some(previous) = &previous {
            for pr in pull_requests.iter().filter(|pr| !previous.contains(&pr.id)) {
                self.notifier.notify(Notification {
                    tenant_id: ctx.tenant_id,
                    kind: NotificationKind::NewPullRequest,
                    reference_id: pr.id,
                    message: format!(
                        "New pull request #{} in {}: {}",
                        pr.id, pr.repository, pr.title
                    ),
                });
                notifications += 1;
            }
        }

        let current: BTreeSet<u64> = pull_requests.iter().map(|pr| pr.id).collect();
        ctx.cache
            .set_as(ctx.tenant_id, seen_key, &current, SEEN_TTL)
            .map_err(|e| TaskError::Cache(e.to_string()))?;

        let snapshot = PullRequestsSnapshot {
            project: ctx.credentials.project.clone(),
            active: pull_requests.len(),
            pull_requests,
            fetched_at: Utc::now(),
        };
        ctx.store_snapshot(&snapshot)?;

        Ok(TaskReport {
            items: snapshot.active,
            notifications,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TenantCache;
    use crate::jobs::JobType;
    use crate::tasks::notify::InMemoryNotificationSink;
    use crate::tasks::test_support::{context, tracker};

    fn pr(id: u64) -> PullRequest {
        PullRequest {
            id,
            title: format!("change {id}"),
            repository: "web".into(),
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn only_new_pull_requests_are_announced() {
        let tracker = tracker();
        let sink = Arc::new(InMemoryNotificationSink::new());
        let task = PullRequestsPoll::new(tracker.clone(), sink.clone());
        let cache = Arc::new(TenantCache::new());
        let ctx = context(JobType::PullRequests, cache.clone());

        tracker.set_pull_requests(vec![pr(1), pr(2)]);
        let first = task.run(&ctx).await.unwrap();
        assert_eq!(first.notifications, 0);

        // A webhook-style invalidation of the namespace keeps the baseline.
        cache.invalidate_prefix(ctx.tenant_id, "pullRequests:");

        tracker.set_pull_requests(vec![pr(2), pr(3)]);
        let second = task.run(&ctx).await.unwrap();
        assert_eq!(second.notifications, 1);

        let sent = sink.all();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reference_id, 3);
        assert_eq!(sent[0].kind, NotificationKind::NewPullRequest);
        assert_eq!(sent[0].tenant_id, ctx.tenant_id);

        let snapshot: PullRequestsSnapshot =
            cache.get_as(ctx.tenant_id, "pullRequests:web").unwrap();
        assert_eq!(snapshot.active, 2);
    }
}
