use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PollingTask, TaskContext, TaskError, TaskReport};
use crate::tracker::{Build, TrackerClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildsSnapshot {
    pub project: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub builds: Vec<Build>,
    pub fetched_at: DateTime<Utc>,
}

pub struct BuildsPoll {
    tracker: Arc<dyn TrackerClient>,
}

impl BuildsPoll {
    pub fn new(tracker: Arc<dyn TrackerClient>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl PollingTask for BuildsPoll {
    async fn run(&self, ctx: &TaskContext) -> Result<TaskReport, TaskError> {
        let builds = self.tracker.list_builds(&ctx.credentials).await?;

        let mut snapshot = BuildsSnapshot {
            project: ctx.credentials.project.clone(),
            total: builds.len(),
            succeeded: 0,
            failed: 0,
            in_progress: 0,
            builds: Vec::new(),
            fetched_at: Utc::now(),
        };
        for build in &builds {
            match build.result.as_deref() {
                Some("succeeded") => snapshot.succeeded += 1,
                Some("failed") | Some("partiallySucceeded") => snapshot.failed += 1,
                Some(_) => {}
                None => snapshot.in_progress += 1,
            }
        }
        snapshot.builds = builds;
        ctx.store_snapshot(&snapshot)?;

        Ok(TaskReport {
            items: snapshot.total,
            notifications: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TenantCache;
    use crate::jobs::JobType;
    use crate::tasks::test_support::{context, tracker};

    fn build(id: u64, result: Option<&str>) -> Build {
        Build {
            id,
            build_number: format!("2024.{id}"),
            definition: "ci".into(),
            status: if result.is_some() { "completed" } else { "inProgress" }.into(),
            result: result.map(str::to_string),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn tallies_results() {
        let tracker = tracker();
        tracker.set_builds(vec![
            build(1, Some("succeeded")),
            build(2, Some("failed")),
            build(3, None),
            build(4, Some("canceled")),
        ]);
        let cache = Arc::new(TenantCache::new());
        let ctx = context(JobType::Builds, cache.clone());

        BuildsPoll::new(tracker).run(&ctx).await.unwrap();

        let s: BuildsSnapshot = cache.get_as(ctx.tenant_id, &ctx.snapshot_key()).unwrap();
        assert_eq!((s.total, s.succeeded, s.failed, s.in_progress), (4, 1, 1, 1));
    }
}
