//! Tick handler: lock, record start, run the task, record the outcome, release.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use devpulse_core::{ExecutionId, TenantId};

use super::timer::SchedulerClock;
use crate::cache::TenantCache;
use crate::jobs::{JobOutcome, JobStore, JobType};
use crate::lock::{ExecutionGuard, ExecutionLock};
use crate::settings::TrackerCredentials;
use crate::tasks::{TaskContext, TaskError, TaskRegistry};

/// What happened to one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous run for this (tenant, job type) still held the lock.
    Skipped,
    Completed {
        execution_id: ExecutionId,
        outcome: JobOutcome,
    },
}

/// Shared state every tick needs. One per manager.
pub struct TickRunner {
    pub(crate) lock: Arc<ExecutionLock>,
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) tasks: Arc<TaskRegistry>,
    pub(crate) cache: Arc<TenantCache>,
    pub(crate) cache_ttl: Duration,
    pub(crate) clock: SchedulerClock,
}

impl TickRunner {
    /// Run one tick if the lock is free; otherwise skip.
    pub async fn run_tick(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        credentials: &TrackerCredentials,
    ) -> TickOutcome {
        let Some(guard) = self.lock.try_lock(tenant_id, job_type) else {
            debug!(
                tenant = %tenant_id,
                job_type = %job_type,
                "previous run still in flight; tick skipped"
            );
            return TickOutcome::Skipped;
        };
        self.run_locked(guard, tenant_id, job_type, credentials.clone())
            .await
    }

    /// Run with a lock the caller already holds. The guard is released on
    /// every path, including a panicking task.
    pub async fn run_locked(
        &self,
        guard: ExecutionGuard,
        tenant_id: TenantId,
        job_type: JobType,
        credentials: TrackerCredentials,
    ) -> TickOutcome {
        let execution_id = guard.execution_id();

        if let Err(e) = self
            .jobs
            .update_last_run(tenant_id, job_type, self.clock.now())
            .await
        {
            warn!(tenant = %tenant_id, job_type = %job_type, error = %e, "failed to record run start");
        }

        let ctx = TaskContext {
            tenant_id,
            job_type,
            execution_id,
            credentials,
            cache: self.cache.clone(),
            cache_ttl: self.cache_ttl,
        };

        // Run in its own task so a panic surfaces as a JoinError instead of
        // unwinding through the scheduler.
        let tasks = self.tasks.clone();
        let joined = tokio::spawn(async move { tasks.run(&ctx).await }).await;

        let outcome = match joined {
            Ok(Ok(report)) => {
                info!(
                    tenant = %tenant_id,
                    job_type = %job_type,
                    execution_id = %execution_id,
                    items = report.items,
                    notifications = report.notifications,
                    "job run succeeded"
                );
                JobOutcome::Success
            }
            Ok(Err(e)) => {
                warn!(
                    tenant = %tenant_id,
                    job_type = %job_type,
                    execution_id = %execution_id,
                    error = %e,
                    "job run failed"
                );
                JobOutcome::Error(e.to_string())
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                let e = TaskError::Panicked(reason);
                warn!(
                    tenant = %tenant_id,
                    job_type = %job_type,
                    execution_id = %execution_id,
                    error = %e,
                    "job run aborted"
                );
                JobOutcome::Error(e.to_string())
            }
        };

        if let Err(e) = self
            .jobs
            .update_job_result(tenant_id, job_type, &outcome)
            .await
        {
            warn!(tenant = %tenant_id, job_type = %job_type, error = %e, "failed to record run result");
        }

        if !guard.release() {
            debug!(
                tenant = %tenant_id,
                job_type = %job_type,
                execution_id = %execution_id,
                "lock was reclaimed before release"
            );
        }

        TickOutcome::Completed {
            execution_id,
            outcome,
        }
    }
}

impl core::fmt::Debug for TickRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickRunner")
            .field("cache_ttl", &self.cache_ttl)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::jobs::{InMemoryJobStore, JobConfig, JobRunStatus};
    use crate::tasks::InMemoryNotificationSink;
    use crate::tracker::{Build, InMemoryTrackerClient, PullRequest, TrackerClient, TrackerError, WorkItem};

    struct PanickingTracker;

    #[async_trait]
    impl TrackerClient for PanickingTracker {
        async fn list_work_items(&self, _: &TrackerCredentials) -> Result<Vec<WorkItem>, TrackerError> {
            panic!("tracker exploded")
        }
        async fn list_builds(&self, _: &TrackerCredentials) -> Result<Vec<Build>, TrackerError> {
            panic!("tracker exploded")
        }
        async fn list_pull_requests(
            &self,
            _: &TrackerCredentials,
        ) -> Result<Vec<PullRequest>, TrackerError> {
            panic!("tracker exploded")
        }
    }

    async fn runner_with(tracker: Arc<dyn TrackerClient>) -> (TickRunner, Arc<InMemoryJobStore>, TenantId) {
        let jobs = Arc::new(InMemoryJobStore::new());
        let tenant = TenantId::new();
        for job_type in JobType::ALL {
            jobs.create_or_update_job(tenant, job_type, &JobConfig::new(true, "* * * * *"))
                .await
                .unwrap();
        }
        let runner = TickRunner {
            lock: Arc::new(ExecutionLock::new()),
            jobs: jobs.clone(),
            tasks: Arc::new(TaskRegistry::new(tracker, Arc::new(InMemoryNotificationSink::new()))),
            cache: Arc::new(TenantCache::new()),
            cache_ttl: Duration::from_secs(60),
            clock: SchedulerClock::new(),
        };
        (runner, jobs, tenant)
    }

    fn creds() -> TrackerCredentials {
        TrackerCredentials::new("acme", "web", "pat")
    }

    #[tokio::test]
    async fn successful_tick_records_success_and_releases() {
        let (runner, jobs, tenant) = runner_with(Arc::new(InMemoryTrackerClient::new())).await;

        let outcome = runner.run_tick(tenant, JobType::Builds, &creds()).await;
        assert!(matches!(
            outcome,
            TickOutcome::Completed {
                outcome: JobOutcome::Success,
                ..
            }
        ));

        let spec = jobs.get_job(tenant, JobType::Builds).await.unwrap().unwrap();
        assert_eq!(spec.last_result, JobRunStatus::Success);
        assert!(spec.last_run.is_some());
        assert!(runner.lock.is_empty());
    }

    #[tokio::test]
    async fn failing_task_records_error_and_releases_lock() {
        let tracker = Arc::new(InMemoryTrackerClient::new());
        tracker.set_failure(Some(TrackerError::Http {
            status: 500,
            body: "boom".into(),
        }));
        let (runner, jobs, tenant) = runner_with(tracker).await;

        runner.run_tick(tenant, JobType::PullRequests, &creds()).await;

        let spec = jobs
            .get_job(tenant, JobType::PullRequests)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spec.last_result, JobRunStatus::Error);
        assert_eq!(spec.last_error.as_deref(), Some("upstream returned 500: boom"));
        assert!(runner.lock.is_empty());
    }

    #[tokio::test]
    async fn panicking_task_is_contained() {
        let (runner, jobs, tenant) = runner_with(Arc::new(PanickingTracker)).await;

        let outcome = runner.run_tick(tenant, JobType::WorkItems, &creds()).await;
        let TickOutcome::Completed {
            outcome: JobOutcome::Error(message),
            ..
        } = outcome
        else {
            panic!("expected an error outcome, got {outcome:?}");
        };
        assert!(message.contains("tracker exploded"));

        let spec = jobs.get_job(tenant, JobType::WorkItems).await.unwrap().unwrap();
        assert_eq!(spec.last_result, JobRunStatus::Error);
        assert!(runner.lock.is_empty());
    }

    #[tokio::test]
    async fn held_lock_skips_without_calling_upstream() {
        let tracker = Arc::new(InMemoryTrackerClient::new());
        let (runner, jobs, tenant) = runner_with(tracker.clone()).await;

        let held = runner.lock.try_lock(tenant, JobType::PullRequests).unwrap();
        let outcome = runner.run_tick(tenant, JobType::PullRequests, &creds()).await;

        assert_eq!(outcome, TickOutcome::Skipped);
        assert_eq!(tracker.calls(), 0);
        let spec = jobs
            .get_job(tenant, JobType::PullRequests)
            .await
            .unwrap()
            .unwrap();
        assert!(spec.last_run.is_none());
        drop(held);
    }
}
