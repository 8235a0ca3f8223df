//! Job store: durable JobSpec configuration and last-run bookkeeping.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use devpulse_core::TenantId;

use super::types::{JobConfig, JobOutcome, JobSpec, JobType};

/// Job store abstraction.
///
/// Every operation is scoped by tenant; there is no cross-tenant listing other
/// than what the tenant settings collaborator provides.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or update the JobSpec for (tenant, job type), re-activating it if paused.
    async fn create_or_update_job(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        config: &JobConfig,
    ) -> Result<JobSpec, JobStoreError>;

    async fn get_job(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
    ) -> Result<Option<JobSpec>, JobStoreError>;

    /// All JobSpecs of a tenant, ordered by job type.
    async fn list_jobs(&self, tenant_id: TenantId) -> Result<Vec<JobSpec>, JobStoreError>;

    /// JobSpecs that are enabled and not paused.
    async fn get_active_jobs(&self, tenant_id: TenantId) -> Result<Vec<JobSpec>, JobStoreError>;

    /// Mark every JobSpec of the tenant paused. Returns how many changed.
    async fn pause_jobs(&self, tenant_id: TenantId) -> Result<usize, JobStoreError>;

    /// Record that a run started at `at` (last result goes back to pending).
    async fn update_last_run(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        at: DateTime<Utc>,
    ) -> Result<(), JobStoreError>;

    /// Record how a run finished.
    async fn update_job_result(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        outcome: &JobOutcome,
    ) -> Result<(), JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: tenant {tenant_id}, job type {job_type}")]
    NotFound {
        tenant_id: TenantId,
        job_type: JobType,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<TenantId, HashMap<JobType, JobSpec>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_spec<T>(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        f: impl FnOnce(&mut JobSpec) -> T,
    ) -> Result<T, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let spec = jobs
            .get_mut(&tenant_id)
            .and_then(|t| t.get_mut(&job_type))
            .ok_or(JobStoreError::NotFound {
                tenant_id,
                job_type,
            })?;
        Ok(f(spec))
    }

    fn sorted(specs: impl Iterator<Item = JobSpec>) -> Vec<JobSpec> {
        let mut specs: Vec<JobSpec> = specs.collect();
        specs.sort_by_key(|s| s.job_type);
        specs
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_or_update_job(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        config: &JobConfig,
    ) -> Result<JobSpec, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let spec = jobs
            .entry(tenant_id)
            .or_default()
            .entry(job_type)
            .and_modify(|s| s.apply_config(config))
            .or_insert_with(|| JobSpec::new(tenant_id, job_type, config));
        Ok(spec.clone())
    }

    async fn get_job(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
    ) -> Result<Option<JobSpec>, JobStoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.get(&tenant_id).and_then(|t| t.get(&job_type)).cloned())
    }

    async fn list_jobs(&self, tenant_id: TenantId) -> Result<Vec<JobSpec>, JobStoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(Self::sorted(
            jobs.get(&tenant_id)
                .into_iter()
                .flat_map(|t| t.values().cloned()),
        ))
    }

    async fn get_active_jobs(&self, tenant_id: TenantId) -> Result<Vec<JobSpec>, JobStoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(Self::sorted(
            jobs.get(&tenant_id)
                .into_iter()
                .flat_map(|t| t.values())
                .filter(|s| s.is_schedulable())
                .cloned(),
        ))
    }

    async fn pause_jobs(&self, tenant_id: TenantId) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = 0;
        if let Some(tenant_jobs) = jobs.get_mut(&tenant_id) {
            for spec in tenant_jobs.values_mut() {
                if spec.status != super::types::JobSpecStatus::Paused {
                    spec.pause();
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn update_last_run(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        at: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        self.with_spec(tenant_id, job_type, |s| s.mark_started(at))
    }

    async fn update_job_result(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        outcome: &JobOutcome,
    ) -> Result<(), JobStoreError> {
        self.with_spec(tenant_id, job_type, |s| s.mark_finished(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobRunStatus, JobSpecStatus};

    fn test_tenant() -> TenantId {
        TenantId::new()
    }

    #[tokio::test]
    async fn create_then_update_keeps_bookkeeping() {
        let store = InMemoryJobStore::new();
        let tenant = test_tenant();

        let spec = store
            .create_or_update_job(tenant, JobType::Builds, &JobConfig::new(true, "* * * * *"))
            .await
            .unwrap();
        assert_eq!(spec.last_result, JobRunStatus::Pending);

        let started = Utc::now();
        store
            .update_last_run(tenant, JobType::Builds, started)
            .await
            .unwrap();
        store
            .update_job_result(tenant, JobType::Builds, &JobOutcome::Success)
            .await
            .unwrap();

        let spec = store
            .create_or_update_job(tenant, JobType::Builds, &JobConfig::new(true, "*/5 * * * *"))
            .await
            .unwrap();
        assert_eq!(spec.schedule, "*/5 * * * *");
        assert_eq!(spec.last_run, Some(started));
        assert_eq!(spec.last_result, JobRunStatus::Success);
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let store = InMemoryJobStore::new();
        let tenant1 = test_tenant();
        let tenant2 = test_tenant();

        store
            .create_or_update_job(tenant1, JobType::WorkItems, &JobConfig::new(true, "* * * * *"))
            .await
            .unwrap();

        assert!(store.get_job(tenant2, JobType::WorkItems).await.unwrap().is_none());
        assert!(store.list_jobs(tenant2).await.unwrap().is_empty());
        assert!(matches!(
            store
                .update_last_run(tenant2, JobType::WorkItems, Utc::now())
                .await,
            Err(JobStoreError::NotFound { .. })
        ));
        assert_eq!(store.pause_jobs(tenant2).await.unwrap(), 0);
        assert_eq!(store.get_active_jobs(tenant1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pause_hides_jobs_from_active_listing() {
        let store = InMemoryJobStore::new();
        let tenant = test_tenant();

        for job_type in JobType::ALL {
            store
                .create_or_update_job(tenant, job_type, &JobConfig::new(true, "* * * * *"))
                .await
                .unwrap();
        }
        store
            .create_or_update_job(tenant, JobType::Builds, &JobConfig::disabled("* * * * *"))
            .await
            .unwrap();

        let active = store.get_active_jobs(tenant).await.unwrap();
        assert_eq!(active.len(), 3);
        assert!(active.iter().all(|s| s.job_type != JobType::Builds));

        assert_eq!(store.pause_jobs(tenant).await.unwrap(), 4);
        assert_eq!(store.pause_jobs(tenant).await.unwrap(), 0);
        assert!(store.get_active_jobs(tenant).await.unwrap().is_empty());

        let all = store.list_jobs(tenant).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|s| s.status == JobSpecStatus::Paused));
    }

    #[tokio::test]
    async fn failed_result_keeps_message() {
        let store = InMemoryJobStore::new();
        let tenant = test_tenant();
        store
            .create_or_update_job(tenant, JobType::OverdueCheck, &JobConfig::new(true, "0 9 * * *"))
            .await
            .unwrap();

        store
            .update_job_result(
                tenant,
                JobType::OverdueCheck,
                &JobOutcome::Error("upstream 503".into()),
            )
            .await
            .unwrap();

        let spec = store
            .get_job(tenant, JobType::OverdueCheck)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spec.last_result, JobRunStatus::Error);
        assert_eq!(spec.last_error.as_deref(), Some("upstream 503"));
    }
}
