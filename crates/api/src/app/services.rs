//! Composition root: stores, tracker client, scheduler and webhook router.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use devpulse_infra::cache::TenantCache;
use devpulse_infra::config::SchedulerConfig;
use devpulse_infra::dedupe::DuplicateEventFilter;
use devpulse_infra::jobs::{InMemoryJobStore, JobStore, PostgresJobStore};
use devpulse_infra::lock::ExecutionLock;
use devpulse_infra::maintenance::{Maintenance, MaintenanceHandle};
use devpulse_infra::scheduler::{SchedulerDeps, SchedulingManager};
use devpulse_infra::settings::{InMemorySettingsStore, PostgresSettingsStore, TenantSettingsStore};
use devpulse_infra::tasks::{LogNotificationSink, NotificationSink, TaskRegistry};
use devpulse_infra::tracker::{HttpTrackerClient, TrackerClient};
use devpulse_infra::webhooks::WebhookRouter;

use crate::config::AppConfig;

pub struct AppServices {
    pub manager: Arc<SchedulingManager>,
    pub webhooks: WebhookRouter,
    pub scheduler_config: SchedulerConfig,
}

impl AppServices {
    pub fn new(
        settings: Arc<dyn TenantSettingsStore>,
        jobs: Arc<dyn JobStore>,
        tracker: Arc<dyn TrackerClient>,
        notifier: Arc<dyn NotificationSink>,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        let manager = Arc::new(SchedulingManager::new(SchedulerDeps {
            settings,
            jobs,
            tasks: Arc::new(TaskRegistry::new(tracker, notifier)),
            lock: Arc::new(ExecutionLock::new()),
            cache: Arc::new(TenantCache::new()),
            dedupe: Arc::new(DuplicateEventFilter::new(scheduler_config.dedupe_window)),
            config: scheduler_config.clone(),
        }));

        Self {
            webhooks: WebhookRouter::new(manager.clone()),
            manager,
            scheduler_config,
        }
    }

    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        Maintenance::spawn(
            self.manager.lock().clone(),
            self.manager.cache().clone(),
            self.manager.dedupe().clone(),
            &self.scheduler_config,
        )
    }
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("manager", &self.manager)
            .field("scheduler_config", &self.scheduler_config)
            .finish_non_exhaustive()
    }
}

/// In-memory stores with the given tracker client (dev and tests).
pub fn build_in_memory_services(
    scheduler_config: SchedulerConfig,
    tracker: Arc<dyn TrackerClient>,
) -> AppServices {
    AppServices::new(
        Arc::new(InMemorySettingsStore::new()),
        Arc::new(InMemoryJobStore::new()),
        tracker,
        Arc::new(LogNotificationSink),
        scheduler_config,
    )
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let tracker: Arc<dyn TrackerClient> = Arc::new(
        HttpTrackerClient::new(
            config.scheduler.tracker_base_url.clone(),
            config.scheduler.tracker_timeout,
        )
        .context("failed to build tracker client")?,
    );

    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using in-memory stores");
        return Ok(build_in_memory_services(config.scheduler.clone(), tracker));
    };

    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let jobs = PostgresJobStore::new(pool.clone());
    jobs.ensure_schema()
        .await
        .context("failed to prepare job store schema")?;
    let settings = PostgresSettingsStore::new(pool);
    settings
        .ensure_schema()
        .await
        .context("failed to prepare settings schema")?;

    Ok(AppServices::new(
        Arc::new(settings),
        Arc::new(jobs),
        tracker,
        Arc::new(LogNotificationSink),
        config.scheduler.clone(),
    ))
}
