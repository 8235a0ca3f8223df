//! Scheduling manager: per-tenant timer tables reconciled against tenant settings.
//!
//! ## Ownership
//!
//! The manager exclusively owns every [`ActiveTimer`], keyed by tenant and then
//! by job type. Dropping a timer aborts it, so replacing or removing a map
//! entry is enough to stop firing; in-flight ticks run in their own tasks and
//! finish normally.
//!
//! ## Serialization
//!
//! Start, update and stop for one tenant are serialized by a setup-in-progress
//! set: an overlapping request for the same tenant is rejected, not queued.
//! An update saves the merged polling configuration only once it holds that
//! slot, so a rejected update never reaches the settings store.
//! Different tenants never wait on each other. The timer table mutex is never
//! held across an await.
//!
//! ## Failure policy
//!
//! Incomplete credentials and lock contention are skips. An invalid schedule or
//! a failed JobSpec write skips only that job type. A failing task is recorded
//! on its JobSpec and the timer keeps running.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use devpulse_core::{ExecutionId, TenantId};

use super::status::{SchedulerStatus, TenantState, TenantStatus, TimerStatus};
use super::tick::TickRunner;
use super::timer::{ActiveTimer, SchedulerClock};
use crate::cache::TenantCache;
use crate::config::SchedulerConfig;
use crate::dedupe::DuplicateEventFilter;
use crate::jobs::{JobConfig, JobStore, JobType, PollingConfig, PollingConfigPatch, ScheduleExpr};
use crate::lock::ExecutionLock;
use crate::settings::{SettingsError, TenantSettings, TenantSettingsStore, TrackerCredentials};
use crate::tasks::TaskRegistry;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    #[error("setup already in progress for tenant {0}")]
    SetupInProgress(TenantId),
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),
    #[error("setup for tenant {0} was interrupted by an emergency stop")]
    Interrupted(TenantId),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started {
        active_timers: usize,
        /// Enabled job types that got no timer (invalid schedule or store failure).
        skipped: Vec<JobType>,
    },
    MissingCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Updated {
        /// Job types whose new configuration was applied.
        changed: Vec<JobType>,
        /// Job types the update could not bring up: a failed JobSpec write
        /// keeps the previous timer and configuration, an invalid schedule
        /// leaves the job type without a timer.
        skipped: Vec<JobType>,
        active_timers: usize,
    },
    /// The tenant was not running; it was started from stored settings.
    Started { start: StartOutcome },
}

/// Result of [`SchedulingManager::update_tenant`]: the polling configuration
/// as saved, and what happened to the running timers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollingUpdate {
    pub polling: PollingConfig,
    pub outcome: UpdateOutcome,
}

/// Result of [`SchedulingManager::replace_credentials`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialsUpdate {
    pub cache_entries_invalidated: usize,
    pub outcome: StartOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub timers_stopped: usize,
    pub jobs_paused: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmergencyStopReport {
    pub tenants: usize,
    pub timers_stopped: usize,
    pub locks_cleared: usize,
    pub cache_entries_cleared: usize,
    pub dedupe_entries_cleared: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub started: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunNowOutcome {
    Started { execution_id: ExecutionId },
    /// A run for this (tenant, job type) is already in flight.
    Busy,
    NotRunning,
    Disabled,
}

/// Collaborators injected by the composition root.
pub struct SchedulerDeps {
    pub settings: Arc<dyn TenantSettingsStore>,
    pub jobs: Arc<dyn JobStore>,
    pub tasks: Arc<TaskRegistry>,
    pub lock: Arc<ExecutionLock>,
    pub cache: Arc<TenantCache>,
    pub dedupe: Arc<DuplicateEventFilter>,
    pub config: SchedulerConfig,
}

struct TenantEntry {
    state: TenantState,
    polling: PollingConfig,
    credentials: Option<Arc<TrackerCredentials>>,
    timers: HashMap<JobType, ActiveTimer>,
}

impl TenantEntry {
    fn new() -> Self {
        Self {
            state: TenantState::Uninitialized,
            polling: PollingConfig::default(),
            credentials: None,
            timers: HashMap::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.state == TenantState::Running && self.credentials.is_some()
    }
}

/// Removes the tenant from the setup set when dropped.
struct SetupGuard<'a> {
    in_progress: &'a Mutex<HashSet<TenantId>>,
    tenant_id: TenantId,
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        self.in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.tenant_id);
    }
}

pub struct SchedulingManager {
    settings: Arc<dyn TenantSettingsStore>,
    jobs: Arc<dyn JobStore>,
    lock: Arc<ExecutionLock>,
    cache: Arc<TenantCache>,
    dedupe: Arc<DuplicateEventFilter>,
    runner: Arc<TickRunner>,
    clock: SchedulerClock,
    tenants: Mutex<HashMap<TenantId, TenantEntry>>,
    setup_in_progress: Mutex<HashSet<TenantId>>,
    /// Bumped by emergency stop; setups that started before it discard their timers.
    generation: AtomicU64,
    initialized: AtomicBool,
}

impl SchedulingManager {
    pub fn new(deps: SchedulerDeps) -> Self {
        Self::with_clock(deps, SchedulerClock::new())
    }

    pub fn with_clock(deps: SchedulerDeps, clock: SchedulerClock) -> Self {
        let runner = Arc::new(TickRunner {
            lock: deps.lock.clone(),
            jobs: deps.jobs.clone(),
            tasks: deps.tasks,
            cache: deps.cache.clone(),
            cache_ttl: deps.config.cache_default_ttl,
            clock,
        });
        Self {
            settings: deps.settings,
            jobs: deps.jobs,
            lock: deps.lock,
            cache: deps.cache,
            dedupe: deps.dedupe,
            runner,
            clock,
            tenants: Mutex::new(HashMap::new()),
            setup_in_progress: Mutex::new(HashSet::new()),
            generation: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<TenantCache> {
        &self.cache
    }

    pub fn dedupe(&self) -> &Arc<DuplicateEventFilter> {
        &self.dedupe
    }

    pub fn lock(&self) -> &Arc<ExecutionLock> {
        &self.lock
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Start (or restart) polling for a tenant from its stored settings.
    pub async fn start_tenant(&self, tenant_id: TenantId) -> Result<StartOutcome, SchedulerError> {
        let _setup = self.begin_setup(tenant_id)?;
        self.start_locked(tenant_id).await
    }

    /// Apply a partial polling update.
    ///
    /// Under the tenant's setup slot: merge the patch into the stored settings,
    /// save them, then reconcile the running timers. Job types whose
    /// `{enabled, schedule}` did not change keep their timer instance. A tenant
    /// that is not running is started from the saved settings.
    pub async fn update_tenant(
        &self,
        tenant_id: TenantId,
        patch: &PollingConfigPatch,
    ) -> Result<PollingUpdate, SchedulerError> {
        let _setup = self.begin_setup(tenant_id)?;

        let stored = self.load_settings(tenant_id).await?;
        let desired = stored.polling.apply(patch);
        if let Err(e) = self.settings.save_polling_config(tenant_id, &desired).await {
            error!(tenant = %tenant_id, error = %e, "failed to save polling config");
            return Err(e.into());
        }

        let running = {
            let tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
            tenants
                .get(&tenant_id)
                .filter(|e| e.is_running())
                .map(|e| (e.polling.clone(), e.credentials.clone()))
        };
        let Some((current, Some(credentials))) = running else {
            debug!(tenant = %tenant_id, "tenant not running; starting from stored settings");
            let start = self.start_locked(tenant_id).await?;
            return Ok(PollingUpdate {
                polling: desired,
                outcome: UpdateOutcome::Started { start },
            });
        };
        let generation = self.generation.load(Ordering::SeqCst);

        let mut changed = Vec::new();
        let mut skipped = Vec::new();
        for job_type in JobType::ALL {
            let config = desired.job(job_type);
            if current.job(job_type) == config {
                continue;
            }
            match self
                .jobs
                .create_or_update_job(tenant_id, job_type, &config)
                .await
            {
                Ok(_) => changed.push(job_type),
                Err(e) => {
                    error!(tenant = %tenant_id, job_type = %job_type, error = %e, "failed to persist job spec; previous timer kept");
                    skipped.push(job_type);
                }
            }
        }

        let (replaced, active_timers) = {
            let mut tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = tenants.get_mut(&tenant_id).filter(|e| e.is_running());
            let Some(entry) = entry.filter(|_| self.generation.load(Ordering::SeqCst) == generation)
            else {
                warn!(tenant = %tenant_id, "tenant stopped during update; changes not applied");
                return Err(SchedulerError::Interrupted(tenant_id));
            };

            let mut replaced = Vec::new();
            for job_type in &changed {
                if let Some(old) = entry.timers.remove(job_type) {
                    replaced.push(old);
                }
                let config = desired.job(*job_type);
                if config.enabled {
                    match self.build_timer(tenant_id, *job_type, config.clone(), &credentials) {
                        Some(timer) => {
                            entry.timers.insert(*job_type, timer);
                        }
                        None => skipped.push(*job_type),
                    }
                }
                entry.polling.set_job(*job_type, config);
            }
            (replaced, entry.timers.len())
        };
        for timer in replaced {
            timer.stop();
        }
        skipped.sort();

        info!(tenant = %tenant_id, changed = ?changed, skipped = ?skipped, active_timers, "tenant polling updated");
        Ok(PollingUpdate {
            polling: desired,
            outcome: UpdateOutcome::Updated {
                changed,
                skipped,
                active_timers,
            },
        })
    }

    /// Save new tracker credentials and restart the tenant with them.
    ///
    /// Cached data may belong to the previous project, so the tenant's cache
    /// is dropped before the restart.
    pub async fn replace_credentials(
        &self,
        tenant_id: TenantId,
        credentials: &TrackerCredentials,
    ) -> Result<CredentialsUpdate, SchedulerError> {
        let _setup = self.begin_setup(tenant_id)?;

        if let Err(e) = self.settings.save_credentials(tenant_id, credentials).await {
            error!(tenant = %tenant_id, error = %e, "failed to save tracker credentials");
            return Err(e.into());
        }
        let cache_entries_invalidated = self.cache.invalidate_tenant(tenant_id);
        let outcome = self.start_locked(tenant_id).await?;

        Ok(CredentialsUpdate {
            cache_entries_invalidated,
            outcome,
        })
    }

    /// Destroy every timer of the tenant and pause its JobSpecs.
    pub async fn stop_tenant(&self, tenant_id: TenantId) -> Result<StopOutcome, SchedulerError> {
        let _setup = self.begin_setup(tenant_id)?;

        let timers = self.take_timers(tenant_id, TenantState::Stopping);
        let timers_stopped = timers.len();
        for timer in timers {
            timer.stop();
        }

        let jobs_paused = match self.jobs.pause_jobs(tenant_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(tenant = %tenant_id, error = %e, "failed to pause job specs");
                0
            }
        };

        {
            let mut tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = tenants.entry(tenant_id).or_insert_with(TenantEntry::new);
            entry.state = TenantState::Stopped;
            entry.credentials = None;
        }

        info!(tenant = %tenant_id, timers_stopped, jobs_paused, "tenant polling stopped");
        Ok(StopOutcome {
            timers_stopped,
            jobs_paused,
        })
    }

    /// Halt everything: every timer of every tenant, plus the lock, cache and
    /// dedupe tables. In-flight ticks finish; their releases become no-ops.
    pub fn emergency_stop_all(&self) -> EmergencyStopReport {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let drained: Vec<(TenantId, TenantEntry)> = {
            let mut tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
            tenants.drain().collect()
        };

        let mut report = EmergencyStopReport {
            tenants: drained.len(),
            ..EmergencyStopReport::default()
        };
        for (tenant_id, entry) in drained {
            for (job_type, timer) in entry.timers {
                debug!(tenant = %tenant_id, job_type = %job_type, timer_id = %timer.id(), "timer stopped");
                timer.stop();
                report.timers_stopped += 1;
            }
        }
        report.locks_cleared = self.lock.clear();
        report.cache_entries_cleared = self.cache.clear_all();
        report.dedupe_entries_cleared = self.dedupe.clear();

        warn!(
            tenants = report.tenants,
            timers_stopped = report.timers_stopped,
            locks_cleared = report.locks_cleared,
            "emergency stop: all polling halted"
        );
        report
    }

    /// Start every tenant with at least one enabled job type. Runs once per
    /// manager; later calls return `Ok(None)`.
    pub async fn initialize(&self) -> Result<Option<InitReport>, SchedulerError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("scheduler already initialized");
            return Ok(None);
        }

        let tenants = match self.settings.list_tenants_with_enabled_polling().await {
            Ok(t) => t,
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                error!(error = %e, "failed to list tenants for polling");
                return Err(e.into());
            }
        };

        let mut report = InitReport::default();
        for tenant_id in tenants {
            match self.start_tenant(tenant_id).await {
                Ok(StartOutcome::Started { .. }) => report.started += 1,
                Ok(StartOutcome::MissingCredentials) => report.skipped += 1,
                Err(e) => {
                    warn!(tenant = %tenant_id, error = %e, "tenant failed to start");
                    report.failed += 1;
                }
            }
        }

        info!(
            started = report.started,
            skipped = report.skipped,
            failed = report.failed,
            "scheduler initialized"
        );
        Ok(Some(report))
    }

    /// Request an immediate run outside the schedule. Goes through the same
    /// execution lock as timer ticks; the run itself happens in the background.
    pub fn run_now(&self, tenant_id: TenantId, job_type: JobType) -> RunNowOutcome {
        let credentials = {
            let tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = tenants.get(&tenant_id).filter(|e| e.is_running()) else {
                return RunNowOutcome::NotRunning;
            };
            if !entry.polling.job(job_type).enabled {
                return RunNowOutcome::Disabled;
            }
            match &entry.credentials {
                Some(c) => c.clone(),
                None => return RunNowOutcome::NotRunning,
            }
        };

        let Some(guard) = self.lock.try_lock(tenant_id, job_type) else {
            debug!(tenant = %tenant_id, job_type = %job_type, "run requested while busy; skipped");
            return RunNowOutcome::Busy;
        };
        let execution_id = guard.execution_id();

        let runner = self.runner.clone();
        tokio::spawn(async move {
            runner
                .run_locked(guard, tenant_id, job_type, (*credentials).clone())
                .await;
        });
        RunNowOutcome::Started { execution_id }
    }

    pub fn tenant_state(&self, tenant_id: TenantId) -> TenantState {
        let tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
        tenants
            .get(&tenant_id)
            .map_or(TenantState::Uninitialized, |e| e.state)
    }

    pub fn timer_status(&self, tenant_id: TenantId, job_type: JobType) -> Option<TimerStatus> {
        let tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
        tenants
            .get(&tenant_id)
            .and_then(|e| e.timers.get(&job_type))
            .map(timer_status)
    }

    pub fn tenant_status(&self, tenant_id: TenantId) -> Option<TenantStatus> {
        let tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
        tenants.get(&tenant_id).map(|e| tenant_status(tenant_id, e))
    }

    pub fn status(&self) -> SchedulerStatus {
        let mut tenants: Vec<TenantStatus> = {
            let tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
            tenants
                .iter()
                .map(|(id, e)| tenant_status(*id, e))
                .collect()
        };
        tenants.sort_by_key(|t| t.tenant_id);

        SchedulerStatus {
            total_timers: tenants.iter().map(|t| t.active_timers).sum(),
            tenants,
            lock_table_size: self.lock.len(),
            cache: self.cache.stats(),
            dedupe_table_size: self.dedupe.len(),
        }
    }

    fn begin_setup(&self, tenant_id: TenantId) -> Result<SetupGuard<'_>, SchedulerError> {
        let mut in_progress = self
            .setup_in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_progress.insert(tenant_id) {
            debug!(tenant = %tenant_id, "setup already in progress; request rejected");
            return Err(SchedulerError::SetupInProgress(tenant_id));
        }
        Ok(SetupGuard {
            in_progress: &self.setup_in_progress,
            tenant_id,
        })
    }

    async fn load_settings(&self, tenant_id: TenantId) -> Result<TenantSettings, SchedulerError> {
        match self.settings.get_tenant_with_credentials(tenant_id).await {
            Ok(Some(s)) => Ok(s),
            Ok(None) => {
                warn!(tenant = %tenant_id, "unknown tenant; polling not changed");
                Err(SchedulerError::TenantNotFound(tenant_id))
            }
            Err(e) => {
                error!(tenant = %tenant_id, error = %e, "failed to load tenant settings");
                Err(e.into())
            }
        }
    }

    async fn start_locked(&self, tenant_id: TenantId) -> Result<StartOutcome, SchedulerError> {
        let generation = self.generation.load(Ordering::SeqCst);

        let settings = self.load_settings(tenant_id).await?;
        let Some(credentials) = settings.usable_credentials().cloned() else {
            warn!(tenant = %tenant_id, "tracker credentials incomplete; polling not started");
            return Ok(StartOutcome::MissingCredentials);
        };
        let credentials = Arc::new(credentials);

        for timer in self.take_timers(tenant_id, TenantState::Starting) {
            timer.stop();
        }

        let mut polling = settings.polling.clone();
        let mut failed = HashSet::new();
        for job_type in JobType::ALL {
            let config = settings.polling.job(job_type);
            if let Err(e) = self
                .jobs
                .create_or_update_job(tenant_id, job_type, &config)
                .await
            {
                error!(tenant = %tenant_id, job_type = %job_type, error = %e, "failed to reconcile job spec; job skipped");
                failed.insert(job_type);
                // Recorded as not scheduled so the next update retries the write.
                polling.set_job(job_type, JobConfig::new(false, config.schedule));
            }
        }

        let active = match self.jobs.get_active_jobs(tenant_id).await {
            Ok(specs) => specs,
            Err(e) => {
                error!(tenant = %tenant_id, error = %e, "failed to load active job specs; no timers started");
                Vec::new()
            }
        };

        let mut timers = HashMap::new();
        for spec in active.iter().filter(|s| !failed.contains(&s.job_type)) {
            let config = spec.config();
            if let Some(timer) = self.build_timer(tenant_id, spec.job_type, config, &credentials) {
                timers.insert(spec.job_type, timer);
            }
        }
        let skipped: Vec<JobType> = JobType::ALL
            .into_iter()
            .filter(|t| settings.polling.job(*t).enabled && !timers.contains_key(t))
            .collect();

        let active_timers = timers.len();
        {
            let mut tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
            if self.generation.load(Ordering::SeqCst) != generation {
                tenants.remove(&tenant_id);
                warn!(tenant = %tenant_id, "emergency stop during setup; timers discarded");
                return Err(SchedulerError::Interrupted(tenant_id));
            }
            tenants.insert(
                tenant_id,
                TenantEntry {
                    state: TenantState::Running,
                    polling,
                    credentials: Some(credentials),
                    timers,
                },
            );
        }

        info!(tenant = %tenant_id, active_timers, skipped = ?skipped, "tenant polling started");
        Ok(StartOutcome::Started {
            active_timers,
            skipped,
        })
    }

    /// Move the tenant to `state` and hand back its timers for stopping.
    fn take_timers(&self, tenant_id: TenantId, state: TenantState) -> Vec<ActiveTimer> {
        let mut tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = tenants.entry(tenant_id).or_insert_with(TenantEntry::new);
        entry.state = state;
        entry.timers.drain().map(|(_, t)| t).collect()
    }

    fn build_timer(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        config: JobConfig,
        credentials: &Arc<TrackerCredentials>,
    ) -> Option<ActiveTimer> {
        match ScheduleExpr::parse(&config.schedule) {
            Ok(schedule) => Some(ActiveTimer::start(
                tenant_id,
                job_type,
                schedule,
                credentials.clone(),
                self.runner.clone(),
                self.clock,
            )),
            Err(e) => {
                error!(
                    tenant = %tenant_id,
                    job_type = %job_type,
                    schedule = %config.schedule,
                    error = %e,
                    "invalid schedule; job skipped"
                );
                None
            }
        }
    }
}

impl core::fmt::Debug for SchedulingManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedulingManager")
            .field("clock", &self.clock)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn timer_status(timer: &ActiveTimer) -> TimerStatus {
    TimerStatus {
        job_type: timer.job_type(),
        timer_id: timer.id(),
        schedule: timer.schedule().to_string(),
        ticks: timer.ticks(),
        next_fire: timer.next_fire(),
    }
}

fn tenant_status(tenant_id: TenantId, entry: &TenantEntry) -> TenantStatus {
    let mut jobs: Vec<TimerStatus> = entry.timers.values().map(timer_status).collect();
    jobs.sort_by_key(|j| j.job_type);
    TenantStatus {
        tenant_id,
        state: entry.state,
        active_timers: jobs.len(),
        jobs,
    }
}
