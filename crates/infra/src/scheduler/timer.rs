//! Live timers.
//!
//! A timer is a runtime task that sleeps until the schedule's next fire time
//! and then spawns one tick. Ticks run in their own task, so stopping a timer
//! never interrupts a run that is already in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use devpulse_core::{TenantId, TimerId};

use super::tick::TickRunner;
use crate::jobs::{JobType, ScheduleExpr};
use crate::settings::TrackerCredentials;

/// Wall clock derived from the runtime's monotonic clock.
///
/// Anchored once; afterwards it advances exactly as `tokio::time` does, which
/// makes paused-time tests drive schedules deterministically.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerClock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl SchedulerClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(anchor_utc: DateTime<Utc>) -> Self {
        Self {
            anchor_utc,
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.anchor.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
        self.anchor_utc
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for SchedulerClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Running timer for one (tenant, job type). Aborted on drop.
#[derive(Debug)]
pub struct ActiveTimer {
    id: TimerId,
    job_type: JobType,
    schedule: ScheduleExpr,
    ticks: Arc<AtomicU64>,
    clock: SchedulerClock,
    handle: JoinHandle<()>,
}

impl ActiveTimer {
    pub fn start(
        tenant_id: TenantId,
        job_type: JobType,
        schedule: ScheduleExpr,
        credentials: Arc<TrackerCredentials>,
        runner: Arc<TickRunner>,
        clock: SchedulerClock,
    ) -> Self {
        let id = TimerId::new();
        let ticks = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(timer_loop(
            id,
            tenant_id,
            job_type,
            schedule.clone(),
            credentials,
            runner,
            clock,
            ticks.clone(),
        ));

        debug!(tenant = %tenant_id, job_type = %job_type, timer_id = %id, schedule = schedule.source(), "timer started");

        Self {
            id,
            job_type,
            schedule,
            ticks,
            clock,
            handle,
        }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn schedule(&self) -> &str {
        self.schedule.source()
    }

    /// How many times the schedule has fired (including skipped ticks).
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.schedule.next_after(self.clock.now())
    }

    /// Stop firing. In-flight ticks are left to finish.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for ActiveTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn timer_loop(
    timer_id: TimerId,
    tenant_id: TenantId,
    job_type: JobType,
    schedule: ScheduleExpr,
    credentials: Arc<TrackerCredentials>,
    runner: Arc<TickRunner>,
    clock: SchedulerClock,
    ticks: Arc<AtomicU64>,
) {
    loop {
        let now = clock.now();
        let Some(next) = schedule.next_after(now) else {
            warn!(
                tenant = %tenant_id,
                job_type = %job_type,
                timer_id = %timer_id,
                schedule = schedule.source(),
                "schedule has no future fire time; timer exits"
            );
            return;
        };

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        ticks.fetch_add(1, Ordering::SeqCst);
        let runner = runner.clone();
        let credentials = credentials.clone();
        tokio::spawn(async move {
            runner.run_tick(tenant_id, job_type, &credentials).await;
        });
    }
}
