use chrono::{DateTime, Utc};
use serde::Serialize;

use devpulse_core::{TenantId, TimerId};

use crate::cache::CacheStats;
use crate::jobs::JobType;

/// Lifecycle of a tenant inside the scheduling manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerStatus {
    pub job_type: JobType,
    pub timer_id: TimerId,
    pub schedule: String,
    pub ticks: u64,
    pub next_fire: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantStatus {
    pub tenant_id: TenantId,
    pub state: TenantState,
    pub active_timers: usize,
    pub jobs: Vec<TimerStatus>,
}

/// Observability surface: timers per tenant and table sizes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub tenants: Vec<TenantStatus>,
    pub total_timers: usize,
    pub lock_table_size: usize,
    pub cache: CacheStats,
    pub dedupe_table_size: usize,
}
