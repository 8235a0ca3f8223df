//! Per-tenant, per-job-type polling scheduler.
//!
//! ## Components
//!
//! - `SchedulingManager`: reconciles timers against tenant settings
//! - `ActiveTimer`: one live schedule, aborted on drop
//! - `TickRunner`: lock, run, record, release for a single fire
//! - `SchedulerClock`: wall clock that follows the runtime clock

pub mod manager;
pub mod status;
pub mod tick;
pub mod timer;

pub use manager::{
    CredentialsUpdate, EmergencyStopReport, InitReport, PollingUpdate, RunNowOutcome,
    SchedulerDeps, SchedulerError, SchedulingManager, StartOutcome, StopOutcome, UpdateOutcome,
};
pub use status::{SchedulerStatus, TenantState, TenantStatus, TimerStatus};
pub use tick::{TickOutcome, TickRunner};
pub use timer::{ActiveTimer, SchedulerClock};
