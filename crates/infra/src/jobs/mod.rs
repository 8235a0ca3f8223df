//! Per-tenant polling jobs: types, schedule expressions and the job store.
//!
//! ## Components
//!
//! - `JobType`: closed set of polling job kinds
//! - `JobSpec`: durable configuration + last-run bookkeeping per (tenant, job type)
//! - `PollingConfig` / `PollingConfigPatch`: tenant-level settings and partial updates
//! - `ScheduleExpr`: validated 5- or 6-field schedule expression
//! - `JobStore`: persistence (in-memory or Postgres)

pub mod postgres;
pub mod schedule;
pub mod store;
pub mod types;

pub use postgres::PostgresJobStore;
pub use schedule::{ScheduleError, ScheduleExpr};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{
    JobConfig, JobOutcome, JobRunStatus, JobSpec, JobSpecStatus, JobType, PollingConfig,
    PollingConfigPatch,
};
