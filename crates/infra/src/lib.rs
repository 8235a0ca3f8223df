//! Scheduling and isolation subsystem for per-tenant tracker polling.
//!
//! - `lock`: per-(tenant, job type) execution lock
//! - `cache`: tenant-partitioned TTL cache for dashboard snapshots
//! - `dedupe`: duplicate-event filter for webhook redeliveries
//! - `jobs`: job types, schedules and the job store
//! - `settings`: tenant credentials and polling configuration
//! - `tracker` / `tasks`: upstream client and the polling tasks
//! - `scheduler`: the scheduling manager and its timers
//! - `webhooks`, `maintenance`: inbound events and background sweeps

pub mod cache;
pub mod config;
pub mod dedupe;
pub mod jobs;
pub mod lock;
pub mod maintenance;
pub mod scheduler;
pub mod settings;
pub mod tasks;
pub mod tracker;
pub mod webhooks;

pub use config::{ConfigError, SchedulerConfig};
