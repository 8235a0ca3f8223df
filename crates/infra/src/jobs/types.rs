//! Core job types: job kinds, per-tenant polling configuration and the persisted JobSpec.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devpulse_core::{DomainError, TenantId};

/// Kind of recurring polling job.
///
/// The set is closed: each variant maps to exactly one task implementation in
/// [`crate::tasks::TaskRegistry`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    /// Work item snapshot per project.
    WorkItems,
    /// Recent pipeline builds per project.
    Builds,
    /// Active pull requests per project.
    PullRequests,
    /// Work items past their due date.
    OverdueCheck,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::WorkItems,
        JobType::Builds,
        JobType::PullRequests,
        JobType::OverdueCheck,
    ];

    /// Stable wire name (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::WorkItems => "workItems",
            JobType::Builds => "builds",
            JobType::PullRequests => "pullRequests",
            JobType::OverdueCheck => "overdueCheck",
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown job type: {s}")))
    }
}

/// The two scheduling-relevant fields of a job: whether it runs and when.
///
/// Two configs that compare equal must produce the same timer; the scheduling
/// manager relies on this to leave unchanged jobs untouched on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub enabled: bool,
    pub schedule: String,
}

impl JobConfig {
    pub fn new(enabled: bool, schedule: impl Into<String>) -> Self {
        Self {
            enabled,
            schedule: schedule.into(),
        }
    }

    pub fn disabled(schedule: impl Into<String>) -> Self {
        Self::new(false, schedule)
    }
}

/// Result of the most recent run of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    /// Never ran, or a run is in flight.
    Pending,
    Success,
    Error,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Pending => "pending",
            JobRunStatus::Success => "success",
            JobRunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobRunStatus::Pending),
            "success" => Some(JobRunStatus::Success),
            "error" => Some(JobRunStatus::Error),
            _ => None,
        }
    }
}

/// Lifecycle of a JobSpec record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSpecStatus {
    Active,
    /// Tenant deactivated; kept for bookkeeping, never scheduled.
    Paused,
}

impl JobSpecStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSpecStatus::Active => "active",
            JobSpecStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(JobSpecStatus::Active),
            "paused" => Some(JobSpecStatus::Paused),
            _ => None,
        }
    }
}

/// Completion of a single run, as recorded in the job store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Error(String),
}

/// Durable configuration + last-run bookkeeping for one (tenant, job type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub enabled: bool,
    pub schedule: String,
    pub status: JobSpecStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: JobRunStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(tenant_id: TenantId, job_type: JobType, config: &JobConfig) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            job_type,
            enabled: config.enabled,
            schedule: config.schedule.clone(),
            status: JobSpecStatus::Active,
            last_run: None,
            last_result: JobRunStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn config(&self) -> JobConfig {
        JobConfig::new(self.enabled, self.schedule.clone())
    }

    /// Active and enabled: a candidate for a timer.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.status == JobSpecStatus::Active
    }

    /// Apply a settings update; re-activates a paused spec.
    pub fn apply_config(&mut self, config: &JobConfig) {
        self.enabled = config.enabled;
        self.schedule = config.schedule.clone();
        self.status = JobSpecStatus::Active;
        self.updated_at = Utc::now();
    }

    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.last_result = JobRunStatus::Pending;
        self.updated_at = Utc::now();
    }

    pub fn mark_finished(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Success => {
                self.last_result = JobRunStatus::Success;
                self.last_error = None;
            }
            JobOutcome::Error(error) => {
                self.last_result = JobRunStatus::Error;
                self.last_error = Some(error.clone());
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn pause(&mut self) {
        self.status = JobSpecStatus::Paused;
        self.updated_at = Utc::now();
    }
}

/// Per-tenant polling configuration as stored with the tenant settings.
///
/// Flat camelCase fields so the JSON shape matches the settings document
/// (`pullRequestsEnabled`, `overdueCheckInterval`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingConfig {
    pub work_items_enabled: bool,
    pub work_items_interval: String,
    pub builds_enabled: bool,
    pub builds_interval: String,
    pub pull_requests_enabled: bool,
    pub pull_requests_interval: String,
    pub overdue_check_enabled: bool,
    pub overdue_check_interval: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            work_items_enabled: false,
            work_items_interval: "*/15 * * * *".to_string(),
            builds_enabled: false,
            builds_interval: "*/10 * * * *".to_string(),
            pull_requests_enabled: false,
            pull_requests_interval: "*/10 * * * *".to_string(),
            overdue_check_enabled: false,
            overdue_check_interval: "0 9 * * *".to_string(),
        }
    }
}

impl PollingConfig {
    pub fn job(&self, job_type: JobType) -> JobConfig {
        match job_type {
            JobType::WorkItems => JobConfig::new(self.work_items_enabled, &self.work_items_interval),
            JobType::Builds => JobConfig::new(self.builds_enabled, &self.builds_interval),
            JobType::PullRequests => {
                JobConfig::new(self.pull_requests_enabled, &self.pull_requests_interval)
            }
            JobType::OverdueCheck => {
                JobConfig::new(self.overdue_check_enabled, &self.overdue_check_interval)
            }
        }
    }

    pub fn set_job(&mut self, job_type: JobType, config: JobConfig) {
        let JobConfig { enabled, schedule } = config;
        match job_type {
            JobType::WorkItems => {
                self.work_items_enabled = enabled;
                self.work_items_interval = schedule;
            }
            JobType::Builds => {
                self.builds_enabled = enabled;
                self.builds_interval = schedule;
            }
            JobType::PullRequests => {
                self.pull_requests_enabled = enabled;
                self.pull_requests_interval = schedule;
            }
            JobType::OverdueCheck => {
                self.overdue_check_enabled = enabled;
                self.overdue_check_interval = schedule;
            }
        }
    }

    pub fn with_job(mut self, job_type: JobType, config: JobConfig) -> Self {
        self.set_job(job_type, config);
        self
    }

    pub fn has_enabled_jobs(&self) -> bool {
        JobType::ALL.iter().any(|t| self.job(*t).enabled)
    }

    /// Merge a partial update; fields absent from the patch keep their value.
    pub fn apply(&self, patch: &PollingConfigPatch) -> PollingConfig {
        let mut next = self.clone();
        for job_type in JobType::ALL {
            let current = next.job(job_type);
            let (enabled, schedule) = patch.job(job_type);
            next.set_job(
                job_type,
                JobConfig {
                    enabled: enabled.unwrap_or(current.enabled),
                    schedule: schedule.map(str::to_string).unwrap_or(current.schedule),
                },
            );
        }
        next
    }
}

/// Partial polling configuration update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingConfigPatch {
    pub work_items_enabled: Option<bool>,
    pub work_items_interval: Option<String>,
    pub builds_enabled: Option<bool>,
    pub builds_interval: Option<String>,
    pub pull_requests_enabled: Option<bool>,
    pub pull_requests_interval: Option<String>,
    pub overdue_check_enabled: Option<bool>,
    pub overdue_check_interval: Option<String>,
}

impl PollingConfigPatch {
    fn job(&self, job_type: JobType) -> (Option<bool>, Option<&str>) {
        match job_type {
            JobType::WorkItems => (self.work_items_enabled, self.work_items_interval.as_deref()),
            JobType::Builds => (self.builds_enabled, self.builds_interval.as_deref()),
            JobType::PullRequests => (
                self.pull_requests_enabled,
                self.pull_requests_interval.as_deref(),
            ),
            JobType::OverdueCheck => (
                self.overdue_check_enabled,
                self.overdue_check_interval.as_deref(),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PollingConfigPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_wire_names_round_trip() {
        for t in JobType::ALL {
            assert_eq!(t.as_str().parse::<JobType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!("deployments".parse::<JobType>().is_err());
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let base = PollingConfig::default()
            .with_job(JobType::PullRequests, JobConfig::new(true, "*/10 * * * *"));

        let patch: PollingConfigPatch = serde_json::from_value(serde_json::json!({
            "overdueCheckEnabled": true,
            "overdueCheckInterval": "0 */10 * * *"
        }))
        .unwrap();

        let next = base.apply(&patch);
        assert_eq!(next.job(JobType::PullRequests), base.job(JobType::PullRequests));
        assert_eq!(
            next.job(JobType::OverdueCheck),
            JobConfig::new(true, "0 */10 * * *")
        );
        assert_eq!(next.job(JobType::Builds), base.job(JobType::Builds));
    }

    #[test]
    fn settings_document_shape_deserializes() {
        let cfg: PollingConfig = serde_json::from_value(serde_json::json!({
            "pullRequestsEnabled": true,
            "pullRequestsInterval": "*/5 * * * *"
        }))
        .unwrap();

        assert!(cfg.pull_requests_enabled);
        assert_eq!(cfg.pull_requests_interval, "*/5 * * * *");
        // Missing fields fall back to defaults.
        assert!(!cfg.builds_enabled);
        assert!(cfg.has_enabled_jobs());
        assert!(!PollingConfig::default().has_enabled_jobs());
    }

    #[test]
    fn spec_lifecycle() {
        let tenant = TenantId::new();
        let mut spec = JobSpec::new(tenant, JobType::Builds, &JobConfig::new(true, "* * * * *"));
        assert!(spec.is_schedulable());
        assert_eq!(spec.last_result, JobRunStatus::Pending);

        spec.mark_started(Utc::now());
        spec.mark_finished(&JobOutcome::Error("boom".into()));
        assert_eq!(spec.last_result, JobRunStatus::Error);
        assert_eq!(spec.last_error.as_deref(), Some("boom"));

        spec.mark_finished(&JobOutcome::Success);
        assert_eq!(spec.last_result, JobRunStatus::Success);
        assert!(spec.last_error.is_none());

        spec.pause();
        assert!(!spec.is_schedulable());

        spec.apply_config(&JobConfig::new(true, "*/2 * * * *"));
        assert!(spec.is_schedulable());
        assert_eq!(spec.schedule, "*/2 * * * *");
    }
}
