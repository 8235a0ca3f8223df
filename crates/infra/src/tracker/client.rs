//! Upstream project-tracker contract and the records the polling tasks consume.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::TrackerCredentials;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: u64,
    pub title: String,
    pub state: String,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub changed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Due before `now` and not in a terminal state.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        let closed = matches!(
            self.state.to_ascii_lowercase().as_str(),
            "closed" | "done" | "resolved" | "removed"
        );
        !closed && self.due_date.is_some_and(|due| due < now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: u64,
    pub build_number: String,
    pub definition: String,
    pub status: String,
    pub result: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    pub repository: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("upstream rejected credentials")]
    Unauthorized,
    #[error("upstream returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

/// Read-only access to a tenant's project tracker.
///
/// Credentials are passed per call so one client serves every tenant.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn list_work_items(
        &self,
        credentials: &TrackerCredentials,
    ) -> Result<Vec<WorkItem>, TrackerError>;

    async fn list_builds(&self, credentials: &TrackerCredentials)
    -> Result<Vec<Build>, TrackerError>;

    /// Active pull requests.
    async fn list_pull_requests(
        &self,
        credentials: &TrackerCredentials,
    ) -> Result<Vec<PullRequest>, TrackerError>;
}

/// Canned tracker for tests/dev.
///
/// Returns whatever was last stored, optionally after a delay or with a forced
/// failure, and counts every call.
#[derive(Debug, Default)]
pub struct InMemoryTrackerClient {
    work_items: RwLock<Vec<WorkItem>>,
    builds: RwLock<Vec<Build>>,
    pull_requests: RwLock<Vec<PullRequest>>,
    failure: RwLock<Option<TrackerError>>,
    delay: RwLock<Option<Duration>>,
    calls: AtomicU64,
}

impl InMemoryTrackerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_work_items(&self, items: Vec<WorkItem>) {
        *self.work_items.write().unwrap_or_else(PoisonError::into_inner) = items;
    }

    pub fn set_builds(&self, builds: Vec<Build>) {
        *self.builds.write().unwrap_or_else(PoisonError::into_inner) = builds;
    }

    pub fn set_pull_requests(&self, prs: Vec<PullRequest>) {
        *self.pull_requests.write().unwrap_or_else(PoisonError::into_inner) = prs;
    }

    /// Make every call fail with `error` (or succeed again with `None`).
    pub fn set_failure(&self, error: Option<TrackerError>) {
        *self.failure.write().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Simulate a slow upstream.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond<T: Clone>(&self, source: &RwLock<Vec<T>>) -> Result<Vec<T>, TrackerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self
            .failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }
        Ok(source.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

#[async_trait]
impl TrackerClient for InMemoryTrackerClient {
    async fn list_work_items(
        &self,
        _credentials: &TrackerCredentials,
    ) -> Result<Vec<WorkItem>, TrackerError> {
        self.respond(&self.work_items).await
    }

    async fn list_builds(
        &self,
        _credentials: &TrackerCredentials,
    ) -> Result<Vec<Build>, TrackerError> {
        self.respond(&self.builds).await
    }

    async fn list_pull_requests(
        &self,
        _credentials: &TrackerCredentials,
    ) -> Result<Vec<PullRequest>, TrackerError> {
        self.respond(&self.pull_requests).await
    }
}
