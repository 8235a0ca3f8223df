use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::info;

use devpulse_core::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewPullRequest,
    OverdueWorkItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub tenant_id: TenantId,
    pub kind: NotificationKind,
    /// Upstream id of the pull request or work item.
    pub reference_id: u64,
    pub message: String,
}

/// Where task notifications go. Delivery (email, chat) lives behind this seam.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, notification: Notification);
}

/// Default sink: one structured log line per notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, notification: Notification) {
        info!(
            tenant = %notification.tenant_id,
            kind = ?notification.kind,
            reference_id = notification.reference_id,
            "{}",
            notification.message
        );
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    inner: Mutex<Vec<Notification>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, notification: Notification) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
